//! 配置管理
//!
//! 配置从 TOML 文件加载，随后由 `DISPATCH_` 前缀的环境变量覆盖
//! （层级分隔符为 `__`，例如 `DISPATCH_RATE_LIMIT__HOURLY_LIMIT=100`），
//! 最后统一校验。所有字段都有默认值，空配置文件也能启动。

pub mod models;

pub use models::*;
