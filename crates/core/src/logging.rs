use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化全局日志
///
/// `RUST_LOG` 存在时优先于配置中的级别。`format` 为 `json` 时输出结构化日志，
/// 其余值使用 pretty 格式。
pub fn init_logging(level: &str, format: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match format {
        "json" => registry
            .with(fmt::layer().json().with_target(true).with_current_span(false))
            .try_init(),
        _ => registry
            .with(fmt::layer().pretty().with_target(true).with_thread_ids(true))
            .try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("初始化日志失败: {e}"))
}
