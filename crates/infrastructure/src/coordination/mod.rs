//! 协调存储实现
//!
//! - `RedisCoordinationStore` - 生产实现，多进程共享；预约、释放与计数自增都是 Lua 脚本
//! - `InMemoryCoordinationStore` - 单进程实现，用于测试与嵌入式运行

pub mod keys;
pub mod memory_store;
pub mod redis_store;

pub use keys::KeyBuilder;
pub use memory_store::InMemoryCoordinationStore;
pub use redis_store::RedisCoordinationStore;
