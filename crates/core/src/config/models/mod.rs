pub mod app_config;
pub mod coordination;
pub mod database;
pub mod dispatch;
pub mod observability;

pub use app_config::AppConfig;
pub use coordination::{CoordinationBackend, CoordinationConfig, RedisConfig};
pub use database::DatabaseConfig;
pub use dispatch::{
    HealthConfig, RateLimitConfig, ReservationConfig, SchedulerConfig, SenderConfig,
    WorkerPoolConfig,
};
pub use observability::ObservabilityConfig;
