pub mod broadcast_repository;
pub mod device_catalog;
pub mod flow_repository;
pub mod manager;
pub(crate) mod mapping;
pub mod schema;

pub use broadcast_repository::SqlBroadcastRepository;
pub use device_catalog::SqlDeviceCatalog;
pub use flow_repository::SqlFlowJobRepository;
pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
