pub mod catalog;
pub mod coordination;
pub mod database;

pub use catalog::InMemoryDeviceCatalog;
pub use coordination::*;
pub use database::*;
