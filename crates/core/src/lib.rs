pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod reservation;
pub mod traits;

pub use config::*;
pub use errors::*;
pub use logging::*;
pub use models::*;
pub use reservation::Reservation;
pub use traits::*;
