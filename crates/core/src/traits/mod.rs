pub mod catalog;
pub mod coordination;
pub mod outcome;
pub mod repository;
pub mod sender;

pub use catalog::*;
pub use coordination::*;
pub use outcome::*;
pub use repository::*;
pub use sender::*;
