pub mod config;
pub mod database;
pub mod repository;
pub mod transport;

pub use config::*;
pub use database::*;
pub use repository::*;
pub use transport::*;
