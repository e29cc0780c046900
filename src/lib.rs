pub mod compound;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod schemas;
pub mod sessions;
pub mod transport;
pub mod utils;

pub use config::Config;
pub use coordinator::{Coordinator, DirectorySync};
pub use error::{AppError, ErrorKind, Service};
pub use sessions::registry;
