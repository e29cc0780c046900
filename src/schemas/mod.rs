pub mod commands;
pub mod files;

pub use commands::*;
pub use files::*;
