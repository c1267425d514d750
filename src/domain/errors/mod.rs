//! Domain error types.

mod cache_error;
mod config_error;
mod init_error;
mod load_error;

pub use cache_error::{CacheError, StoreError};
pub use config_error::ConfigError;
pub use init_error::InitError;
pub use load_error::LoadError;
