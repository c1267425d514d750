//! Application configuration.

pub mod app_config;
pub mod args;
pub mod storage;

pub use app_config::{
    AppConfig, CacheConfig, EngineConfig, LogLevel, NetworkConfig, PreloadConfig, RetryConfig,
};
pub use args::{CliArgs, Command, TransformArgs};
pub use storage::ConfigStore;
