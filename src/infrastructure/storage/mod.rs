//! Durable storage adapters.

mod disk_store;

pub use disk_store::{DEFAULT_DISK_QUOTA, DiskStore, default_cache_dir};
