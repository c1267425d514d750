mod durable_store_port;
mod fetcher_port;
mod visibility_port;

pub use durable_store_port::DurableStore;
pub use fetcher_port::{FetchedImage, Fetcher};
pub use visibility_port::{ElementId, VisibilityEvent, VisibilityObserver};

#[cfg(test)]
pub mod mocks {
    pub use super::durable_store_port::mock::MemoryDurableStore;
    pub use super::fetcher_port::mock::{MockFetcher, sample_png};
    pub use super::visibility_port::MockVisibilityObserver;
}
