//! Upstream fetch adapters.

mod http_fetcher;
mod inspect;
mod transform_url;

pub use http_fetcher::{DEFAULT_TIMEOUT, HttpFetcher, decode_data_url};
pub use inspect::{rejects_image, resolve_content_type};
pub use transform_url::{apply_transform, is_transform_host};
