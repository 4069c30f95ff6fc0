//! Content-addressed on-disk build cache (spec.md §4.9, C9), kept as its own
//! crate so artifact-storage-only callers don't pull in the graph/analysis
//! stack from `janus-core`.

pub mod error;
pub mod path;
pub mod store;

pub use error::{CacheError, CacheResult};
pub use store::{BuildCache, DEFAULT_LOAD_CAP_BYTES};
