//! Error taxonomy for the on-disk build cache (spec.md §7, "Cache").

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// Any I/O failure on store/load that isn't the specific rename-collision
    /// case (which is idempotent success, not an error).
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// `load` found no artifact/meta/named file for the given CID.
    #[error("no artifact found for cid {cid_hex} flavor {flavor}")]
    NotFound { cid_hex: String, flavor: String },

    /// `load`'s size cap (default 64 MiB) was exceeded.
    #[error("artifact for cid {cid_hex} flavor {flavor} exceeds size cap ({actual} > {cap} bytes)")]
    SizeExceeded {
        cid_hex: String,
        flavor: String,
        actual: u64,
        cap: u64,
    },

    /// A caller-provided flavor or filename contained a path separator.
    #[error("invalid flavor/filename {0:?}: must not contain path separators")]
    InvalidName(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
