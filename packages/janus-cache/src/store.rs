//! Content-addressed build cache (spec.md §4.9, C9).
//!
//! Atomic-write protocol: write to a unique temp file, `write_all`,
//! `sync_all`, then `fs::rename` into place. Rename collision is treated as
//! success — first writer wins; the filesystem rename is the only
//! coordination primitive, no cross-process locking.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use janus_core::Cid;
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::path::{artifact_path, flavor_from_artifact_filename, meta_path, named_path, object_dir, validate_name};

/// Default size cap enforced by `load` (spec.md §4.9).
pub const DEFAULT_LOAD_CAP_BYTES: u64 = 64 * 1024 * 1024;

pub struct BuildCache {
    root: PathBuf,
    load_cap_bytes: u64,
}

impl BuildCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        BuildCache {
            root: root.into(),
            load_cap_bytes: DEFAULT_LOAD_CAP_BYTES,
        }
    }

    pub fn with_load_cap(root: impl Into<PathBuf>, load_cap_bytes: u64) -> Self {
        BuildCache {
            root: root.into(),
            load_cap_bytes,
        }
    }

    pub fn store(&self, cid: &Cid, flavor: &str, bytes: &[u8]) -> CacheResult<()> {
        validate_name(flavor)?;
        write_atomic(&self.root, cid, &artifact_path(&self.root, cid, flavor), bytes)
    }

    pub fn store_meta(&self, cid: &Cid, flavor: &str, json_bytes: &[u8]) -> CacheResult<()> {
        validate_name(flavor)?;
        write_atomic(&self.root, cid, &meta_path(&self.root, cid, flavor), json_bytes)
    }

    pub fn store_named(&self, cid: &Cid, filename: &str, bytes: &[u8]) -> CacheResult<()> {
        validate_name(filename)?;
        write_atomic(&self.root, cid, &named_path(&self.root, cid, filename), bytes)
    }

    /// Reads the artifact byte-for-byte, enforcing the size cap before
    /// reading the whole file into memory.
    pub fn load(&self, cid: &Cid, flavor: &str) -> CacheResult<Vec<u8>> {
        validate_name(flavor)?;
        let path = artifact_path(&self.root, cid, flavor);
        let metadata = fs::metadata(&path).map_err(|e| not_found_or_io(e, cid, flavor))?;
        if metadata.len() > self.load_cap_bytes {
            return Err(CacheError::SizeExceeded {
                cid_hex: cid.to_hex(),
                flavor: flavor.to_string(),
                actual: metadata.len(),
                cap: self.load_cap_bytes,
            });
        }
        fs::read(&path).map_err(|e| io_err(&path, e))
    }

    pub fn exists(&self, cid: &Cid, flavor: &str) -> bool {
        artifact_path(&self.root, cid, flavor).exists()
    }

    /// Enumerates `artifact-<flavor>.bin` entries under this CID's object
    /// directory. Missing CID directory yields an empty set, not an error.
    pub fn list_flavors(&self, cid: &Cid) -> CacheResult<HashSet<String>> {
        let dir = object_dir(&self.root, cid);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(io_err(&dir, e)),
        };

        let mut flavors = HashSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            if let Some(name) = entry.file_name().to_str() {
                if let Some(flavor) = flavor_from_artifact_filename(name) {
                    flavors.insert(flavor.to_string());
                }
            }
        }
        Ok(flavors)
    }
}

fn not_found_or_io(e: std::io::Error, cid: &Cid, flavor: &str) -> CacheError {
    if e.kind() == std::io::ErrorKind::NotFound {
        CacheError::NotFound {
            cid_hex: cid.to_hex(),
            flavor: flavor.to_string(),
        }
    } else {
        CacheError::Io {
            path: format!("{}/{}", cid.to_hex(), flavor),
            source: e,
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Ensures the object directory exists, writes `bytes` to a unique temp file
/// beside `final_path`, flushes durably, then renames into place. A rename
/// collision (another writer won first) is swallowed as success; the loser's
/// orphaned temp file is removed best-effort.
fn write_atomic(root: &Path, cid: &Cid, final_path: &Path, bytes: &[u8]) -> CacheResult<()> {
    let dir = object_dir(root, cid);
    fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let tmp_path = unique_tmp_path(final_path);
    {
        let mut file = File::options()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .map_err(|e| io_err(&tmp_path, e))?;
        file.write_all(bytes).map_err(|e| io_err(&tmp_path, e))?;
        file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    }

    match fs::rename(&tmp_path, final_path) {
        Ok(()) => {
            debug!(path = %final_path.display(), bytes = bytes.len(), "stored artifact");
            Ok(())
        }
        Err(e) => {
            // Another writer may have already renamed an equivalent tmp file
            // into `final_path` first. Per spec.md §4.9 that race is
            // idempotent success as long as the destination now exists.
            if final_path.exists() {
                let _ = fs::remove_file(&tmp_path);
                warn!(path = %final_path.display(), "rename collision, first writer won");
                Ok(())
            } else {
                Err(io_err(final_path, e))
            }
        }
    }
}

fn unique_tmp_path(final_path: &Path) -> PathBuf {
    static NONCE: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let nonce = NONCE.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let file_name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    final_path.with_file_name(format!(
        ".{file_name}.tmp-{}-{nonce}",
        std::process::id()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use janus_core::cid::empty_cid;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn store_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let cache = BuildCache::new(dir.path());
        let cid = empty_cid();
        cache.store(&cid, "npu-O2", b"artifact bytes").unwrap();
        assert!(cache.exists(&cid, "npu-O2"));
        assert_eq!(cache.load(&cid, "npu-O2").unwrap(), b"artifact bytes");
    }

    #[test]
    fn load_of_nonexistent_artifact_is_an_error() {
        let dir = TempDir::new().unwrap();
        let cache = BuildCache::new(dir.path());
        let cid = empty_cid();
        assert!(matches!(
            cache.load(&cid, "npu-O2").unwrap_err(),
            CacheError::NotFound { .. }
        ));
    }

    #[test]
    fn list_flavors_on_missing_cid_is_empty_not_error() {
        let dir = TempDir::new().unwrap();
        let cache = BuildCache::new(dir.path());
        let cid = empty_cid();
        assert!(cache.list_flavors(&cid).unwrap().is_empty());
    }

    #[test]
    fn list_flavors_enumerates_stored_artifacts() {
        let dir = TempDir::new().unwrap();
        let cache = BuildCache::new(dir.path());
        let cid = empty_cid();
        cache.store(&cid, "npu-O2", b"a").unwrap();
        cache.store(&cid, "npu-O3", b"b").unwrap();
        cache.store_meta(&cid, "npu-O2", br#"{"ok":true}"#).unwrap();

        let flavors = cache.list_flavors(&cid).unwrap();
        assert_eq!(flavors.len(), 2);
        assert!(flavors.contains("npu-O2"));
        assert!(flavors.contains("npu-O3"));
    }

    #[test]
    fn load_rejects_oversized_artifact() {
        let dir = TempDir::new().unwrap();
        let cache = BuildCache::with_load_cap(dir.path(), 4);
        let cid = empty_cid();
        cache.store(&cid, "npu-O2", b"way too big").unwrap();
        assert!(matches!(
            cache.load(&cid, "npu-O2").unwrap_err(),
            CacheError::SizeExceeded { .. }
        ));
    }

    #[test]
    fn flavor_with_path_separator_is_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = BuildCache::new(dir.path());
        let cid = empty_cid();
        assert!(matches!(
            cache.store(&cid, "../escape", b"x").unwrap_err(),
            CacheError::InvalidName(_)
        ));
    }

    #[test]
    fn concurrent_store_of_same_artifact_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(BuildCache::new(dir.path()));
        let cid = empty_cid();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.store(&cid, "npu-O2", b"concurrent bytes"))
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }

        assert_eq!(cache.load(&cid, "npu-O2").unwrap(), b"concurrent bytes");
        let dir_entries: Vec<_> = fs::read_dir(object_dir(dir.path(), &cid))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        let artifact_files: Vec<_> = dir_entries
            .iter()
            .filter(|e| e.file_name().to_str().map(|n| n.starts_with("artifact-")).unwrap_or(false))
            .collect();
        assert_eq!(artifact_files.len(), 1);
    }
}
