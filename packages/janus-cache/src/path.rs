//! On-disk layout helpers (spec.md §4.9/§6): `<root>/objects/<hex32(cid)>/
//! artifact-<flavor>.bin` and `meta-<flavor>.json`.

use std::path::{Path, PathBuf};

use janus_core::Cid;

use crate::error::{CacheError, CacheResult};

pub fn validate_name(name: &str) -> CacheResult<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(CacheError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub fn object_dir(root: &Path, cid: &Cid) -> PathBuf {
    root.join("objects").join(cid.to_hex())
}

pub fn artifact_path(root: &Path, cid: &Cid, flavor: &str) -> PathBuf {
    object_dir(root, cid).join(format!("artifact-{flavor}.bin"))
}

pub fn meta_path(root: &Path, cid: &Cid, flavor: &str) -> PathBuf {
    object_dir(root, cid).join(format!("meta-{flavor}.json"))
}

pub fn named_path(root: &Path, cid: &Cid, filename: &str) -> PathBuf {
    object_dir(root, cid).join(filename)
}

/// Flavor extracted from an `artifact-<flavor>.bin` directory entry name, if
/// the entry matches that shape.
pub fn flavor_from_artifact_filename(filename: &str) -> Option<&str> {
    filename
        .strip_prefix("artifact-")
        .and_then(|rest| rest.strip_suffix(".bin"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_separators_and_traversal() {
        assert!(validate_name("npu-O2").is_ok());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a\\b").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name("").is_err());
    }

    #[test]
    fn flavor_extraction_round_trips() {
        assert_eq!(flavor_from_artifact_filename("artifact-npu-O2.bin"), Some("npu-O2"));
        assert_eq!(flavor_from_artifact_filename("meta-npu-O2.json"), None);
    }
}
