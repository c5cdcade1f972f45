//! HuggingFace cache locations
//!
//! Two caches are involved:
//! - the shared hub cache used for single-file fetches
//! - a per-snapshot cache created inside the staging directory, which is
//!   hub-internal bookkeeping and is stripped before upload
//!
//! Shared cache structure:
//! ```text
//! ~/.cache/huggingface/hub/
//! ├── models--org--name/
//! │   ├── blobs/
//! │   ├── snapshots/{revision}/
//! │   └── refs/main
//! ```

use std::path::{Path, PathBuf};

/// Hub cache subdirectory written inside a snapshot destination
pub const SNAPSHOT_CACHE_SUBDIR: &str = ".cache/huggingface";

/// Get the shared HuggingFace cache directory
///
/// Checks in order:
/// 1. `$HF_HOME/hub`
/// 2. `$XDG_CACHE_HOME/huggingface/hub`
/// 3. `~/.cache/huggingface/hub`
pub fn get_cache_dir() -> PathBuf {
    if let Ok(hf_home) = std::env::var("HF_HOME") {
        return PathBuf::from(hf_home).join("hub");
    }

    if let Ok(xdg_cache) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache).join("huggingface/hub");
    }

    dirs::home_dir()
        .map(|h| h.join(".cache/huggingface/hub"))
        .unwrap_or_else(|| std::env::temp_dir().join("huggingface/hub"))
}

/// Cache directory used while downloading a snapshot into `destination`
pub fn snapshot_cache_dir(destination: &Path) -> PathBuf {
    destination.join(SNAPSHOT_CACHE_SUBDIR)
}
