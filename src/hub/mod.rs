//! Model hub client
//!
//! The hub hosts named model snapshots. [`ModelHub`] is the boundary the
//! lifecycle manager talks to; [`HfHub`] implements it over the
//! HuggingFace Hub with the hf-hub crate.

pub mod cache;
pub mod hf;

pub use cache::{SNAPSHOT_CACHE_SUBDIR, get_cache_dir};
pub use hf::{HfHub, HubConfig};

use crate::error::LifecycleResult;
use crate::fetcher::RemoteFiles;
use async_trait::async_trait;
use std::path::Path;

/// Source of full model snapshots
///
/// `list_files`/`fetch_file` (from [`RemoteFiles`]) take the hub model
/// identifier as their remote URI.
#[async_trait]
pub trait ModelHub: RemoteFiles {
    /// Download every file of `identifier` into `destination`
    async fn fetch_snapshot(&self, identifier: &str, destination: &Path) -> LifecycleResult<()>;
}
