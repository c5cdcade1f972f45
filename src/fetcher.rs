//! Selective file retrieval
//!
//! Fetches only the allow-listed subset of a remote listing into a target
//! directory. Used to reconstruct a tokenizer from a stored model without
//! pulling the weights: a handful of small JSON/text files instead of the
//! full snapshot.

use crate::error::{LifecycleError, LifecycleResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Files that are enough to rebuild a tokenizer without model weights
///
/// `tokenizer.json` and `tokenizer.model` are alternative definitions; a
/// model usually ships only one of them.
pub const TOKENIZER_FILES: &[&str] = &[
    "tokenizer.json",
    "tokenizer.model",
    "tokenizer_config.json",
    "special_tokens_map.json",
    "config.json",
    "generation_config.json",
];

/// Remote location that can be listed and read file by file
#[async_trait]
pub trait RemoteFiles: Send + Sync {
    /// List file names (relative, `/`-separated) under `remote_uri`
    async fn list_files(&self, remote_uri: &str) -> LifecycleResult<Vec<String>>;

    /// Copy one file from `remote_uri` to `destination`
    async fn fetch_file(
        &self,
        remote_uri: &str,
        filename: &str,
        destination: &Path,
    ) -> LifecycleResult<()>;
}

/// Set of plain file names eligible for retrieval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowList {
    names: BTreeSet<String>,
}

impl AllowList {
    /// Build an allow-list; every entry must be a bare file name
    pub fn new<I, S>(names: I) -> LifecycleResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = BTreeSet::new();
        for name in names {
            let name = name.into();
            if !is_plain_file_name(&name) {
                return Err(LifecycleError::InvalidInput(format!(
                    "allow-list entry '{}' is not a plain file name",
                    name
                )));
            }
            set.insert(name);
        }
        Ok(Self { names: set })
    }

    /// The fixed tokenizer file set
    pub fn tokenizer() -> Self {
        Self {
            names: TOKENIZER_FILES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

/// Per-file outcome of a selective retrieval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetrievalOutcome {
    Fetched,
    SkippedNotAllowed,
    MissingOnRemote,
    TransportFailed { reason: String },
}

/// One allow-listed file and what happened to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalEntry {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(flatten)]
    pub outcome: RetrievalOutcome,
}

/// Result of a selective retrieval
///
/// `entries` holds every allow-listed name exactly once, independent of
/// fetch order. Remote files outside the allow-list are only named in
/// `skipped`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrievalResult {
    entries: BTreeMap<String, RetrievalEntry>,
    skipped: Vec<String>,
}

impl RetrievalResult {
    pub fn entries(&self) -> impl Iterator<Item = &RetrievalEntry> {
        self.entries.values()
    }

    pub fn get(&self, filename: &str) -> Option<&RetrievalEntry> {
        self.entries.get(filename)
    }

    /// Outcome for any name seen, allow-listed or skipped
    pub fn outcome(&self, filename: &str) -> Option<RetrievalOutcome> {
        if let Some(entry) = self.entries.get(filename) {
            return Some(entry.outcome.clone());
        }
        self.skipped
            .iter()
            .any(|s| s == filename)
            .then_some(RetrievalOutcome::SkippedNotAllowed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn fetched(&self) -> impl Iterator<Item = &RetrievalEntry> {
        self.entries
            .values()
            .filter(|e| e.outcome == RetrievalOutcome::Fetched)
    }

    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.entries
            .values()
            .filter(|e| e.outcome == RetrievalOutcome::MissingOnRemote)
            .map(|e| e.filename.as_str())
    }

    pub fn failed(&self) -> impl Iterator<Item = &RetrievalEntry> {
        self.entries
            .values()
            .filter(|e| matches!(e.outcome, RetrievalOutcome::TransportFailed { .. }))
    }

    pub fn has_fetched(&self, filename: &str) -> bool {
        self.entries
            .get(filename)
            .is_some_and(|e| e.outcome == RetrievalOutcome::Fetched)
    }
}

/// Fetch `listing ∩ allow` from `source` into `target_dir`
///
/// Files keep their original names with no nesting. A transport failure on
/// one file is recorded for that file and the rest are still fetched; the
/// caller decides whether the subset obtained is enough.
pub async fn fetch_matching<S>(
    source: &S,
    remote_uri: &str,
    listing: &[String],
    allow: &AllowList,
    target_dir: &Path,
    concurrency: usize,
) -> LifecycleResult<RetrievalResult>
where
    S: RemoteFiles + ?Sized,
{
    tokio::fs::create_dir_all(target_dir).await?;

    let remote: BTreeSet<&str> = listing.iter().map(String::as_str).collect();

    let skipped: Vec<String> = remote
        .iter()
        .filter(|name| !allow.contains(name))
        .map(|name| name.to_string())
        .collect();

    let mut entries = BTreeMap::new();
    let mut to_fetch = Vec::new();
    for name in allow.names() {
        if remote.contains(name) {
            to_fetch.push(name.to_string());
        } else {
            entries.insert(
                name.to_string(),
                RetrievalEntry {
                    filename: name.to_string(),
                    local_path: None,
                    outcome: RetrievalOutcome::MissingOnRemote,
                },
            );
        }
    }

    let fetched: Vec<RetrievalEntry> = stream::iter(to_fetch)
        .map(|name| async move {
            let destination = target_dir.join(&name);
            tracing::debug!(remote_uri = %remote_uri, file = %name, "Fetching allow-listed file");

            match source.fetch_file(remote_uri, &name, &destination).await {
                Ok(()) => RetrievalEntry {
                    filename: name,
                    local_path: Some(destination),
                    outcome: RetrievalOutcome::Fetched,
                },
                Err(e) => {
                    tracing::warn!(remote_uri = %remote_uri, file = %name, error = %e, "Failed to fetch file");
                    discard_partial(&destination).await;
                    RetrievalEntry {
                        filename: name,
                        local_path: None,
                        outcome: RetrievalOutcome::TransportFailed {
                            reason: e.to_string(),
                        },
                    }
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for entry in fetched {
        entries.insert(entry.filename.clone(), entry);
    }

    Ok(RetrievalResult { entries, skipped })
}

/// Remove whatever a failed transfer left at `destination`
async fn discard_partial(destination: &Path) {
    match tokio::fs::remove_file(destination).await {
        Ok(()) => tracing::debug!(path = ?destination, "Removed partially fetched file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = ?destination, error = %e, "Failed to remove partially fetched file");
            crate::metrics::record_cleanup_failure("fetch");
        }
    }
}
