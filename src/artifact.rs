//! Model artifact record and its lifecycle state machine
//!
//! A [`ModelArtifact`] tracks one named model version as it moves from the
//! hub, through a local stage, into the artifact registry. Transitions are
//! only possible through the guarded methods on this type so the
//! path/URI invariants always hold:
//!
//! - `local_path` is set iff status is `StagedLocal` or `Uploading`
//! - `remote_uri` is set iff status is `Stored` or `LocalPurged`

use crate::error::{LifecycleError, LifecycleResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Label map attached to an artifact at store time
pub type Labels = BTreeMap<String, String>;

/// Status of a model artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// Referenced by name, nothing fetched yet
    Absent,
    /// Hub snapshot is being written into a local stage
    Downloading,
    /// Snapshot complete and stripped, waiting for upload
    StagedLocal,
    /// Stage is being copied into the registry
    Uploading,
    /// Durable in the registry
    Stored,
    /// Durable in the registry, local stage removed
    LocalPurged,
    /// Attempt failed; a new attempt starts from `Absent`
    Failed,
}

impl ArtifactStatus {
    /// Durable statuses survive process restarts
    pub fn is_durable(self) -> bool {
        matches!(self, Self::Stored | Self::LocalPurged)
    }

    fn holds_local_path(self) -> bool {
        matches!(self, Self::StagedLocal | Self::Uploading)
    }
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Downloading => write!(f, "downloading"),
            Self::StagedLocal => write!(f, "staged_local"),
            Self::Uploading => write!(f, "uploading"),
            Self::Stored => write!(f, "stored"),
            Self::LocalPurged => write!(f, "local_purged"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One named model version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArtifact {
    identifier: String,
    display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    local_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_uri: Option<String>,
    labels: Labels,
    status: ArtifactStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    failure: Option<String>,
}

impl ModelArtifact {
    /// Reference a model by name; starts in `Absent`
    pub fn new(identifier: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            local_path: None,
            remote_uri: None,
            labels: Labels::new(),
            status: ArtifactStatus::Absent,
            failure: None,
        }
    }

    /// Rebuild a durable artifact from a registry record
    pub fn stored(
        identifier: impl Into<String>,
        display_name: impl Into<String>,
        remote_uri: impl Into<String>,
        labels: Labels,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            local_path: None,
            remote_uri: Some(remote_uri.into()),
            labels,
            status: ArtifactStatus::Stored,
            failure: None,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn local_path(&self) -> Option<&Path> {
        self.local_path.as_deref()
    }

    pub fn remote_uri(&self) -> Option<&str> {
        self.remote_uri.as_deref()
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn status(&self) -> ArtifactStatus {
        self.status
    }

    /// Reason recorded when the artifact entered `Failed`
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// `Absent -> Downloading`
    pub fn begin_download(&mut self) -> LifecycleResult<()> {
        self.expect_status(ArtifactStatus::Absent, ArtifactStatus::Downloading)?;
        self.status = ArtifactStatus::Downloading;
        Ok(())
    }

    /// `Downloading -> StagedLocal`
    pub fn mark_staged(&mut self, path: impl Into<PathBuf>) -> LifecycleResult<()> {
        self.expect_status(ArtifactStatus::Downloading, ArtifactStatus::StagedLocal)?;
        self.local_path = Some(path.into());
        self.status = ArtifactStatus::StagedLocal;
        Ok(())
    }

    /// `StagedLocal -> Uploading`
    ///
    /// Labels are fixed here; they are immutable once written.
    pub fn begin_upload(&mut self, labels: Labels) -> LifecycleResult<()> {
        self.expect_status(ArtifactStatus::StagedLocal, ArtifactStatus::Uploading)?;
        self.labels = labels;
        self.status = ArtifactStatus::Uploading;
        Ok(())
    }

    /// `Uploading -> Stored`
    pub fn mark_stored(&mut self, remote_uri: impl Into<String>) -> LifecycleResult<()> {
        self.expect_status(ArtifactStatus::Uploading, ArtifactStatus::Stored)?;
        self.local_path = None;
        self.remote_uri = Some(remote_uri.into());
        self.status = ArtifactStatus::Stored;
        Ok(())
    }

    /// `Stored -> LocalPurged`
    pub fn mark_purged(&mut self) -> LifecycleResult<()> {
        self.expect_status(ArtifactStatus::Stored, ArtifactStatus::LocalPurged)?;
        self.status = ArtifactStatus::LocalPurged;
        Ok(())
    }

    /// Any transient status -> `Failed`
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> LifecycleResult<()> {
        if self.status.is_durable() || self.status == ArtifactStatus::Failed {
            return Err(LifecycleError::InvalidTransition {
                from: self.status,
                to: ArtifactStatus::Failed,
            });
        }
        self.local_path = None;
        self.remote_uri = None;
        self.failure = Some(reason.into());
        self.status = ArtifactStatus::Failed;
        Ok(())
    }

    /// Fail unless the artifact is durable and has a registry URI
    pub fn require_durable(&self) -> LifecycleResult<&str> {
        match (self.status.is_durable(), self.remote_uri.as_deref()) {
            (true, Some(uri)) => Ok(uri),
            _ => Err(LifecycleError::InvalidState {
                name: self.display_name.clone(),
                expected: ArtifactStatus::Stored,
                found: self.status,
            }),
        }
    }

    fn expect_status(&self, from: ArtifactStatus, to: ArtifactStatus) -> LifecycleResult<()> {
        if self.status != from {
            return Err(LifecycleError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }

    /// Check the path/URI invariants
    pub fn is_consistent(&self) -> bool {
        self.local_path.is_some() == self.status.holds_local_path()
            && self.remote_uri.is_some() == self.status.is_durable()
    }
}
