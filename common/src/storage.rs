//! The storage contract every backend implements.

use crate::error::Result;

/// Moves named files between a local root and a remote root.
///
/// Callers hold backends as `Box<dyn Storage>` and never depend on a concrete type. Each call
/// runs to completion before returning: there is no retry, no background work and no rollback
/// of partially written files.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Uploads `file_name` from the local root to the same relative path under the remote root.
    async fn copy(&self, file_name: &str) -> Result<()>;

    /// Downloads `file_name` from the remote root to the same relative path under the local root.
    async fn copy_from(&self, file_name: &str) -> Result<()>;

    /// Deletes regular files under the remote root last modified more than `retention_days`
    /// days ago.
    ///
    /// Backends that cannot prune return [`PruneOutcome::Unsupported`] rather than an error.
    async fn prune(&self, retention_days: u32) -> Result<PruneOutcome>;

    /// Fixed label of the backend: `"local"`, `"ftp"`, `"ssh"` or `"azure"`.
    fn name(&self) -> &'static str;
}

/// Result of a successful [`Storage::prune`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneOutcome {
    Pruned(PruneSummary),
    /// The backend does not implement pruning; nothing was deleted.
    Unsupported,
}

impl PruneOutcome {
    #[must_use]
    pub fn is_supported(&self) -> bool {
        matches!(self, PruneOutcome::Pruned(_))
    }

    #[must_use]
    pub fn summary(&self) -> Option<&PruneSummary> {
        match self {
            PruneOutcome::Pruned(summary) => Some(summary),
            PruneOutcome::Unsupported => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub files_removed: usize,
    pub bytes_removed: u64,
    pub files_retained: usize,
    pub directories_visited: usize,
}

impl std::ops::Add for PruneSummary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            files_removed: self.files_removed + other.files_removed,
            bytes_removed: self.bytes_removed + other.bytes_removed,
            files_retained: self.files_retained + other.files_retained,
            directories_visited: self.directories_visited + other.directories_visited,
        }
    }
}

impl std::fmt::Display for PruneSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "files removed: {}\n\
            bytes removed: {}\n\
            files retained: {}\n\
            directories visited: {}",
            self.files_removed,
            bytesize::ByteSize(self.bytes_removed),
            self.files_retained,
            self.directories_visited,
        )
    }
}
