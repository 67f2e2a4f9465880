use anyhow::Context;
use async_recursion::async_recursion;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::backend::Backend;
use crate::config::LocalConfig;
use crate::error::{Error, ErrorKind, Result, ResultExt};
use crate::storage::{PruneOutcome, PruneSummary, Storage};

/// Backend whose "remote" root is another directory on the same filesystem.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    backend: Backend,
}

impl LocalStorage {
    pub fn new(config: &LocalConfig) -> Result<Self> {
        Self::from_backend(Backend::new(&config.local_path, &config.remote_path)?)
    }

    /// Both roots live on the same filesystem here, so they must differ: copying a file onto
    /// itself would truncate it before it is read.
    pub fn from_backend(backend: Backend) -> Result<Self> {
        if backend.local_root() == backend.remote_root() {
            return Err(Error::msg(
                ErrorKind::Config,
                format!(
                    "local and remote path are the same directory: {:?}",
                    backend.local_root()
                ),
            ));
        }
        Ok(Self { backend })
    }

    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }
}

/// Streams `src` into `dst`, creating or truncating `dst`.
///
/// A missing source is reported as [`ErrorKind::NotFound`]. A failure mid-stream leaves whatever
/// was written to `dst` in place.
#[instrument]
pub async fn copy_file(src: &std::path::Path, dst: &std::path::Path) -> Result<u64> {
    let src_metadata = match tokio::fs::metadata(src).await {
        Ok(metadata) => metadata,
        Err(error) => {
            let kind = if error.kind() == std::io::ErrorKind::NotFound {
                ErrorKind::NotFound
            } else {
                ErrorKind::Io
            };
            return Err(error)
                .with_context(|| format!("source file {:?} is not accessible", &src))
                .with_kind(kind);
        }
    };
    let dst_metadata = tokio::fs::metadata(dst).await;
    if matches!(&dst_metadata, Ok(metadata) if is_same_file(&src_metadata, metadata)) {
        return Err(Error::msg(
            ErrorKind::Io,
            format!("{:?} and {:?} are the same file", &src, &dst),
        ));
    }
    tracing::debug!("opening 'src' for reading and 'dst' for writing");
    let mut reader = tokio::fs::File::open(src)
        .await
        .with_context(|| format!("failed opening {:?} for reading", &src))
        .with_kind(ErrorKind::Io)?;
    let mut writer = tokio::fs::File::create(dst)
        .await
        .with_context(|| format!("failed opening {:?} for writing", &dst))
        .with_kind(ErrorKind::Io)?;
    let bytes = tokio::io::copy(&mut reader, &mut writer)
        .await
        .with_context(|| format!("failed copying {:?} to {:?}", &src, &dst))
        .with_kind(ErrorKind::Io)?;
    writer
        .flush()
        .await
        .with_context(|| format!("failed flushing {:?}", &dst))
        .with_kind(ErrorKind::Io)?;
    Ok(bytes)
}

fn is_same_file(a: &std::fs::Metadata, b: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

/// Age limit for [`prune`], measured against a single instant taken when the prune starts.
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    now: std::time::SystemTime,
    max_age: std::time::Duration,
}

impl Retention {
    #[must_use]
    pub fn days(retention_days: u32) -> Self {
        Self::from_max_age(std::time::Duration::from_secs(
            u64::from(retention_days) * 24 * 60 * 60,
        ))
    }

    #[must_use]
    pub fn from_max_age(max_age: std::time::Duration) -> Self {
        Self {
            now: std::time::SystemTime::now(),
            max_age,
        }
    }

    /// True when `modified` lies strictly more than `max_age` before `now`. Files from the
    /// future are always kept.
    #[must_use]
    pub fn is_expired(&self, modified: std::time::SystemTime) -> bool {
        match self.now.duration_since(modified) {
            Ok(age) => age > self.max_age,
            Err(_) => false,
        }
    }
}

/// Deletes every regular file under `path` that `retention` considers expired.
///
/// Entries are inspected without following symlinks; directories, symlinks and other
/// non-regular files are never removed. The walk is sequential and stops at the first failure.
#[instrument(skip(retention))]
#[async_recursion]
pub async fn prune(path: &std::path::Path, retention: &Retention) -> Result<PruneSummary> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(error) => {
            let kind = if error.kind() == std::io::ErrorKind::NotFound {
                ErrorKind::NotFound
            } else {
                ErrorKind::Io
            };
            return Err(error)
                .with_context(|| format!("failed reading metadata from {:?}", &path))
                .with_kind(kind);
        }
    };
    if metadata.is_file() {
        let modified = metadata
            .modified()
            .with_context(|| format!("failed reading modification time of {:?}", &path))
            .with_kind(ErrorKind::Io)?;
        if !retention.is_expired(modified) {
            return Ok(PruneSummary {
                files_retained: 1,
                ..Default::default()
            });
        }
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("failed removing {:?}", &path))
            .with_kind(ErrorKind::Io)?;
        tracing::info!("removed {:?}", path);
        return Ok(PruneSummary {
            files_removed: 1,
            bytes_removed: metadata.len(),
            ..Default::default()
        });
    }
    if !metadata.is_dir() {
        tracing::debug!("skipping non-regular file {:?}", path);
        return Ok(PruneSummary::default());
    }
    tracing::debug!("visiting directory {:?}", path);
    let mut summary = PruneSummary {
        directories_visited: 1,
        ..Default::default()
    };
    let mut entries = tokio::fs::read_dir(path)
        .await
        .with_context(|| format!("cannot open directory {:?} for reading", &path))
        .with_kind(ErrorKind::Io)?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed traversing directory {:?}", &path))
        .with_kind(ErrorKind::Io)?
    {
        summary = summary + prune(&entry.path(), retention).await?;
    }
    Ok(summary)
}

#[async_trait::async_trait]
impl Storage for LocalStorage {
    #[instrument(skip(self))]
    async fn copy(&self, file_name: &str) -> Result<()> {
        let src = self.backend.local_path(file_name)?;
        let dst = self.backend.remote_path(file_name)?;
        let bytes = copy_file(&src, &dst).await?;
        tracing::info!("copied {:?} to {:?} ({})", &src, &dst, bytesize::ByteSize(bytes));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn copy_from(&self, file_name: &str) -> Result<()> {
        let src = self.backend.remote_path(file_name)?;
        let dst = self.backend.local_path(file_name)?;
        let bytes = copy_file(&src, &dst).await?;
        tracing::info!("copied {:?} to {:?} ({})", &src, &dst, bytesize::ByteSize(bytes));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn prune(&self, retention_days: u32) -> Result<PruneOutcome> {
        let retention = Retention::days(retention_days);
        let summary = prune(self.backend.remote_root(), &retention).await?;
        tracing::info!(
            "pruned {} file(s) older than {} day(s) from {:?}",
            summary.files_removed,
            retention_days,
            self.backend.remote_root()
        );
        Ok(PruneOutcome::Pruned(summary))
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod local_tests {
    use crate::error::ErrorKind;
    use crate::testutils;
    use std::time::{Duration, SystemTime};
    use tracing_test::traced_test;

    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn set_mtime(path: &std::path::Path, mtime: SystemTime) {
        filetime::set_file_mtime(path, filetime::FileTime::from_system_time(mtime)).unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn copy_report_to_empty_remote() -> Result<(), anyhow::Error> {
        let (local, remote) = testutils::setup_roots().await?;
        tokio::fs::write(local.join("report.csv"), "id,total\n1,42\n").await?;
        let storage = LocalStorage::new(&LocalConfig {
            local_path: local.clone(),
            remote_path: remote.clone(),
        })?;
        storage.copy("report.csv").await?;
        assert_eq!(
            tokio::fs::read(remote.join("report.csv")).await?,
            tokio::fs::read(local.join("report.csv")).await?
        );
        assert_eq!(storage.name(), "local");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn round_trip_into_empty_local_root() -> Result<(), anyhow::Error> {
        let (local, remote) = testutils::setup_roots().await?;
        let payload: Vec<u8> = (0..=255u8).cycle().take(200_000).collect();
        tokio::fs::write(local.join("blob.bin"), &payload).await?;
        let storage = LocalStorage::from_backend(Backend::new(&local, &remote)?)?;
        storage.copy("blob.bin").await?;
        tokio::fs::remove_file(local.join("blob.bin")).await?;
        storage.copy_from("blob.bin").await?;
        assert_eq!(tokio::fs::read(local.join("blob.bin")).await?, payload);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn repeated_copy_overwrites_remote() -> Result<(), anyhow::Error> {
        let (local, remote) = testutils::setup_roots().await?;
        let storage = LocalStorage::from_backend(Backend::new(&local, &remote)?)?;
        // a longer stale copy must be truncated, not partially overwritten
        tokio::fs::write(remote.join("a.txt"), "stale contents that are longer").await?;
        tokio::fs::write(local.join("a.txt"), "fresh").await?;
        storage.copy("a.txt").await?;
        storage.copy("a.txt").await?;
        assert_eq!(tokio::fs::read_to_string(remote.join("a.txt")).await?, "fresh");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_source_is_not_found() -> Result<(), anyhow::Error> {
        let (local, remote) = testutils::setup_roots().await?;
        let storage = LocalStorage::from_backend(Backend::new(&local, &remote)?)?;
        let err = storage.copy("missing.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!remote.join("missing.txt").exists());
        let err = storage.copy_from("missing.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!local.join("missing.txt").exists());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn missing_destination_directory_is_io_error() -> Result<(), anyhow::Error> {
        let (local, remote) = testutils::setup_roots().await?;
        tokio::fs::create_dir(local.join("daily")).await?;
        tokio::fs::write(local.join("daily").join("a.txt"), "a").await?;
        let storage = LocalStorage::from_backend(Backend::new(&local, &remote)?)?;
        let err = storage.copy("daily/a.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn prune_respects_retention_boundary() -> Result<(), anyhow::Error> {
        let (local, remote) = testutils::setup_roots().await?;
        let margin = Duration::from_secs(60 * 60);
        let now = SystemTime::now();
        let old = remote.join("old.tar.gz");
        let young = remote.join("young.tar.gz");
        tokio::fs::write(&old, "old").await?;
        tokio::fs::write(&young, "young").await?;
        set_mtime(&old, now - 7 * DAY - margin);
        set_mtime(&young, now - 7 * DAY + margin);
        let storage = LocalStorage::from_backend(Backend::new(&local, &remote)?)?;
        let outcome = storage.prune(7).await?;
        assert!(!old.exists());
        assert!(young.exists());
        let summary = outcome.summary().copied().unwrap();
        assert_eq!(summary.files_removed, 1);
        assert_eq!(summary.bytes_removed, 3);
        assert_eq!(summary.files_retained, 1);
        Ok(())
    }

    #[test]
    fn retention_is_strict() {
        let retention = Retention::from_max_age(DAY);
        let now = retention.now;
        assert!(!retention.is_expired(now - DAY));
        assert!(retention.is_expired(now - DAY - Duration::from_millis(1)));
        assert!(!retention.is_expired(now + DAY));
    }

    #[tokio::test]
    #[traced_test]
    async fn prune_walks_subdirectories_and_keeps_them() -> Result<(), anyhow::Error> {
        let (local, remote) = testutils::setup_roots().await?;
        let ancient = SystemTime::now() - 365 * DAY;
        let nested = remote.join("2023").join("january");
        tokio::fs::create_dir_all(&nested).await?;
        tokio::fs::write(nested.join("dump.sql"), "dump").await?;
        tokio::fs::write(remote.join("2023").join("notes.txt"), "n").await?;
        set_mtime(&nested.join("dump.sql"), ancient);
        set_mtime(&remote.join("2023").join("notes.txt"), ancient);
        set_mtime(&nested, ancient);
        set_mtime(&remote.join("2023"), ancient);
        tokio::fs::symlink(nested.join("dump.sql"), remote.join("latest")).await?;
        let storage = LocalStorage::from_backend(Backend::new(&local, &remote)?)?;
        let outcome = storage.prune(30).await?;
        assert!(nested.is_dir());
        assert!(remote.join("2023").is_dir());
        assert!(!nested.join("dump.sql").exists());
        assert!(!remote.join("2023").join("notes.txt").exists());
        // the symlink itself is not a regular file and survives, now dangling
        assert!(tokio::fs::symlink_metadata(remote.join("latest")).await.is_ok());
        let summary = outcome.summary().copied().unwrap();
        assert_eq!(summary.files_removed, 2);
        assert_eq!(summary.directories_visited, 3);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn prune_zero_days_keeps_fresh_files() -> Result<(), anyhow::Error> {
        let (local, remote) = testutils::setup_roots().await?;
        tokio::fs::write(remote.join("future.txt"), "f").await?;
        set_mtime(&remote.join("future.txt"), SystemTime::now() + DAY);
        let storage = LocalStorage::from_backend(Backend::new(&local, &remote)?)?;
        storage.prune(0).await?;
        assert!(remote.join("future.txt").exists());
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn same_directory_for_both_roots_is_rejected() -> Result<(), anyhow::Error> {
        let (local, _) = testutils::setup_roots().await?;
        let err = LocalStorage::new(&LocalConfig {
            local_path: local.clone(),
            remote_path: local.join("."),
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn copy_onto_itself_keeps_contents() -> Result<(), anyhow::Error> {
        let (local, remote) = testutils::setup_roots().await?;
        let alias = remote.join("alias");
        tokio::fs::symlink(&local, &alias).await?;
        tokio::fs::write(local.join("a.txt"), "precious").await?;
        // the remote root reaches the local root through a symlink
        let storage = LocalStorage::from_backend(Backend::new(&local, &alias)?)?;
        let err = storage.copy("a.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(tokio::fs::read_to_string(local.join("a.txt")).await?, "precious");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn prune_missing_remote_root_fails() -> Result<(), anyhow::Error> {
        let (local, remote) = testutils::setup_roots().await?;
        let storage =
            LocalStorage::from_backend(Backend::new(&local, remote.join("does-not-exist"))?)?;
        let err = storage.prune(1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }
}
