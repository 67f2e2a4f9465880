//! Network storage backends for rstow: FTP, SSH/SCP and Azure blob storage.
//!
//! FTP and SSH backends open a fresh connection for every `copy`/`copy_from` and always tear it
//! down before returning. The Azure backend keeps one authenticated client for its whole
//! lifetime. None of the network backends can prune; they report
//! [`common::PruneOutcome::Unsupported`].
//!
//! [`open`] builds whichever backend a [`common::StorageConfig`] selects.

use anyhow::Context;
use common::{ErrorKind, ResultExt};

pub mod azure;
pub mod ftp;
pub mod ssh;

pub use azure::AzureStorage;
pub use ftp::FtpStorage;
pub use ssh::SshStorage;

/// Constructs the backend selected by `config`.
///
/// For FTP this dials and authenticates, so an unreachable server fails here rather than on the
/// first transfer.
pub async fn open(config: &common::StorageConfig) -> common::Result<Box<dyn common::Storage>> {
    let storage: Box<dyn common::Storage> = match config {
        common::StorageConfig::Local(config) => Box::new(common::LocalStorage::new(config)?),
        common::StorageConfig::Ftp(config) => Box::new(FtpStorage::connect(config).await?),
        common::StorageConfig::Ssh(config) => Box::new(SshStorage::new(config)?),
        common::StorageConfig::Azure(config) => Box::new(AzureStorage::new(config)?),
    };
    tracing::debug!("opened {} storage", storage.name());
    Ok(storage)
}

/// Runs a blocking transport call on the blocking thread pool and waits for it.
pub(crate) async fn run_blocking<T, F>(func: F) -> common::Result<T>
where
    F: FnOnce() -> common::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(func))
        .await
        .context("blocking transfer task failed")
        .with_kind(ErrorKind::Transfer)?
}

/// `host:port` suitable for socket address resolution; IPv6 literals are bracketed.
pub(crate) fn host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

pub(crate) fn prune_unsupported(name: &str) -> common::PruneOutcome {
    tracing::info!("{name}: deleting old files from a remote server is not supported");
    common::PruneOutcome::Unsupported
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn open_selects_backend_by_config() -> anyhow::Result<()> {
        let local = common::StorageConfig::from_toml_str(
            r#"
            backend = "local"
            local_path = "/var/backups"
            remote_path = "/mnt/backups"
            "#,
        )?;
        assert_eq!(open(&local).await?.name(), "local");
        let azure = common::StorageConfig::from_toml_str(
            r#"
            backend = "azure"
            account_name = "acme"
            account_key = "c2VjcmV0LWtleQ=="
            container_name = "backups"
            local_path = "/tmp"
            remote_path = "daily"
            "#,
        )?;
        assert_eq!(open(&azure).await?.name(), "azure");
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn open_reports_construction_errors() -> anyhow::Result<()> {
        let ssh = common::StorageConfig::from_toml_str(
            r#"
            backend = "ssh"
            host = "backup.example.com"
            user = "backup"
            local_path = "/tmp"
            remote_path = "/backups"
            "#,
        )?;
        let err = match open(&ssh).await {
            Ok(storage) => panic!("expected credential error, opened {}", storage.name()),
            Err(err) => err,
        };
        assert_eq!(err.kind(), ErrorKind::Credentials);
        Ok(())
    }

    #[test]
    fn host_port_brackets_ipv6_literals() {
        assert_eq!(host_port("ftp.example.com", 21), "ftp.example.com:21");
        assert_eq!(host_port("10.0.0.7", 22), "10.0.0.7:22");
        assert_eq!(host_port("::1", 2121), "[::1]:2121");
        assert_eq!(host_port("[fe80::1]", 22), "[fe80::1]:22");
        use std::net::ToSocketAddrs;
        let resolved: Vec<_> = host_port("::1", 2121).to_socket_addrs().unwrap().collect();
        assert_eq!(resolved, vec!["[::1]:2121".parse().unwrap()]);
    }

    #[tokio::test]
    async fn run_blocking_returns_closure_result() {
        assert_eq!(run_blocking(|| Ok(5)).await.unwrap(), 5);
        let err = run_blocking(|| -> common::Result<()> {
            Err(common::Error::msg(ErrorKind::Io, "disk on fire"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
