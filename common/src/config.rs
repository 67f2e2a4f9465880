//! Configuration types for backends and for runtime and output settings

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::{ErrorKind, Result, ResultExt};

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
}

/// Password or key material; never shown by `Debug`.
#[derive(Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("\"***\"")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Secret(value.to_string())
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct LocalConfig {
    pub local_path: PathBuf,
    pub remote_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct FtpConfig {
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    pub user: String,
    pub password: Secret,
    pub local_path: PathBuf,
    pub remote_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    /// Used when `identity_file` is unset or does not exist.
    #[serde(default)]
    pub password: Option<Secret>,
    /// Private key file; preferred over the password when it exists.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    pub local_path: PathBuf,
    pub remote_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct AzureConfig {
    pub account_name: String,
    pub account_key: Secret,
    pub container_name: String,
    pub local_path: PathBuf,
    pub remote_path: PathBuf,
}

fn default_ftp_port() -> u16 {
    21
}

fn default_ssh_port() -> u16 {
    22
}

/// Backend selection plus that backend's settings, tagged by the `backend` key.
///
/// ```toml
/// backend = "ftp"
/// host = "ftp.example.com"
/// user = "backup"
/// password = "secret"
/// local_path = "/var/backups"
/// remote_path = "/backups"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Local(LocalConfig),
    Ftp(FtpConfig),
    Ssh(SshConfig),
    Azure(AzureConfig),
}

impl StorageConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .context("invalid storage configuration")
            .with_kind(ErrorKind::Config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading configuration file {path:?}"))
            .with_kind(ErrorKind::Config)?;
        toml::from_str(&contents)
            .with_context(|| format!("invalid storage configuration in {path:?}"))
            .with_kind(ErrorKind::Config)
    }

    /// Label of the backend this configuration selects.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        match self {
            StorageConfig::Local(_) => "local",
            StorageConfig::Ftp(_) => "ftp",
            StorageConfig::Ssh(_) => "ssh",
            StorageConfig::Azure(_) => "azure",
        }
    }
}
