use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use common::{
    Backend, Error, ErrorKind, PruneOutcome, Result, ResultExt, Secret, SshConfig, Storage,
};
use tracing::instrument;

/// Permission bits given to uploaded files.
pub const REMOTE_FILE_MODE: i32 = 0o655;

/// How an SSH session authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshAuth {
    /// Private key file that exists on disk.
    PublicKey(PathBuf),
    Password(Secret),
}

impl SshAuth {
    /// Prefers the identity file when it exists, otherwise falls back to the password.
    pub fn select(config: &SshConfig) -> Result<Self> {
        if let Some(identity_file) = &config.identity_file {
            if identity_file.is_file() {
                return Ok(SshAuth::PublicKey(identity_file.clone()));
            }
            tracing::debug!(
                "identity file {:?} does not exist, falling back to password authentication",
                identity_file
            );
        }
        match &config.password {
            Some(password) if !password.is_empty() => Ok(SshAuth::Password(password.clone())),
            _ => Err(Error::msg(
                ErrorKind::Credentials,
                "ssh password required when no identity file is available",
            )),
        }
    }
}

#[derive(Debug, Clone)]
struct SshEndpoint {
    address: String,
    user: String,
    auth: SshAuth,
}

/// Authenticated session, disconnected when dropped.
struct SshSession {
    session: ssh2::Session,
}

impl SshSession {
    /// Host keys are not verified.
    fn open(endpoint: &SshEndpoint) -> Result<Self> {
        tracing::debug!("connecting to SSH server {}", &endpoint.address);
        let tcp = std::net::TcpStream::connect(&endpoint.address)
            .with_context(|| format!("failed to connect to SSH server {}", &endpoint.address))
            .with_kind(ErrorKind::Connect)?;
        let mut session = ssh2::Session::new()
            .context("failed to create ssh session")
            .with_kind(ErrorKind::Connect)?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .with_context(|| format!("ssh handshake with {} failed", &endpoint.address))
            .with_kind(ErrorKind::Connect)?;
        let guard = SshSession { session };
        let authenticated = match &endpoint.auth {
            SshAuth::PublicKey(identity_file) => guard
                .session
                .userauth_pubkey_file(&endpoint.user, None, identity_file, None)
                .with_context(|| {
                    format!(
                        "key authentication as {:?} with {:?} failed",
                        &endpoint.user, identity_file
                    )
                }),
            SshAuth::Password(password) => guard
                .session
                .userauth_password(&endpoint.user, password.expose())
                .with_context(|| format!("password authentication as {:?} failed", &endpoint.user)),
        };
        authenticated.with_kind(ErrorKind::Authenticate)?;
        if !guard.session.authenticated() {
            return Err(Error::msg(
                ErrorKind::Authenticate,
                format!("server did not accept credentials for {:?}", &endpoint.user),
            ));
        }
        Ok(guard)
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        match self.session.disconnect(None, "rstow: done", None) {
            Ok(()) => tracing::debug!("SSH session closed"),
            Err(error) => tracing::warn!("failed to close SSH session: {:#}", &error),
        }
    }
}

fn close_channel(channel: &mut ssh2::Channel) -> Result<(), ssh2::Error> {
    channel.send_eof()?;
    channel.wait_eof()?;
    channel.close()?;
    channel.wait_close()
}

/// Waits for the remote side to acknowledge the end of an SCP transfer.
fn finish_channel(mut channel: ssh2::Channel, remote: &str) -> Result<()> {
    close_channel(&mut channel)
        .with_context(|| format!("failed to close SCP channel for {remote}"))
        .with_kind(ErrorKind::Close)
}

/// SSH backend transferring files with SCP.
///
/// Construction only selects credentials; each `copy`/`copy_from` opens its own session and
/// disconnects it before returning.
pub struct SshStorage {
    backend: Backend,
    endpoint: SshEndpoint,
}

impl SshStorage {
    pub fn new(config: &SshConfig) -> Result<Self> {
        let backend = Backend::new(&config.local_path, &config.remote_path)?;
        let auth = SshAuth::select(config)?;
        Ok(Self {
            backend,
            endpoint: SshEndpoint {
                address: crate::host_port(&config.host, config.port),
                user: config.user.clone(),
                auth,
            },
        })
    }

    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    #[must_use]
    pub fn auth(&self) -> &SshAuth {
        &self.endpoint.auth
    }
}

#[async_trait::async_trait]
impl Storage for SshStorage {
    #[instrument(skip(self))]
    async fn copy(&self, file_name: &str) -> Result<()> {
        let src = self.backend.local_path(file_name)?;
        let dst = self.backend.remote_location(file_name)?;
        let endpoint = self.endpoint.clone();
        let bytes = crate::run_blocking(move || {
            let session = SshSession::open(&endpoint)?;
            let mut file = std::fs::File::open(&src)
                .with_context(|| format!("failed to open file {:?}", &src))
                .with_kind(ErrorKind::Io)?;
            let size = file
                .metadata()
                .with_context(|| format!("failed reading metadata from {:?}", &src))
                .with_kind(ErrorKind::Io)?
                .len();
            let mut channel = session
                .session
                .scp_send(Path::new(&dst), REMOTE_FILE_MODE, size, None)
                .with_context(|| format!("failed to start copying file to remote {dst}"))
                .with_kind(ErrorKind::Transfer)?;
            std::io::copy(&mut file, &mut channel)
                .with_context(|| format!("failed to copy file {:?} to remote {}", &src, &dst))
                .with_kind(ErrorKind::Transfer)?;
            finish_channel(channel, &dst)?;
            Ok(size)
        })
        .await?;
        tracing::info!("uploaded {:?} ({} bytes)", file_name, bytes);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn copy_from(&self, file_name: &str) -> Result<()> {
        let src = self.backend.remote_location(file_name)?;
        let dst = self.backend.local_path(file_name)?;
        let endpoint = self.endpoint.clone();
        let bytes = crate::run_blocking(move || {
            let session = SshSession::open(&endpoint)?;
            let (channel, stat) = session
                .session
                .scp_recv(Path::new(&src))
                .with_context(|| format!("failed to start copying remote file {src}"))
                .with_kind(ErrorKind::Transfer)?;
            let mut file = std::fs::File::create(&dst)
                .with_context(|| format!("failed to create local file {:?}", &dst))
                .with_kind(ErrorKind::Io)?;
            let mut limited = channel.take(stat.size());
            let bytes = std::io::copy(&mut limited, &mut file)
                .with_context(|| format!("failed to copy remote file {} to {:?}", &src, &dst))
                .with_kind(ErrorKind::Transfer)?;
            if bytes != stat.size() {
                return Err(Error::msg(
                    ErrorKind::Transfer,
                    format!(
                        "remote file {} ended after {} of {} bytes",
                        &src,
                        bytes,
                        stat.size()
                    ),
                ));
            }
            finish_channel(limited.into_inner(), &src)?;
            Ok(bytes)
        })
        .await?;
        tracing::info!("downloaded {:?} ({} bytes)", file_name, bytes);
        Ok(())
    }

    async fn prune(&self, _retention_days: u32) -> Result<PruneOutcome> {
        Ok(crate::prune_unsupported(self.name()))
    }

    fn name(&self) -> &'static str {
        "ssh"
    }
}
