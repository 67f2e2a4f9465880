use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use common::{Backend, ErrorKind, FtpConfig, PruneOutcome, Result, ResultExt, Secret, Storage};
use suppaftp::FtpStream;
use suppaftp::types::FileType;
use tracing::instrument;

/// Dial timeout for the control connection; the only timeout applied by this backend.
pub const CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Debug, Clone)]
struct FtpEndpoint {
    address: String,
    user: String,
    password: Secret,
}

/// Tries every resolved address in order, each with [`CONNECT_TIMEOUT`], and returns the first
/// control connection that succeeds.
fn dial(address: &str, addrs: impl IntoIterator<Item = SocketAddr>) -> Result<FtpStream> {
    let mut last_error = anyhow::anyhow!("FTP server {address} has no address");
    for addr in addrs {
        tracing::debug!("connecting to FTP server {} ({})", address, addr);
        match FtpStream::connect_timeout(addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                tracing::debug!("connecting to {} failed: {}", addr, &error);
                last_error = error.into();
            }
        }
    }
    Err(last_error)
        .with_context(|| format!("failed to connect to FTP server {address}"))
        .with_kind(ErrorKind::Connect)
}

impl FtpEndpoint {
    /// Dials the server, logs in and switches to binary transfers.
    fn connect(&self) -> Result<FtpSession> {
        let addrs = self
            .address
            .to_socket_addrs()
            .with_context(|| format!("failed resolving FTP server {}", &self.address))
            .with_kind(ErrorKind::Connect)?;
        let stream = dial(&self.address, addrs)?;
        let mut session = FtpSession { stream };
        session
            .stream()
            .login(self.user.as_str(), self.password.expose())
            .with_context(|| format!("failed to log in to FTP server as {:?}", &self.user))
            .with_kind(ErrorKind::Authenticate)?;
        session
            .stream()
            .transfer_type(FileType::Binary)
            .context("failed to switch FTP transfer type to binary")
            .with_kind(ErrorKind::Connect)?;
        Ok(session)
    }
}

/// Control connection that is terminated with `QUIT` when dropped.
struct FtpSession {
    stream: FtpStream,
}

impl FtpSession {
    fn stream(&mut self) -> &mut FtpStream {
        &mut self.stream
    }
}

impl Drop for FtpSession {
    fn drop(&mut self) {
        match self.stream.quit() {
            Ok(()) => tracing::debug!("FTP connection closed"),
            Err(error) => tracing::warn!("failed to close FTP connection: {:#}", &error),
        }
    }
}

/// FTP backend.
///
/// Construction dials and authenticates, and keeps that connection for the first operation.
/// Every `copy`/`copy_from` terminates its connection before returning, so later operations dial
/// again. An unused construction-time connection is closed when the backend is dropped.
pub struct FtpStorage {
    backend: Backend,
    endpoint: FtpEndpoint,
    idle: Mutex<Option<FtpSession>>,
}

impl FtpStorage {
    pub async fn connect(config: &FtpConfig) -> Result<Self> {
        let backend = Backend::new(&config.local_path, &config.remote_path)?;
        let endpoint = FtpEndpoint {
            address: crate::host_port(&config.host, config.port),
            user: config.user.clone(),
            password: config.password.clone(),
        };
        let session = crate::run_blocking({
            let endpoint = endpoint.clone();
            move || endpoint.connect()
        })
        .await?;
        tracing::info!("connected to FTP server {}", &endpoint.address);
        Ok(Self {
            backend,
            endpoint,
            idle: Mutex::new(Some(session)),
        })
    }

    #[must_use]
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Takes the connection left by construction, if it was not used yet.
    fn take_idle(&self) -> Option<FtpSession> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn session(endpoint: &FtpEndpoint, idle: Option<FtpSession>) -> Result<FtpSession> {
        match idle {
            Some(session) => Ok(session),
            None => endpoint.connect(),
        }
    }
}

#[async_trait::async_trait]
impl Storage for FtpStorage {
    #[instrument(skip(self))]
    async fn copy(&self, file_name: &str) -> Result<()> {
        let src = self.backend.local_path(file_name)?;
        let dst = self.backend.remote_location(file_name)?;
        let endpoint = self.endpoint.clone();
        let idle = self.take_idle();
        let bytes = crate::run_blocking(move || {
            let mut session = Self::session(&endpoint, idle)?;
            let mut file = std::fs::File::open(&src)
                .with_context(|| format!("failed to open file {:?}", &src))
                .with_kind(ErrorKind::Io)?;
            session
                .stream()
                .put_file(dst.as_str(), &mut file)
                .with_context(|| format!("failed to upload file {:?} to {}", &src, &dst))
                .with_kind(ErrorKind::Transfer)
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
        let idle = self.take_idle();
        let bytes = crate::run_blocking(move || {
            let mut session = Self::session(&endpoint, idle)?;
            let mut reader = session
                .stream()
                .retr_as_stream(src.as_str())
                .with_context(|| format!("failed to retrieve file {}", &src))
                .with_kind(ErrorKind::Transfer)?;
            let mut file = std::fs::File::create(&dst)
                .with_context(|| format!("failed to create local file {:?}", &dst))
                .with_kind(ErrorKind::Io)?;
            let bytes = std::io::copy(&mut reader, &mut file)
                .with_context(|| format!("failed to copy data to local file {:?}", &dst))
                .with_kind(ErrorKind::Transfer)?;
            session
                .stream()
                .finalize_retr_stream(reader)
                .with_context(|| format!("failed to finish retrieving {}", &src))
                .with_kind(ErrorKind::Close)?;
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
        "ftp"
    }
}
