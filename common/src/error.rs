//! Error type shared by every storage backend.

/// Step at which a storage operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorKind {
    #[strum(to_string = "configuration error")]
    Config,
    #[strum(to_string = "credential error")]
    Credentials,
    #[strum(to_string = "invalid file name")]
    InvalidFileName,
    #[strum(to_string = "not found")]
    NotFound,
    #[strum(to_string = "connection failed")]
    Connect,
    #[strum(to_string = "authentication failed")]
    Authenticate,
    #[strum(to_string = "i/o error")]
    Io,
    #[strum(to_string = "transfer failed")]
    Transfer,
    #[strum(to_string = "failed to close connection")]
    Close,
}

/// Error returned by storage operations.
///
/// Carries the failing step as an [`ErrorKind`] together with the full context chain.
///
/// # Logging Convention
/// The Display implementation shows the kind followed by the full error chain:
/// ```ignore
/// tracing::error!("copy failed: {}", &error);   // "not found: source ... : No such file"
/// tracing::error!("copy failed: {:#}", &error); // same
/// ```
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {source:#}")]
pub struct Error {
    kind: ErrorKind,
    #[source]
    source: anyhow::Error,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, source: impl Into<anyhow::Error>) -> Self {
        Error {
            kind,
            source: source.into(),
        }
    }

    /// Builds an error from a plain message, for failures without an underlying cause.
    #[must_use]
    pub fn msg<M>(kind: ErrorKind, message: M) -> Self
    where
        M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        Error {
            kind,
            source: anyhow::Error::msg(message),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attaches an [`ErrorKind`] to any error convertible into [`anyhow::Error`].
///
/// Meant to follow `anyhow::Context::with_context`:
/// ```ignore
/// tokio::fs::File::open(&path)
///     .await
///     .with_context(|| format!("failed opening {:?} for reading", &path))
///     .with_kind(ErrorKind::Io)?;
/// ```
pub trait ResultExt<T> {
    fn with_kind(self, kind: ErrorKind) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn with_kind(self, kind: ErrorKind) -> Result<T> {
        self.map_err(|err| Error::new(kind, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn display_shows_kind_and_chain() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "No such file or directory",
        ));
        let err = res
            .with_context(|| "failed opening \"a.txt\" for reading")
            .with_kind(ErrorKind::Io)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(
            err.to_string(),
            "i/o error: failed opening \"a.txt\" for reading: No such file or directory"
        );
    }

    #[test]
    fn msg_keeps_kind() {
        let err = Error::msg(ErrorKind::Credentials, "ssh password required");
        assert_eq!(err.kind(), ErrorKind::Credentials);
        assert_eq!(err.to_string(), "credential error: ssh password required");
    }
}
