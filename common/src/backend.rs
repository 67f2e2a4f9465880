//! Local and remote root paths shared by every storage backend.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, ErrorKind, Result};

/// Root-path pair a backend resolves file names against.
///
/// Every concrete backend holds one of these; a file name given to `copy`/`copy_from` is joined
/// with `local_root` on the local side and with `remote_root` on the remote side, so the same
/// relative name is used in both places.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    local_root: PathBuf,
    remote_root: PathBuf,
}

impl Backend {
    pub fn new(local_root: impl Into<PathBuf>, remote_root: impl Into<PathBuf>) -> Result<Self> {
        let local_root = local_root.into();
        let remote_root = remote_root.into();
        if local_root.as_os_str().is_empty() {
            return Err(Error::msg(ErrorKind::Config, "local path must not be empty"));
        }
        if remote_root.as_os_str().is_empty() {
            return Err(Error::msg(ErrorKind::Config, "remote path must not be empty"));
        }
        Ok(Self {
            local_root,
            remote_root,
        })
    }

    #[must_use]
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    #[must_use]
    pub fn remote_root(&self) -> &Path {
        &self.remote_root
    }

    pub fn local_path(&self, file_name: &str) -> Result<PathBuf> {
        Ok(self.local_root.join(relative_name(file_name)?))
    }

    pub fn remote_path(&self, file_name: &str) -> Result<PathBuf> {
        Ok(self.remote_root.join(relative_name(file_name)?))
    }

    /// Remote path rendered as a `/`-separated string, as expected by FTP, SCP and blob names.
    pub fn remote_location(&self, file_name: &str) -> Result<String> {
        Ok(self.remote_path(file_name)?.to_string_lossy().into_owned())
    }
}

/// Validates a caller-supplied file name and returns it as a path relative to a root.
///
/// Leading separators are dropped so that `"/a.txt"` still resolves under the root. Names that
/// are empty or that climb out of the root with `..` are rejected.
fn relative_name(file_name: &str) -> Result<&Path> {
    let trimmed = file_name.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(Error::msg(
            ErrorKind::InvalidFileName,
            format!("{file_name:?} does not name a file"),
        ));
    }
    let path = Path::new(trimmed);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::msg(
                    ErrorKind::InvalidFileName,
                    format!("{file_name:?} must stay within the root directory"),
                ));
            }
        }
    }
    Ok(path)
}
