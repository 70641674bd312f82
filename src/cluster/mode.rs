//! Data directory mode detection.
//!
//! A data directory remembers the role it was initialized for through a marker
//! child: `member` or `proxy`. Anything else is tolerated with a warning so that
//! newer or older layouts do not block startup.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Marker child created by a member server.
pub const MEMBER_MARKER: &str = "member";
/// Marker child created by a proxy.
pub const PROXY_MARKER: &str = "proxy";

/// The role a data directory was previously initialized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirState {
    Empty,
    Member,
    Proxy,
}

impl fmt::Display for DirState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirState::Empty => write!(f, "empty"),
            DirState::Member => write!(f, "member"),
            DirState::Proxy => write!(f, "proxy"),
        }
    }
}

/// Classification of one child of the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirEntry {
    Member,
    Proxy,
    Unknown(String),
}

impl DirEntry {
    pub fn classify(name: &str) -> Self {
        match name {
            MEMBER_MARKER => DirEntry::Member,
            PROXY_MARKER => DirEntry::Proxy,
            other => DirEntry::Unknown(other.to_string()),
        }
    }
}

/// Errors that make a data directory unusable.
#[derive(Debug, Error)]
pub enum ModeError {
    #[error("error listing data dir {}: {source}", .dir.display())]
    ReadDir {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid data dir {}: both member and proxy directories exist", .0.display())]
    Conflict(PathBuf),
}

/// Determine which role `dir` was initialized for.
///
/// A missing directory is `Empty`. This never touches the filesystem beyond
/// listing the directory.
pub fn resolve_dir_state(dir: &Path) -> Result<DirState, ModeError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(DirState::Empty),
        Err(source) => {
            return Err(ModeError::ReadDir {
                dir: dir.to_path_buf(),
                source,
            })
        }
    };

    let (mut member, mut proxy) = (false, false);
    for entry in entries {
        let entry = entry.map_err(|source| ModeError::ReadDir {
            dir: dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name().to_string_lossy().into_owned();

        match DirEntry::classify(&name) {
            DirEntry::Member => member = true,
            DirEntry::Proxy => proxy = true,
            DirEntry::Unknown(name) => {
                tracing::warn!(
                    entry = %name,
                    data_dir = %dir.display(),
                    "Found unexpected file/dir under data dir (ignore this if you are upgrading)"
                );
            }
        }
    }

    match (member, proxy) {
        (true, true) => Err(ModeError::Conflict(dir.to_path_buf())),
        (true, false) => Ok(DirState::Member),
        (false, true) => Ok(DirState::Proxy),
        (false, false) => Ok(DirState::Empty),
    }
}
