//! Durable record of the proxy's peer URLs.
//!
//! `<dir>/proxy/cluster` holds `{"PeerURLs": [...]}`. Writes go to
//! `cluster.bak` first, are fsynced, then renamed over the canonical file, so
//! the canonical file is always a complete record.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CLUSTER_FILE: &str = "cluster";
const TEMP_SUFFIX: &str = "bak";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to encode cluster record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to rename {from:?} to {to:?}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to sync directory {path:?}: {source}")]
    Sync {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt cluster record {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    #[serde(rename = "PeerURLs")]
    pub peer_urls: Vec<String>,
}

/// The cluster file of one proxy directory.
#[derive(Debug, Clone)]
pub struct ClusterFile {
    dir: PathBuf,
    path: PathBuf,
    temp: PathBuf,
}

impl ClusterFile {
    /// Cluster file inside `proxy_dir`.
    pub fn new(proxy_dir: &Path) -> Self {
        let path = proxy_dir.join(CLUSTER_FILE);
        let temp = path.with_extension(TEMP_SUFFIX);
        Self {
            dir: proxy_dir.to_path_buf(),
            path,
            temp,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last committed record. `None` if there is none yet.
    pub fn load(&self) -> Result<Option<ClusterRecord>, PersistError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| PersistError::Decode {
                path: self.path.clone(),
                source,
            })
    }

    /// Replace the record atomically.
    pub fn store(&self, peer_urls: &[String]) -> Result<(), PersistError> {
        self.write_temp(peer_urls)?;
        self.commit()
    }

    /// Write and fsync the temporary file without touching the canonical one.
    pub fn write_temp(&self, peer_urls: &[String]) -> Result<(), PersistError> {
        let record = ClusterRecord {
            peer_urls: peer_urls.to_vec(),
        };
        let bytes = serde_json::to_vec(&record)?;

        let write_err = |source| PersistError::Write {
            path: self.temp.clone(),
            source,
        };
        let mut file = File::create(&self.temp).map_err(write_err)?;
        file.write_all(&bytes).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        Ok(())
    }

    /// Move the temporary file over the canonical one and sync the directory
    /// so the rename itself is durable.
    pub fn commit(&self) -> Result<(), PersistError> {
        fs::rename(&self.temp, &self.path).map_err(|source| PersistError::Rename {
            from: self.temp.clone(),
            to: self.path.clone(),
            source,
        })?;
        self.sync_dir()
    }

    #[cfg(unix)]
    fn sync_dir(&self) -> Result<(), PersistError> {
        File::open(&self.dir)
            .and_then(|dir| dir.sync_all())
            .map_err(|source| PersistError::Sync {
                path: self.dir.clone(),
                source,
            })
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> Result<(), PersistError> {
        Ok(())
    }
}
