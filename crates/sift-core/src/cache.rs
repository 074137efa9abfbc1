use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum CacheError {
    Io { path: PathBuf, detail: String },
    Corrupt { path: PathBuf, detail: String },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io { path, detail } => {
                write!(f, "cache file '{}' is unreadable: {detail}", path.display())
            }
            CacheError::Corrupt { path, detail } => {
                write!(f, "cache file '{}' is corrupt: {detail}", path.display())
            }
        }
    }
}

impl Error for CacheError {}

/// Cheap change signal for a file: size plus modification time. If either
/// moves, the cached verdict is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub size: u64,
    pub mtime_ms: u64,
}

pub fn file_identity(path: &Path) -> std::io::Result<FileIdentity> {
    let metadata = fs::metadata(path)?;
    let mtime_ms = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Ok(FileIdentity {
        size: metadata.len(),
        mtime_ms,
    })
}

/// One cached verdict: the file looked like this, under this configuration,
/// and was clean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDescriptor {
    #[serde(flatten)]
    pub identity: FileIdentity,
    pub config_hash: String,
}

impl CacheDescriptor {
    pub fn is_fresh(&self, identity: FileIdentity, config_hash: &str) -> bool {
        self.identity == identity && self.config_hash == config_hash
    }
}

/// JSON-backed map of clean files. Loaded once, mutated in memory, flushed
/// once at the end of a run.
#[derive(Debug)]
pub struct FileCache {
    location: PathBuf,
    entries: BTreeMap<PathBuf, CacheDescriptor>,
}

impl FileCache {
    /// A missing cache file is an empty cache; an unreadable or corrupt one
    /// is the caller's problem.
    pub fn load(location: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let location = location.into();
        let entries = match fs::read_to_string(&location) {
            Ok(text) => serde_json::from_str(&text).map_err(|err| CacheError::Corrupt {
                path: location.clone(),
                detail: err.to_string(),
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(CacheError::Io {
                    path: location,
                    detail: err.to_string(),
                })
            }
        };
        Ok(FileCache { location, entries })
    }

    pub fn get(&self, path: &Path) -> Option<&CacheDescriptor> {
        self.entries.get(path)
    }

    pub fn set(&mut self, path: impl Into<PathBuf>, descriptor: CacheDescriptor) {
        self.entries.insert(path.into(), descriptor);
    }

    pub fn remove(&mut self, path: &Path) {
        self.entries.remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets everything in memory and deletes the persisted file. Used
    /// when a run starts with caching turned off.
    pub fn discard_persisted(&mut self) -> Result<(), CacheError> {
        self.entries.clear();
        match fs::remove_file(&self.location) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::Io {
                path: self.location.clone(),
                detail: err.to_string(),
            }),
        }
    }

    pub fn flush(&self) -> Result<(), CacheError> {
        let text = serde_json::to_string(&self.entries).map_err(|err| CacheError::Corrupt {
            path: self.location.clone(),
            detail: err.to_string(),
        })?;
        fs::write(&self.location, text).map_err(|err| CacheError::Io {
            path: self.location.clone(),
            detail: err.to_string(),
        })
    }
}
