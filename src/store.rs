//! On-disk storage for change records and their rendered configuration
//!
//! Each identifier owns two files in the config directory:
//! `<identifier>.json` holding the record and `<identifier>.conf` holding
//! the rendered configuration. Each file is replaced atomically (write to a
//! temporary file, then rename), but the pair is not: if the second write
//! fails the first file stays behind. [`Presence`] lets callers see such
//! half-written entries.

use crate::record::ChangeRecord;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("error {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("incomplete entry '{identifier}': {missing} is missing")]
    Incomplete {
        identifier: String,
        missing: PathBuf,
    },

    #[error("error encoding record '{identifier}': {source}")]
    Encode {
        identifier: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage task failed: {0}")]
    Task(String),
}

impl StoreError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Which halves of an entry are on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Presence {
    pub record: bool,
    pub artifact: bool,
}

impl Presence {
    pub fn any(&self) -> bool {
        self.record || self.artifact
    }

    pub fn both(&self) -> bool {
        self.record && self.artifact
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    record_extension: String,
    artifact_extension: String,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_extensions(root, "json", "conf")
    }

    pub fn with_extensions(
        root: impl Into<PathBuf>,
        record_extension: impl Into<String>,
        artifact_extension: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            record_extension: record_extension.into(),
            artifact_extension: artifact_extension.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, identifier: &str) -> PathBuf {
        self.root.join(format!("{}.{}", identifier, self.record_extension))
    }

    pub fn artifact_path(&self, identifier: &str) -> PathBuf {
        self.root.join(format!("{}.{}", identifier, self.artifact_extension))
    }

    pub fn exists(&self, identifier: &str) -> Result<Presence, StoreError> {
        Ok(Presence {
            record: path_exists(&self.record_path(identifier))?,
            artifact: path_exists(&self.artifact_path(identifier))?,
        })
    }

    /// Write the record, then the artifact. A failure on the artifact leaves
    /// the record in place.
    pub fn write(&self, record: &ChangeRecord, artifact: &[u8]) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(record).map_err(|source| StoreError::Encode {
            identifier: record.identifier.clone(),
            source,
        })?;

        self.write_file(&self.record_path(&record.identifier), &encoded)?;
        self.write_file(&self.artifact_path(&record.identifier), artifact)?;
        debug!(identifier = %record.identifier, bytes = artifact.len(), "Entry written");
        Ok(())
    }

    /// Raw bytes of the stored record
    pub fn read(&self, identifier: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.record_path(identifier);
        fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(path.clone()),
            _ => StoreError::io("reading", &path, e),
        })
    }

    /// Remove whichever halves exist. Missing halves are not an error; the
    /// returned [`Presence`] says what was actually removed.
    pub fn delete(&self, identifier: &str) -> Result<Presence, StoreError> {
        Ok(Presence {
            record: remove_if_present(&self.record_path(identifier))?,
            artifact: remove_if_present(&self.artifact_path(identifier))?,
        })
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let mut tmp = NamedTempFile::new_in(&self.root)
            .map_err(|e| StoreError::io("creating temporary file in", &self.root, e))?;
        tmp.write_all(contents)
            .map_err(|e| StoreError::io("writing", tmp.path(), e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io("syncing", tmp.path(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o644))
                .map_err(|e| StoreError::io("setting permissions on", tmp.path(), e))?;
        }

        tmp.persist(path)
            .map_err(|e| StoreError::io("writing", path, e.error))?;
        Ok(())
    }
}

fn path_exists(path: &Path) -> Result<bool, StoreError> {
    path.try_exists()
        .map_err(|e| StoreError::io("checking", path, e))
}

fn remove_if_present(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io("removing", path, e)),
    }
}
