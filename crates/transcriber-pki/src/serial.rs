//! Running certificate serial counter.
//!
//! The file holds the serial of the most recently issued certificate as
//! uppercase hex, the same format `openssl x509 -CAcreateserial` writes.

use std::path::{Path, PathBuf};

use rand::Rng;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while allocating a serial.
#[derive(Debug, Error)]
pub enum SerialError {
    #[error("failed to read serial file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write serial file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serial file {} does not contain a hex serial: '{contents}'", path.display())]
    Malformed { path: PathBuf, contents: String },

    #[error("serial counter in {} is exhausted", path.display())]
    Exhausted { path: PathBuf },
}

/// Serial counter backed by a file.
#[derive(Debug, Clone)]
pub struct SerialFile {
    path: PathBuf,
}

impl SerialFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last issued serial, if the file exists.
    pub fn current(&self) -> Result<Option<u64>, SerialError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SerialError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let trimmed = contents.trim();
        u64::from_str_radix(trimmed, 16)
            .map(Some)
            .map_err(|_| SerialError::Malformed {
                path: self.path.clone(),
                contents: trimmed.to_string(),
            })
    }

    /// Allocate the next serial and persist it.
    ///
    /// A missing file is created with a random starting serial.
    pub fn allocate(&self) -> Result<u64, SerialError> {
        let serial = match self.current()? {
            Some(last) => last.checked_add(1).ok_or_else(|| SerialError::Exhausted {
                path: self.path.clone(),
            })?,
            None => initial_serial(),
        };

        self.store(serial)?;

        debug!(path = %self.path.display(), serial = %format!("{serial:X}"), "Allocated serial");
        Ok(serial)
    }

    /// Record `serial` as the last issued one.
    pub fn store(&self, serial: u64) -> Result<(), SerialError> {
        std::fs::write(&self.path, format!("{serial:016X}\n")).map_err(|source| {
            SerialError::Write {
                path: self.path.clone(),
                source,
            }
        })
    }
}

/// Random positive serial with headroom left for increments.
fn initial_serial() -> u64 {
    rand::thread_rng().gen_range(1..(1u64 << 62))
}
