//! Writing artifacts to disk.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur while creating output files.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("output directory {} already exists; remove or rename it to bootstrap a new CA", path.display())]
    DirectoryExists { path: PathBuf },

    #[error("refusing to overwrite existing file {}", path.display())]
    FileExists { path: PathBuf },

    #[error("failed to create {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether a file holds secret key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    Public,
    Private,
}

/// Create `dir` exclusively.
///
/// Exactly one caller can succeed for a given path; everyone else gets
/// [`OutputError::DirectoryExists`]. Missing parents are created.
pub fn create_exclusive_dir(dir: &Path) -> Result<(), OutputError> {
    if let Some(parent) = dir.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| OutputError::Create {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    match fs::create_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(OutputError::DirectoryExists {
                path: dir.to_path_buf(),
            })
        }
        Err(source) => Err(OutputError::Create {
            path: dir.to_path_buf(),
            source,
        }),
    }
}

/// Write a new file, failing if it already exists.
///
/// Private files are created with mode 0600 on Unix.
pub fn write_new(path: &Path, contents: &str, sensitivity: Sensitivity) -> Result<(), OutputError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    restrict_mode(&mut options, sensitivity);

    let mut file = options.open(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::AlreadyExists {
            OutputError::FileExists {
                path: path.to_path_buf(),
            }
        } else {
            OutputError::Create {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    file.write_all(contents.as_bytes())
        .and_then(|()| file.sync_all())
        .map_err(|source| OutputError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(unix)]
fn restrict_mode(options: &mut OpenOptions, sensitivity: Sensitivity) {
    use std::os::unix::fs::OpenOptionsExt;
    if sensitivity == Sensitivity::Private {
        options.mode(0o600);
    }
}

#[cfg(not(unix))]
fn restrict_mode(_options: &mut OpenOptions, _sensitivity: Sensitivity) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_dir_creates_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("deploy").join("certs");
        create_exclusive_dir(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_exclusive_dir_conflict() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("certs");
        create_exclusive_dir(&dir).unwrap();

        let result = create_exclusive_dir(&dir);
        assert!(matches!(result, Err(OutputError::DirectoryExists { .. })));
    }

    #[test]
    fn test_exclusive_dir_racing_callers() {
        use std::sync::{Arc, Barrier};

        const CALLERS: usize = 8;
        let tmp = tempfile::tempdir().unwrap();
        let dir = Arc::new(tmp.path().join("certs"));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let dir = Arc::clone(&dir);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    create_exclusive_dir(&dir)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let created = results.iter().filter(|r| r.is_ok()).count();
        let refused = results
            .iter()
            .filter(|r| matches!(r, Err(OutputError::DirectoryExists { .. })))
            .count();
        assert_eq!(created, 1);
        assert_eq!(refused, CALLERS - 1);
    }

    #[test]
    fn test_write_new_never_overwrites() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ca.crt");
        write_new(&path, "first", Sensitivity::Public).unwrap();

        let result = write_new(&path, "second", Sensitivity::Public);
        assert!(matches!(result, Err(OutputError::FileExists { .. })));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first");
    }

    #[cfg(unix)]
    #[test]
    fn test_private_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ca.key");
        write_new(&path, "secret", Sensitivity::Private).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
