//! Artifact file naming.
//!
//! Two layouts have been used by the backend deployments over time:
//! `Classic` (`ca.key`, `server.crt`, ...) and `Transcriber`
//! (`transcriber_ca_key.pem`, `transcriber_server.pem`, ...). Neither is
//! canonical, so the layout is chosen by configuration and individual names
//! can be overridden.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Preset file layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingScheme {
    /// `ca.key`, `ca.crt`, `server.key`, `server.csr`, `server.crt`, ...
    #[default]
    Classic,

    /// `transcriber_ca_key.pem`, `transcriber_ca.pem`, ...
    Transcriber,
}

impl NamingScheme {
    /// File names for a full bootstrap run.
    pub fn artifact_names(self) -> ArtifactNames {
        match self {
            NamingScheme::Classic => ArtifactNames {
                ca_key: "ca.key".to_string(),
                ca_cert: "ca.crt".to_string(),
                ca_serial: "ca.srl".to_string(),
                server: self.client_names("server"),
                worker: self.client_names("worker"),
            },
            NamingScheme::Transcriber => ArtifactNames {
                ca_key: "transcriber_ca_key.pem".to_string(),
                ca_cert: "transcriber_ca.pem".to_string(),
                ca_serial: "transcriber_ca.srl".to_string(),
                server: self.client_names("server"),
                // Deployed workers load this exact name.
                worker: LeafNames {
                    key: "transcriber_worker_key.pem".to_string(),
                    csr: "transcriber_worker_csr.pem".to_string(),
                    cert: "transcriber_worker_crt.pem".to_string(),
                },
            },
        }
    }

    /// File names for a leaf identity called `name`.
    pub fn client_names(self, name: &str) -> LeafNames {
        match self {
            NamingScheme::Classic => LeafNames {
                key: format!("{name}.key"),
                csr: format!("{name}.csr"),
                cert: format!("{name}.crt"),
            },
            NamingScheme::Transcriber => LeafNames {
                key: format!("transcriber_{name}_key.pem"),
                csr: format!("transcriber_{name}_csr.pem"),
                cert: format!("transcriber_{name}.pem"),
            },
        }
    }
}

/// File names of one leaf identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafNames {
    pub key: String,
    pub csr: String,
    pub cert: String,
}

/// File names of every artifact produced by a bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactNames {
    pub ca_key: String,
    pub ca_cert: String,
    pub ca_serial: String,
    pub server: LeafNames,
    pub worker: LeafNames,
}

impl ArtifactNames {
    /// Every configured name, labelled with the artifact it belongs to.
    pub fn entries(&self) -> [(&'static str, &str); 9] {
        [
            ("ca_key", &self.ca_key),
            ("ca_cert", &self.ca_cert),
            ("ca_serial", &self.ca_serial),
            ("server_key", &self.server.key),
            ("server_csr", &self.server.csr),
            ("server_cert", &self.server.cert),
            ("worker_key", &self.worker.key),
            ("worker_csr", &self.worker.csr),
            ("worker_cert", &self.worker.cert),
        ]
    }

    /// Resolve every name against `dir`.
    pub fn resolve(&self, dir: &Path) -> ArtifactPaths {
        ArtifactPaths {
            ca_key: dir.join(&self.ca_key),
            ca_cert: dir.join(&self.ca_cert),
            ca_serial: dir.join(&self.ca_serial),
            server: self.server.resolve(dir),
            worker: self.worker.resolve(dir),
        }
    }
}

impl LeafNames {
    pub fn resolve(&self, dir: &Path) -> LeafPaths {
        LeafPaths {
            key: dir.join(&self.key),
            csr: dir.join(&self.csr),
            cert: dir.join(&self.cert),
        }
    }
}

/// True when `name` is a single file name that stays inside its directory.
///
/// Rejects separators, `..`, `.` and absolute or prefixed paths.
pub fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(first)), None) if first == name
    )
}

/// Per-file overrides read from the `[names]` config table.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArtifactNameOverrides {
    pub ca_key: Option<String>,
    pub ca_cert: Option<String>,
    pub ca_serial: Option<String>,
    pub server_key: Option<String>,
    pub server_csr: Option<String>,
    pub server_cert: Option<String>,
    pub worker_key: Option<String>,
    pub worker_csr: Option<String>,
    pub worker_cert: Option<String>,
}

impl ArtifactNameOverrides {
    pub fn apply(&self, names: &mut ArtifactNames) {
        let pairs = [
            (&self.ca_key, &mut names.ca_key),
            (&self.ca_cert, &mut names.ca_cert),
            (&self.ca_serial, &mut names.ca_serial),
            (&self.server_key, &mut names.server.key),
            (&self.server_csr, &mut names.server.csr),
            (&self.server_cert, &mut names.server.cert),
            (&self.worker_key, &mut names.worker.key),
            (&self.worker_csr, &mut names.worker.csr),
            (&self.worker_cert, &mut names.worker.cert),
        ];
        for (value, slot) in pairs {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }
    }
}

/// Absolute (or `out_dir`-relative) locations of every artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub ca_key: PathBuf,
    pub ca_cert: PathBuf,
    pub ca_serial: PathBuf,
    pub server: LeafPaths,
    pub worker: LeafPaths,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeafPaths {
    pub key: PathBuf,
    pub csr: PathBuf,
    pub cert: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classic_names() {
        let names = NamingScheme::Classic.artifact_names();
        assert_eq!(names.ca_key, "ca.key");
        assert_eq!(names.ca_cert, "ca.crt");
        assert_eq!(names.ca_serial, "ca.srl");
        assert_eq!(names.server.key, "server.key");
        assert_eq!(names.server.csr, "server.csr");
        assert_eq!(names.server.cert, "server.crt");
        assert_eq!(names.worker.key, "worker.key");
        assert_eq!(names.worker.csr, "worker.csr");
        assert_eq!(names.worker.cert, "worker.crt");
    }

    #[test]
    fn test_transcriber_names() {
        let names = NamingScheme::Transcriber.artifact_names();
        assert_eq!(names.ca_key, "transcriber_ca_key.pem");
        assert_eq!(names.ca_cert, "transcriber_ca.pem");
        assert_eq!(names.server.key, "transcriber_server_key.pem");
        assert_eq!(names.server.csr, "transcriber_server_csr.pem");
        assert_eq!(names.server.cert, "transcriber_server.pem");
        assert_eq!(names.worker.key, "transcriber_worker_key.pem");
        assert_eq!(names.worker.csr, "transcriber_worker_csr.pem");
        assert_eq!(names.worker.cert, "transcriber_worker_crt.pem");
    }

    #[test]
    fn test_client_names_for_extra_identity() {
        let classic = NamingScheme::Classic.client_names("kaltura");
        assert_eq!(classic.cert, "kaltura.crt");

        let transcriber = NamingScheme::Transcriber.client_names("kaltura");
        assert_eq!(transcriber.key, "transcriber_kaltura_key.pem");
        assert_eq!(transcriber.cert, "transcriber_kaltura.pem");
    }

    #[test]
    fn test_overrides_replace_only_given_names() {
        let mut names = NamingScheme::Classic.artifact_names();
        let overrides = ArtifactNameOverrides {
            worker_cert: Some("client.pem".to_string()),
            ..Default::default()
        };
        overrides.apply(&mut names);

        assert_eq!(names.worker.cert, "client.pem");
        assert_eq!(names.worker.key, "worker.key");
    }

    #[test]
    fn test_plain_file_names() {
        assert!(is_plain_file_name("ca.key"));
        assert!(is_plain_file_name("transcriber_worker_crt.pem"));

        for name in ["", ".", "..", "../ca.key", "/tmp/ca.key", "keys/ca.key", "ca.key/"] {
            assert!(!is_plain_file_name(name), "accepted {name:?}");
        }
    }

    #[test]
    fn test_entries_cover_every_artifact() {
        let names = NamingScheme::Transcriber.artifact_names();
        let entries = names.entries();
        assert_eq!(entries[0], ("ca_key", "transcriber_ca_key.pem"));
        assert_eq!(entries[8], ("worker_cert", "transcriber_worker_crt.pem"));
    }

    #[test]
    fn test_resolve_joins_directory() {
        let paths = NamingScheme::Classic
            .artifact_names()
            .resolve(Path::new("certs"));
        assert_eq!(paths.ca_cert, PathBuf::from("certs/ca.crt"));
        assert_eq!(paths.worker.key, PathBuf::from("certs/worker.key"));
    }
}
