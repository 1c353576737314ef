//! Bootstrap configuration.
//!
//! Every identity string and validity period used by the bootstrap lives
//! here. Defaults reproduce the historical provisioning run; an optional
//! TOML file overrides any subset of them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::naming::{is_plain_file_name, ArtifactNameOverrides, ArtifactNames, NamingScheme};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unsupported RSA key size {0} (expected 2048, 3072 or 4096)")]
    UnsupportedKeySize(u32),

    #[error("{role} validity must be at least one day")]
    ZeroValidity { role: &'static str },

    #[error("{role} validity ({leaf_days} days) must be shorter than CA validity ({ca_days} days)")]
    LeafOutlivesCa {
        role: &'static str,
        leaf_days: u32,
        ca_days: u32,
    },

    #[error("{role} subject is missing a common name")]
    MissingCommonName { role: &'static str },

    #[error("common name '{0}' is used by more than one identity")]
    DuplicateCommonName(String),

    #[error("country code must be two letters, got '{0}'")]
    InvalidCountry(String),

    #[error("{artifact} file name '{name}' must be a plain file name inside the output directory")]
    InvalidArtifactName { artifact: &'static str, name: String },

    #[error("file name '{0}' is used by more than one artifact")]
    DuplicateArtifactName(String),
}

/// RSA modulus size for every generated key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum KeySize {
    Rsa2048,
    Rsa3072,
    #[default]
    Rsa4096,
}

impl KeySize {
    pub fn bits(self) -> usize {
        match self {
            KeySize::Rsa2048 => 2048,
            KeySize::Rsa3072 => 3072,
            KeySize::Rsa4096 => 4096,
        }
    }
}

impl TryFrom<u32> for KeySize {
    type Error = ConfigError;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        match bits {
            2048 => Ok(KeySize::Rsa2048),
            3072 => Ok(KeySize::Rsa3072),
            4096 => Ok(KeySize::Rsa4096),
            other => Err(ConfigError::UnsupportedKeySize(other)),
        }
    }
}

impl From<KeySize> for u32 {
    fn from(size: KeySize) -> Self {
        size.bits() as u32
    }
}

/// Distinguished name fields placed in a certificate subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectName {
    /// Two-letter country code (C).
    pub country: Option<String>,

    /// State or province (ST).
    pub state: Option<String>,

    /// Locality (L).
    pub locality: Option<String>,

    /// Organization (O).
    pub organization: Option<String>,

    /// Organizational unit (OU).
    pub organizational_unit: Option<String>,

    /// Common name (CN).
    pub common_name: String,
}

impl Default for SubjectName {
    fn default() -> Self {
        Self {
            country: Some("FI".to_string()),
            state: Some("Uusimaa".to_string()),
            locality: None,
            organization: Some("Transcriber".to_string()),
            organizational_unit: None,
            common_name: String::new(),
        }
    }
}

impl SubjectName {
    /// Default organisation fields with the given common name.
    pub fn with_common_name(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            ..Self::default()
        }
    }

    fn validate(&self, role: &'static str) -> Result<(), ConfigError> {
        if self.common_name.trim().is_empty() {
            return Err(ConfigError::MissingCommonName { role });
        }
        if let Some(country) = &self.country {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(ConfigError::InvalidCountry(country.clone()));
            }
        }
        Ok(())
    }
}

/// Certificate authority identity and lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaProfile {
    pub subject: SubjectName,
    pub validity_days: u32,
}

impl Default for CaProfile {
    fn default() -> Self {
        Self {
            subject: SubjectName::with_common_name("Transcriber CA"),
            validity_days: 3650,
        }
    }
}

/// Leaf identity and lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafProfile {
    pub subject: SubjectName,

    pub validity_days: u32,

    /// DNS names or IP addresses placed in the subjectAltName extension.
    #[serde(default)]
    pub subject_alt_names: Vec<String>,
}

impl LeafProfile {
    /// Profile for a client identity issued after the bootstrap.
    pub fn client(common_name: impl Into<String>, validity_days: u32) -> Self {
        Self {
            subject: SubjectName::with_common_name(common_name),
            validity_days,
            subject_alt_names: Vec::new(),
        }
    }

    fn default_server() -> Self {
        Self {
            subject: SubjectName::with_common_name("transcriber-backend"),
            validity_days: 365,
            subject_alt_names: vec!["localhost".to_string(), "127.0.0.1".to_string()],
        }
    }

    fn default_worker() -> Self {
        Self::client("transcriber-worker", 365)
    }
}

/// Complete bootstrap configuration.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Directory that receives every artifact. Must not exist yet.
    pub out_dir: PathBuf,

    /// Key size for the CA and both leaves.
    pub key_size: KeySize,

    /// File names inside `out_dir`.
    pub names: ArtifactNames,

    /// Keep CSR files and the serial file after a successful run.
    pub retain_intermediates: bool,

    pub ca: CaProfile,
    pub server: LeafProfile,
    pub worker: LeafProfile,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("certs"),
            key_size: KeySize::default(),
            names: NamingScheme::default().artifact_names(),
            retain_intermediates: true,
            ca: CaProfile::default(),
            server: LeafProfile::default_server(),
            worker: LeafProfile::default_worker(),
        }
    }
}

/// On-disk representation of [`BootstrapConfig`]; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub out_dir: Option<PathBuf>,
    pub naming: Option<NamingScheme>,
    pub key_bits: Option<KeySize>,
    pub retain_intermediates: Option<bool>,
    pub ca: Option<CaProfile>,
    pub server: Option<LeafProfile>,
    pub worker: Option<LeafProfile>,
    pub names: Option<ArtifactNameOverrides>,
}

impl ConfigFile {
    /// Read a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse TOML text.
    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Naming scheme selected by the file, or the default.
    pub fn naming_scheme(&self) -> NamingScheme {
        self.naming.unwrap_or_default()
    }

    /// Merge onto the defaults.
    pub fn into_config(self) -> BootstrapConfig {
        let defaults = BootstrapConfig::default();
        let scheme = self.naming_scheme();
        let mut names = scheme.artifact_names();
        if let Some(overrides) = &self.names {
            overrides.apply(&mut names);
        }

        BootstrapConfig {
            out_dir: self.out_dir.unwrap_or(defaults.out_dir),
            key_size: self.key_bits.unwrap_or(defaults.key_size),
            names,
            retain_intermediates: self
                .retain_intermediates
                .unwrap_or(defaults.retain_intermediates),
            ca: self.ca.unwrap_or(defaults.ca),
            server: self.server.unwrap_or(defaults.server),
            worker: self.worker.unwrap_or(defaults.worker),
        }
    }
}

impl BootstrapConfig {
    /// Check lifetimes and identities before anything touches the disk.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ca.subject.validate("CA")?;
        self.server.subject.validate("server")?;
        self.worker.subject.validate("worker")?;

        if self.ca.validity_days == 0 {
            return Err(ConfigError::ZeroValidity { role: "CA" });
        }
        for (role, leaf) in [("server", &self.server), ("worker", &self.worker)] {
            if leaf.validity_days == 0 {
                return Err(ConfigError::ZeroValidity { role });
            }
            if leaf.validity_days >= self.ca.validity_days {
                return Err(ConfigError::LeafOutlivesCa {
                    role,
                    leaf_days: leaf.validity_days,
                    ca_days: self.ca.validity_days,
                });
            }
        }

        let mut seen = HashSet::new();
        for cn in [
            &self.ca.subject.common_name,
            &self.server.subject.common_name,
            &self.worker.subject.common_name,
        ] {
            if !seen.insert(cn.as_str()) {
                return Err(ConfigError::DuplicateCommonName(cn.clone()));
            }
        }

        let mut files = HashSet::new();
        for (artifact, name) in self.names.entries() {
            if !is_plain_file_name(name) {
                return Err(ConfigError::InvalidArtifactName {
                    artifact,
                    name: name.to_string(),
                });
            }
            if !files.insert(name) {
                return Err(ConfigError::DuplicateArtifactName(name.to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BootstrapConfig::default();
        config.validate().unwrap();
        assert_eq!(config.ca.validity_days, 3650);
        assert_eq!(config.server.validity_days, 365);
        assert_eq!(config.worker.validity_days, 365);
        assert_eq!(config.key_size.bits(), 4096);
        assert_eq!(config.out_dir, PathBuf::from("certs"));
    }

    #[test]
    fn test_rejects_leaf_outliving_ca() {
        let mut config = BootstrapConfig::default();
        config.worker.validity_days = 3650;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::LeafOutlivesCa { role: "worker", .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_common_names() {
        let mut config = BootstrapConfig::default();
        config.worker.subject.common_name = config.server.subject.common_name.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateCommonName(_))
        ));
    }

    #[test]
    fn test_rejects_bad_country() {
        let mut config = BootstrapConfig::default();
        config.ca.subject.country = Some("Finland".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCountry(_))
        ));
    }

    #[test]
    fn test_rejects_names_escaping_output_dir() {
        for name in ["../ca.key", "/etc/ca.key", "keys/ca.key", ".."] {
            let mut config = BootstrapConfig::default();
            config.names.ca_key = name.to_string();
            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigError::InvalidArtifactName { artifact: "ca_key", .. })
                ),
                "accepted {name}"
            );
        }
    }

    #[test]
    fn test_rejects_duplicate_artifact_names() {
        let mut config = BootstrapConfig::default();
        config.names.worker.cert = config.names.server.cert.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateArtifactName(name)) if name == "server.crt"
        ));
    }

    #[test]
    fn test_config_file_overrides() {
        let file = ConfigFile::parse(
            r#"
            out_dir = "pki"
            naming = "transcriber"
            key_bits = 2048

            [worker]
            validity_days = 90
            subject = { common_name = "gpu-worker", organization = "Lab" }

            [names]
            ca_cert = "root.pem"
            "#,
        )
        .unwrap();
        let config = file.into_config();

        assert_eq!(config.out_dir, PathBuf::from("pki"));
        assert_eq!(config.key_size, KeySize::Rsa2048);
        assert_eq!(config.worker.validity_days, 90);
        assert_eq!(config.worker.subject.common_name, "gpu-worker");
        assert_eq!(config.worker.subject.organization.as_deref(), Some("Lab"));
        // Unset subject fields fall back to the default organisation identity.
        assert_eq!(config.worker.subject.country.as_deref(), Some("FI"));
        assert_eq!(config.names.ca_cert, "root.pem");
        assert_eq!(config.names.ca_key, "transcriber_ca_key.pem");
        assert_eq!(config.server.subject.common_name, "transcriber-backend");
        config.validate().unwrap();
    }

    #[test]
    fn test_config_file_rejects_unknown_key_size() {
        assert!(ConfigFile::parse("key_bits = 1024").is_err());
    }
}
