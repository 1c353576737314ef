//! The certificate bootstrap procedure.
//!
//! Creates the output directory exclusively, then issues in order:
//! 1. CA key and self-signed CA certificate
//! 2. Server key, CSR and CA-signed certificate
//! 3. Worker key, CSR and CA-signed certificate
//!
//! A failure after the directory was created removes the directory again,
//! so a failed run never leaves partial key material behind.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ca::{CaError, CertificateAuthority, LeafUsage, SignedCertificate};
use crate::config::{BootstrapConfig, ConfigError, KeySize, LeafProfile};
use crate::csr::LeafRequest;
use crate::naming::{ArtifactNames, ArtifactPaths, LeafPaths};
use crate::output::{create_exclusive_dir, write_new, OutputError, Sensitivity};
use crate::serial::{SerialError, SerialFile};
use crate::verify::PemCertificate;

/// Errors that abort a bootstrap or issue run.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("output directory {} already exists; refusing to overwrite an existing CA", path.display())]
    OutputExists { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ca(#[from] CaError),

    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error(transparent)]
    Output(OutputError),

    #[error("failed to scan {} for issued certificates: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove intermediate file {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<OutputError> for BootstrapError {
    fn from(err: OutputError) -> Self {
        match err {
            OutputError::DirectoryExists { path } => BootstrapError::OutputExists { path },
            other => BootstrapError::Output(other),
        }
    }
}

impl BootstrapError {
    /// True when the run was refused because earlier output exists.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            BootstrapError::OutputExists { .. }
                | BootstrapError::Output(OutputError::FileExists { .. })
        )
    }
}

/// What a successful bootstrap produced.
#[derive(Debug, Clone)]
pub struct BootstrapReport {
    pub out_dir: PathBuf,
    pub paths: ArtifactPaths,
    pub server: SignedCertificate,
    pub worker: SignedCertificate,

    /// Whether CSR and serial files were left in place.
    pub retained_intermediates: bool,
}

/// Run the bootstrap procedure described by `config`.
pub fn bootstrap(config: &BootstrapConfig) -> Result<BootstrapReport, BootstrapError> {
    config.validate()?;

    create_exclusive_dir(&config.out_dir)?;
    info!(out_dir = %config.out_dir.display(), "Created output directory");

    match issue_all(config) {
        Ok(report) => Ok(report),
        Err(err) => {
            rollback(&config.out_dir);
            Err(err)
        }
    }
}

fn issue_all(config: &BootstrapConfig) -> Result<BootstrapReport, BootstrapError> {
    let paths = config.names.resolve(&config.out_dir);

    info!(
        common_name = %config.ca.subject.common_name,
        bits = config.key_size.bits(),
        validity_days = config.ca.validity_days,
        "Generating certificate authority"
    );
    let ca = CertificateAuthority::generate(&config.ca, config.key_size)?;
    write_new(&paths.ca_key, ca.key_pem(), Sensitivity::Private)?;
    write_new(&paths.ca_cert, ca.ca_cert_pem(), Sensitivity::Public)?;
    info!(path = %paths.ca_cert.display(), "Wrote CA certificate");

    let serials = SerialFile::new(&paths.ca_serial);

    let server = issue_leaf(
        &ca,
        &serials,
        &config.server,
        LeafUsage::Server,
        config.key_size,
        &paths.server,
    )?;
    let worker = issue_leaf(
        &ca,
        &serials,
        &config.worker,
        LeafUsage::Client,
        config.key_size,
        &paths.worker,
    )?;

    if !config.retain_intermediates {
        for path in [&paths.server.csr, &paths.worker.csr, &paths.ca_serial] {
            remove_intermediate(path)?;
        }
    }

    Ok(BootstrapReport {
        out_dir: config.out_dir.clone(),
        paths,
        server,
        worker,
        retained_intermediates: config.retain_intermediates,
    })
}

/// Generate a key and CSR for `profile`, then sign it with `ca`.
fn issue_leaf(
    ca: &CertificateAuthority,
    serials: &SerialFile,
    profile: &LeafProfile,
    usage: LeafUsage,
    key_size: KeySize,
    paths: &LeafPaths,
) -> Result<SignedCertificate, BootstrapError> {
    debug!(common_name = %profile.subject.common_name, ?usage, "Generating leaf key and CSR");
    let request = LeafRequest::generate(&profile.subject, key_size)?;
    write_new(&paths.key, &request.key.pem, Sensitivity::Private)?;
    write_new(&paths.csr, &request.csr_pem, Sensitivity::Public)?;

    let serial = serials.allocate()?;
    let signed = ca.sign_csr(&request.csr_pem, profile, serial, usage)?;
    write_new(&paths.cert, &signed.cert_pem, Sensitivity::Public)?;

    info!(
        path = %paths.cert.display(),
        common_name = %signed.common_name,
        serial = %format!("{:X}", signed.serial),
        not_after = %signed.not_after,
        "Issued leaf certificate"
    );
    Ok(signed)
}

fn remove_intermediate(path: &Path) -> Result<(), BootstrapError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "Removed intermediate file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(BootstrapError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn rollback(out_dir: &Path) {
    match std::fs::remove_dir_all(out_dir) {
        Ok(()) => warn!(out_dir = %out_dir.display(), "Bootstrap failed, removed partial output"),
        Err(e) => warn!(
            out_dir = %out_dir.display(),
            error = %e,
            "Bootstrap failed and partial output could not be removed"
        ),
    }
}

/// Result of issuing an extra client identity.
#[derive(Debug, Clone)]
pub struct IssuedClient {
    pub paths: LeafPaths,
    pub certificate: SignedCertificate,
}

/// Issue an additional client identity from an existing bootstrap output.
///
/// The CA is loaded from `dir` and the serial file there is continued, so
/// the new serial never collides with earlier leaves. When the serial file
/// was discarded it is reseeded from the highest serial found among the
/// certificates in `dir`. Existing files are never overwritten, and the
/// files this call created are removed again if issuing fails.
pub fn issue_client(
    dir: &Path,
    names: &ArtifactNames,
    leaf_paths: &LeafPaths,
    profile: &LeafProfile,
    key_size: KeySize,
) -> Result<IssuedClient, BootstrapError> {
    let paths = names.resolve(dir);
    for existing in [&leaf_paths.key, &leaf_paths.csr, &leaf_paths.cert] {
        if existing.exists() {
            return Err(OutputError::FileExists {
                path: existing.clone(),
            }
            .into());
        }
    }

    let ca = CertificateAuthority::from_files(&paths.ca_cert, &paths.ca_key)?;
    let serials = SerialFile::new(&paths.ca_serial);
    if serials.current()?.is_none() {
        if let Some(last) = highest_issued_serial(dir)? {
            warn!(
                path = %paths.ca_serial.display(),
                serial = %format!("{last:X}"),
                "Serial file missing, continuing from highest issued serial"
            );
            serials.store(last)?;
        }
    }

    let certificate = match issue_leaf(
        &ca,
        &serials,
        profile,
        LeafUsage::Client,
        key_size,
        leaf_paths,
    ) {
        Ok(certificate) => certificate,
        Err(err) => {
            for path in [&leaf_paths.key, &leaf_paths.csr, &leaf_paths.cert] {
                if let Err(e) = remove_intermediate(path) {
                    warn!(error = %e, "Issue failed and partial output could not be removed");
                }
            }
            return Err(err);
        }
    };

    Ok(IssuedClient {
        paths: leaf_paths.clone(),
        certificate,
    })
}

/// Highest serial among the PEM certificates directly inside `dir`.
fn highest_issued_serial(dir: &Path) -> Result<Option<u64>, BootstrapError> {
    let scan_err = |source: std::io::Error| BootstrapError::Scan {
        path: dir.to_path_buf(),
        source,
    };

    let mut highest = None;
    for entry in std::fs::read_dir(dir).map_err(scan_err)? {
        let path = entry.map_err(scan_err)?.path();
        if !path.is_file() {
            continue;
        }
        // Keys and CSRs do not parse as certificates.
        let Ok(cert) = PemCertificate::read(&path) else {
            continue;
        };
        if let Ok(Some(serial)) = cert.serial_u64() {
            highest = highest.max(Some(serial));
        }
    }
    Ok(highest)
}
