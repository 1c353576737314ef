//! Chain verification of issued certificates.
//!
//! Checks what the backend's TLS layer will check when a worker connects:
//! the leaf names the CA as issuer, carries a valid CA signature and is
//! inside its validity window.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x509_parser::prelude::*;
use x509_parser::time::ASN1Time;

use crate::dn;
use crate::naming::ArtifactNames;

/// Errors that can occur while verifying certificates.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse certificate: {0}")]
    Parse(String),

    #[error("issuer '{issuer}' does not match CA subject '{ca_subject}'")]
    IssuerMismatch { issuer: String, ca_subject: String },

    #[error("signature does not verify against the CA public key")]
    BadSignature,

    #[error("certificate is not valid until {0}")]
    NotYetValid(DateTime<Utc>),

    #[error("certificate expired at {0}")]
    Expired(DateTime<Utc>),
}

/// A parsed PEM certificate that keeps its DER alive.
pub struct PemCertificate {
    der: Vec<u8>,
}

impl PemCertificate {
    /// Parse the first PEM block of `pem_str`.
    pub fn parse(pem_str: &str) -> Result<Self, VerifyError> {
        let pem = ::pem::parse(pem_str).map_err(|e| VerifyError::Parse(e.to_string()))?;
        if pem.tag() != "CERTIFICATE" {
            return Err(VerifyError::Parse(format!(
                "expected a CERTIFICATE PEM block, got '{}'",
                pem.tag()
            )));
        }
        let der = pem.into_contents();
        X509Certificate::from_der(&der).map_err(|e| VerifyError::Parse(e.to_string()))?;
        Ok(Self { der })
    }

    /// Read and parse a PEM certificate file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, VerifyError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| VerifyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Borrow the parsed certificate.
    pub fn x509(&self) -> Result<X509Certificate<'_>, VerifyError> {
        X509Certificate::from_der(&self.der)
            .map(|(_, cert)| cert)
            .map_err(|e| VerifyError::Parse(e.to_string()))
    }

    /// Serial number as `u64`, or `None` when it does not fit.
    pub fn serial_u64(&self) -> Result<Option<u64>, VerifyError> {
        let cert = self.x509()?;
        let raw = cert.raw_serial();
        let significant = &raw[raw.iter().take_while(|b| **b == 0).count()..];
        if significant.len() > 8 {
            return Ok(None);
        }
        Ok(Some(
            significant
                .iter()
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
        ))
    }

    /// Summary fields for reports and logs.
    pub fn summary(&self) -> Result<CertificateSummary, VerifyError> {
        let cert = self.x509()?;
        let validity = cert.validity();
        Ok(CertificateSummary {
            subject: dn::subject_dn_rfc2253(&cert),
            issuer: dn::rfc2253(cert.issuer()),
            common_name: dn::common_name(cert.subject()),
            serial: cert.raw_serial_as_string(),
            not_before: asn1_to_chrono(&validity.not_before)?,
            not_after: asn1_to_chrono(&validity.not_after)?,
            is_ca: cert.is_ca(),
            fingerprint_sha256: fingerprint_sha256(&self.der),
        })
    }
}

/// Human-facing description of one certificate.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateSummary {
    pub subject: String,
    pub issuer: String,
    pub common_name: Option<String>,
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
    pub fingerprint_sha256: String,
}

impl CertificateSummary {
    /// Length of the validity window in whole days.
    pub fn validity_days(&self) -> i64 {
        (self.not_after - self.not_before).num_days()
    }
}

/// Verify that `leaf` was issued by `ca` and is valid at `at`.
///
/// Validity bounds are inclusive on both ends.
pub fn verify_issued_by(
    leaf: &PemCertificate,
    ca: &PemCertificate,
    at: DateTime<Utc>,
) -> Result<(), VerifyError> {
    let leaf_cert = leaf.x509()?;
    let ca_cert = ca.x509()?;

    if leaf_cert.issuer() != ca_cert.subject() {
        return Err(VerifyError::IssuerMismatch {
            issuer: dn::rfc2253(leaf_cert.issuer()),
            ca_subject: dn::subject_dn_rfc2253(&ca_cert),
        });
    }

    leaf_cert
        .verify_signature(Some(ca_cert.public_key()))
        .map_err(|_| VerifyError::BadSignature)?;

    let validity = leaf_cert.validity();
    let not_before = asn1_to_chrono(&validity.not_before)?;
    let not_after = asn1_to_chrono(&validity.not_after)?;
    if at < not_before {
        return Err(VerifyError::NotYetValid(not_before));
    }
    if at > not_after {
        return Err(VerifyError::Expired(not_after));
    }

    Ok(())
}

/// Outcome of checking one leaf against the CA.
#[derive(Debug, Clone, Serialize)]
pub struct LeafCheck {
    pub role: String,
    pub path: PathBuf,
    pub certificate: CertificateSummary,

    /// `None` when the chain verifies, otherwise the reason it does not.
    pub error: Option<String>,
}

impl LeafCheck {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of verifying a bootstrap output directory.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub ca_path: PathBuf,
    pub ca: CertificateSummary,
    pub leaves: Vec<LeafCheck>,
}

impl VerifyReport {
    /// True when every leaf chains to the CA.
    pub fn all_valid(&self) -> bool {
        self.leaves.iter().all(LeafCheck::is_valid)
    }
}

/// Verify the server and worker certificates in `dir` against its CA.
pub fn verify_directory(dir: &Path, names: &ArtifactNames) -> Result<VerifyReport, VerifyError> {
    let paths = names.resolve(dir);
    let ca = PemCertificate::read(&paths.ca_cert)?;
    let now = Utc::now();

    let mut leaves = Vec::new();
    for (role, path) in [("server", &paths.server.cert), ("worker", &paths.worker.cert)] {
        let leaf = PemCertificate::read(path)?;
        let error = verify_issued_by(&leaf, &ca, now)
            .err()
            .map(|e| e.to_string());
        leaves.push(LeafCheck {
            role: role.to_string(),
            path: path.clone(),
            certificate: leaf.summary()?,
            error,
        });
    }

    Ok(VerifyReport {
        ca_path: paths.ca_cert,
        ca: ca.summary()?,
        leaves,
    })
}

/// SHA-256 fingerprint of DER bytes as lowercase hex.
pub fn fingerprint_sha256(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

fn asn1_to_chrono(time: &ASN1Time) -> Result<DateTime<Utc>, VerifyError> {
    DateTime::from_timestamp(time.timestamp(), 0)
        .ok_or_else(|| VerifyError::Parse(format!("timestamp {} out of range", time.timestamp())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::{CertificateAuthority, LeafUsage};
    use crate::config::{CaProfile, KeySize, LeafProfile};
    use crate::csr::LeafRequest;
    use chrono::Duration;

    struct Issued {
        ca: PemCertificate,
        leaf: PemCertificate,
    }

    fn issue(cn: &str) -> Issued {
        let ca = CertificateAuthority::generate(&CaProfile::default(), KeySize::Rsa2048).unwrap();
        let profile = LeafProfile::client(cn, 365);
        let request = LeafRequest::generate(&profile.subject, KeySize::Rsa2048).unwrap();
        let signed = ca
            .sign_csr(&request.csr_pem, &profile, 1, LeafUsage::Client)
            .unwrap();
        Issued {
            ca: PemCertificate::parse(ca.ca_cert_pem()).unwrap(),
            leaf: PemCertificate::parse(&signed.cert_pem).unwrap(),
        }
    }

    #[test]
    fn test_leaf_verifies_against_its_ca() {
        let issued = issue("transcriber-worker");
        verify_issued_by(&issued.leaf, &issued.ca, Utc::now()).unwrap();
    }

    #[test]
    fn test_leaf_fails_against_unrelated_ca_with_same_subject() {
        let first = issue("transcriber-worker");
        let second = issue("transcriber-worker");

        // Same default CA subject, so only the signature check can tell them apart.
        let result = verify_issued_by(&first.leaf, &second.ca, Utc::now());
        assert!(matches!(result, Err(VerifyError::BadSignature)));
    }

    #[test]
    fn test_validity_window_is_inclusive() {
        let issued = issue("transcriber-worker");
        let summary = issued.leaf.summary().unwrap();
        assert_eq!(summary.validity_days(), 365);

        verify_issued_by(&issued.leaf, &issued.ca, summary.not_before).unwrap();
        verify_issued_by(&issued.leaf, &issued.ca, summary.not_after).unwrap();

        let early = summary.not_before - Duration::seconds(1);
        assert!(matches!(
            verify_issued_by(&issued.leaf, &issued.ca, early),
            Err(VerifyError::NotYetValid(_))
        ));
        let late = summary.not_after + Duration::seconds(1);
        assert!(matches!(
            verify_issued_by(&issued.leaf, &issued.ca, late),
            Err(VerifyError::Expired(_))
        ));
    }

    #[test]
    fn test_summary_fields() {
        let issued = issue("transcriber-worker");
        let summary = issued.leaf.summary().unwrap();
        assert_eq!(summary.common_name.as_deref(), Some("transcriber-worker"));
        assert_eq!(
            summary.subject,
            "CN=transcriber-worker,O=Transcriber,ST=Uusimaa,C=FI"
        );
        assert_eq!(
            summary.issuer,
            "CN=Transcriber CA,O=Transcriber,ST=Uusimaa,C=FI"
        );
        assert!(!summary.is_ca);
        assert_eq!(summary.fingerprint_sha256.len(), 64);
        assert!(issued.ca.summary().unwrap().is_ca);
    }

    #[test]
    fn test_serial_u64_matches_signed_serial() {
        let ca = CertificateAuthority::generate(&CaProfile::default(), KeySize::Rsa2048).unwrap();
        let profile = LeafProfile::client("transcriber-worker", 365);
        let request = LeafRequest::generate(&profile.subject, KeySize::Rsa2048).unwrap();
        let signed = ca
            .sign_csr(&request.csr_pem, &profile, 0x0123_4567_89AB_CDEF, LeafUsage::Client)
            .unwrap();

        let leaf = PemCertificate::parse(&signed.cert_pem).unwrap();
        assert_eq!(leaf.serial_u64().unwrap(), Some(0x0123_4567_89AB_CDEF));
    }

    #[test]
    fn test_parse_rejects_non_certificate_pem() {
        let key = crate::keys::generate_rsa_key(KeySize::Rsa2048).unwrap();
        assert!(matches!(
            PemCertificate::parse(&key.pem),
            Err(VerifyError::Parse(_))
        ));
    }

    #[test]
    fn test_fingerprint() {
        assert_eq!(
            fingerprint_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
