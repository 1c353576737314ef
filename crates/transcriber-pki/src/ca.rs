//! Certificate Authority for the backend and worker identities.
//!
//! Uses rcgen to self-sign the root and to sign leaf CSRs, and x509-parser
//! to inspect what was loaded from disk.

use std::net::IpAddr;
use std::path::Path;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, CertificateSigningRequestParams,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use thiserror::Error;
use ::time::OffsetDateTime;
use tracing::debug;
use x509_parser::prelude::*;

use crate::config::{CaProfile, KeySize, LeafProfile};
use crate::keys::{generate_rsa_key, load_rsa_key, KeyError};

/// Errors that can occur during CA operations.
#[derive(Debug, Error)]
pub enum CaError {
    #[error("failed to read CA certificate: {0}")]
    ReadCert(std::io::Error),

    #[error("failed to read CA private key: {0}")]
    ReadKey(std::io::Error),

    #[error("failed to parse CA certificate: {0}")]
    ParseCert(String),

    #[error("CA private key does not match the CA certificate")]
    KeyMismatch,

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("failed to create CSR: {0}")]
    CsrError(String),

    #[error("failed to parse CSR: {0}")]
    ParseCsr(String),

    #[error("invalid CSR: {0}")]
    InvalidCsr(String),

    #[error("invalid subject alternative name '{0}'")]
    InvalidSan(String),

    #[error("invalid validity period: {0}")]
    Validity(String),

    #[error("failed to sign certificate: {0}")]
    SignError(String),
}

/// Extensions placed in a leaf certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafUsage {
    /// TLS server (the backend).
    Server,

    /// TLS client (workers and third-party integrations).
    Client,
}

/// Certificate Authority that signs leaf certificates.
pub struct CertificateAuthority {
    /// CA certificate (PEM).
    ca_cert_pem: String,

    /// CA private key (PKCS#8 PEM).
    ca_key_pem: String,

    /// Issuer view of the CA certificate used by rcgen when signing.
    ca_cert: Certificate,

    /// CA key pair.
    ca_key_pair: KeyPair,
}

impl CertificateAuthority {
    /// Generate a new self-signed CA.
    pub fn generate(profile: &CaProfile, key_size: KeySize) -> Result<Self, CaError> {
        let key = generate_rsa_key(key_size)?;

        let mut params = CertificateParams::default();
        params.distinguished_name = profile.subject.to_distinguished_name();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];

        let validity = Validity::starting_now(profile.validity_days)?;
        validity.apply(&mut params)?;
        params.serial_number = Some(SerialNumber::from(rand::random::<u64>() >> 1));

        let ca_cert = params
            .self_signed(&key.key_pair)
            .map_err(|e| CaError::SignError(e.to_string()))?;

        debug!(
            common_name = %profile.subject.common_name,
            not_after = %validity.not_after,
            "Self-signed CA certificate"
        );

        Ok(Self {
            ca_cert_pem: ca_cert.pem(),
            ca_key_pem: key.pem,
            ca_cert,
            ca_key_pair: key.key_pair,
        })
    }

    /// Load CA from certificate and key files.
    pub fn from_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, CaError> {
        let ca_cert_pem = std::fs::read_to_string(cert_path).map_err(CaError::ReadCert)?;
        let ca_key_pem = std::fs::read_to_string(key_path).map_err(CaError::ReadKey)?;
        Self::from_pem(ca_cert_pem, ca_key_pem)
    }

    /// Load CA from PEM strings.
    pub fn from_pem(ca_cert_pem: String, ca_key_pem: String) -> Result<Self, CaError> {
        let ca_key_pair = load_rsa_key(&ca_key_pem)?;

        let der = ::pem::parse(&ca_cert_pem).map_err(|e| CaError::ParseCert(e.to_string()))?;
        let (_, parsed) = X509Certificate::from_der(der.contents())
            .map_err(|e| CaError::ParseCert(e.to_string()))?;
        if !parsed.is_ca() {
            return Err(CaError::ParseCert(
                "certificate is not a CA certificate".to_string(),
            ));
        }
        if parsed.public_key().raw != ca_key_pair.public_key_der().as_slice() {
            return Err(CaError::KeyMismatch);
        }

        // rcgen needs the issuer as a Certificate; only its subject and key
        // identifier end up in issued leaves.
        let ca_params = CertificateParams::from_ca_cert_pem(&ca_cert_pem)
            .map_err(|e| CaError::ParseCert(e.to_string()))?;
        let ca_cert = ca_params
            .self_signed(&ca_key_pair)
            .map_err(|e| CaError::ParseCert(e.to_string()))?;

        Ok(Self {
            ca_cert_pem,
            ca_key_pem,
            ca_cert,
            ca_key_pair,
        })
    }

    /// Get the CA certificate in PEM format.
    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    /// Get the CA private key in PEM format.
    pub fn key_pem(&self) -> &str {
        &self.ca_key_pem
    }

    /// Sign a Certificate Signing Request (CSR).
    ///
    /// The subject is taken from the CSR; validity, serial and extensions
    /// come from `profile` and `usage`. Returns the signed certificate in
    /// PEM format with its validity window.
    pub fn sign_csr(
        &self,
        csr_pem: &str,
        profile: &LeafProfile,
        serial: u64,
        usage: LeafUsage,
    ) -> Result<SignedCertificate, CaError> {
        let common_name = extract_cn_from_csr_pem(csr_pem)?;

        // Parsing also verifies the CSR's self-signature.
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(|e| CaError::ParseCsr(e.to_string()))?;

        let params = &mut csr.params;
        let validity = Validity::starting_now(profile.validity_days)?;
        validity.apply(params)?;
        params.serial_number = Some(SerialNumber::from(serial));
        params.is_ca = IsCa::ExplicitNoCa;
        params.use_authority_key_identifier_extension = true;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = match usage {
            LeafUsage::Server => vec![ExtendedKeyUsagePurpose::ServerAuth],
            LeafUsage::Client => vec![ExtendedKeyUsagePurpose::ClientAuth],
        };
        params.subject_alt_names = profile
            .subject_alt_names
            .iter()
            .map(|name| parse_san(name))
            .collect::<Result<_, _>>()?;

        let cert = csr
            .signed_by(&self.ca_cert, &self.ca_key_pair)
            .map_err(|e| CaError::SignError(e.to_string()))?;

        Ok(SignedCertificate {
            cert_pem: cert.pem(),
            serial,
            not_before: validity.not_before,
            not_after: validity.not_after,
            common_name,
        })
    }
}

/// A signed certificate returned by the CA.
#[derive(Debug, Clone)]
pub struct SignedCertificate {
    /// The signed certificate in PEM format.
    pub cert_pem: String,

    /// Serial number allocated for the certificate.
    pub serial: u64,

    /// Start of validity.
    pub not_before: DateTime<Utc>,

    /// When the certificate expires.
    pub not_after: DateTime<Utc>,

    /// Subject Common Name taken from the CSR.
    pub common_name: String,
}

/// Validity window in whole seconds.
struct Validity {
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl Validity {
    fn starting_now(days: u32) -> Result<Self, CaError> {
        let not_before = Utc::now().trunc_subsecs(0);
        let not_after = not_before
            .checked_add_signed(Duration::days(i64::from(days)))
            .ok_or_else(|| CaError::Validity(format!("{days} days is out of range")))?;
        Ok(Self {
            not_before,
            not_after,
        })
    }

    fn apply(&self, params: &mut CertificateParams) -> Result<(), CaError> {
        params.not_before = to_offset(self.not_before)?;
        params.not_after = to_offset(self.not_after)?;
        Ok(())
    }
}

fn to_offset(at: DateTime<Utc>) -> Result<OffsetDateTime, CaError> {
    OffsetDateTime::from_unix_timestamp(at.timestamp()).map_err(|e| CaError::Validity(e.to_string()))
}

fn parse_san(name: &str) -> Result<SanType, CaError> {
    if let Ok(ip) = name.parse::<IpAddr>() {
        return Ok(SanType::IpAddress(ip));
    }
    name.try_into()
        .map(SanType::DnsName)
        .map_err(|_| CaError::InvalidSan(name.to_string()))
}

/// Extract the subject Common Name from a PEM CSR.
fn extract_cn_from_csr_pem(csr_pem: &str) -> Result<String, CaError> {
    let pem = ::pem::parse(csr_pem).map_err(|e| CaError::ParseCsr(e.to_string()))?;
    let (_, csr) = X509CertificationRequest::from_der(pem.contents())
        .map_err(|e| CaError::ParseCsr(e.to_string()))?;

    let cn = crate::dn::common_name(&csr.certification_request_info.subject).ok_or_else(|| {
        CaError::InvalidCsr("CSR does not contain a Common Name (CN)".to_string())
    })?;
    if cn.trim().is_empty() {
        return Err(CaError::InvalidCsr("Common Name cannot be empty".to_string()));
    }
    Ok(cn)
}
