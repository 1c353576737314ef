//! Leaf key and certificate signing request generation.

use rcgen::CertificateParams;

use crate::ca::CaError;
use crate::config::{KeySize, SubjectName};
use crate::keys::{generate_rsa_key, GeneratedKey};

/// A new leaf private key together with its CSR.
pub struct LeafRequest {
    pub key: GeneratedKey,

    /// CSR in PEM format (`BEGIN CERTIFICATE REQUEST`).
    pub csr_pem: String,
}

impl LeafRequest {
    /// Generate a key and a CSR carrying only `subject`.
    ///
    /// Extensions are decided by the signing CA, not requested here.
    pub fn generate(subject: &SubjectName, key_size: KeySize) -> Result<Self, CaError> {
        let key = generate_rsa_key(key_size)?;

        let mut params = CertificateParams::default();
        params.distinguished_name = subject.to_distinguished_name();

        let csr_pem = params
            .serialize_request(&key.key_pair)
            .and_then(|csr| csr.pem())
            .map_err(|e| CaError::CsrError(e.to_string()))?;

        Ok(Self { key, csr_pem })
    }
}
