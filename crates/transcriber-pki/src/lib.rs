//! Transcriber PKI
//!
//! Bootstraps the private certificate authority used for mutual TLS
//! between the transcription backend and its workers:
//! - a self-signed CA (RSA, SHA-256)
//! - a server identity for the backend
//! - a client identity for workers
//!
//! Also verifies issued chains and checks client DNs against an allow-list.

pub mod bootstrap;
pub mod ca;
pub mod client_dn;
pub mod config;
pub mod csr;
pub mod dn;
pub mod keys;
pub mod naming;
pub mod output;
pub mod serial;
pub mod verify;

// Re-export commonly used types
pub use bootstrap::{bootstrap, issue_client, BootstrapError, BootstrapReport, IssuedClient};
pub use ca::{CaError, CertificateAuthority, LeafUsage, SignedCertificate};
pub use client_dn::{ClientDnPolicy, DnRejected, CLIENT_DN_HEADER};
pub use config::{BootstrapConfig, CaProfile, ConfigError, ConfigFile, KeySize, LeafProfile, SubjectName};
pub use naming::{ArtifactNames, ArtifactPaths, LeafNames, LeafPaths, NamingScheme};
pub use serial::SerialFile;
pub use verify::{verify_directory, verify_issued_by, PemCertificate, VerifyError, VerifyReport};
