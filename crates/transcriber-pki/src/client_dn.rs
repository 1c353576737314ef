//! Client DN allow-list.
//!
//! The TLS terminator in front of the backend forwards the verified client
//! subject in the `x-client-dn` header. Only the worker identity and the
//! configured third-party clients may call the machine-to-machine routes.

use serde::Deserialize;
use thiserror::Error;

/// Header carrying the verified client subject.
pub const CLIENT_DN_HEADER: &str = "x-client-dn";

/// Rejection of a presented client DN.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnRejected {
    #[error("request has no client DN")]
    Missing,

    #[error("client DN '{0}' is not allowed")]
    NotAllowed(String),
}

/// Allow-list policy for client subjects.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientDnPolicy {
    /// When false every request passes and the header is returned as-is.
    pub enabled: bool,

    /// Allowed RFC 2253 subjects, e.g. the worker and Kaltura client DNs.
    pub allowed: Vec<String>,
}

impl Default for ClientDnPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed: Vec::new(),
        }
    }
}

impl ClientDnPolicy {
    pub fn new(allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            enabled: true,
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    /// A policy that lets everything through.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            allowed: Vec::new(),
        }
    }

    /// Check the value of the client DN header.
    ///
    /// Surrounding whitespace is ignored when comparing.
    pub fn verify<'a>(&self, header: Option<&'a str>) -> Result<Option<&'a str>, DnRejected> {
        if !self.enabled {
            return Ok(header);
        }

        let dn = header.ok_or(DnRejected::Missing)?;
        let trimmed = dn.trim();
        if trimmed.is_empty() {
            return Err(DnRejected::Missing);
        }
        if self.allowed.iter().any(|allowed| allowed.trim() == trimmed) {
            Ok(Some(dn))
        } else {
            Err(DnRejected::NotAllowed(trimmed.to_string()))
        }
    }
}
