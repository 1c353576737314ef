//! Distinguished name helpers.
//!
//! The backend compares the client subject it receives from the TLS
//! terminator (RFC 2253 form, most specific attribute first) against its
//! configured allow-list, so certificates are summarised in that form.

use rcgen::{DistinguishedName, DnType};
use x509_parser::der_parser::oid::Oid;
use x509_parser::oid_registry::OID_X509_COMMON_NAME;
use x509_parser::prelude::*;

use crate::config::SubjectName;

impl SubjectName {
    /// Build the rcgen subject in `C, ST, L, O, OU, CN` order.
    pub fn to_distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        let optional = [
            (DnType::CountryName, &self.country),
            (DnType::StateOrProvinceName, &self.state),
            (DnType::LocalityName, &self.locality),
            (DnType::OrganizationName, &self.organization),
            (DnType::OrganizationalUnitName, &self.organizational_unit),
        ];
        for (ty, value) in optional {
            if let Some(value) = value {
                dn.push(ty, value.as_str());
            }
        }
        dn.push(DnType::CommonName, self.common_name.as_str());
        dn
    }

    /// RFC 2253 rendering of this subject as it will appear once issued.
    pub fn to_rfc2253(&self) -> String {
        let mut parts = vec![format!("CN={}", escape_value(&self.common_name))];
        let optional = [
            ("OU", &self.organizational_unit),
            ("O", &self.organization),
            ("L", &self.locality),
            ("ST", &self.state),
            ("C", &self.country),
        ];
        for (short, value) in optional {
            if let Some(value) = value {
                parts.push(format!("{short}={}", escape_value(value)));
            }
        }
        parts.join(",")
    }
}

/// Extract the Common Name from a certificate subject.
pub fn common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_attributes()
        .find(|attr| attr.attr_type() == &OID_X509_COMMON_NAME)
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string)
}

/// Render a name in RFC 2253 form (`CN=..,O=..,ST=..,C=..`).
pub fn rfc2253(name: &X509Name<'_>) -> String {
    let rdns: Vec<String> = name
        .iter()
        .map(|rdn| {
            rdn.iter()
                .map(|attr| {
                    let value = match attr.as_str() {
                        Ok(s) => escape_value(s),
                        Err(_) => format!("#{}", hex::encode(attr.attr_value().as_bytes())),
                    };
                    format!("{}={}", short_name(attr.attr_type()), value)
                })
                .collect::<Vec<_>>()
                .join("+")
        })
        .collect();

    rdns.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// RFC 2253 subject of a certificate.
pub fn subject_dn_rfc2253(cert: &X509Certificate<'_>) -> String {
    rfc2253(cert.subject())
}

fn short_name(oid: &Oid<'_>) -> String {
    let id = oid.to_id_string();
    let short = match id.as_str() {
        "2.5.4.3" => "CN",
        "2.5.4.6" => "C",
        "2.5.4.7" => "L",
        "2.5.4.8" => "ST",
        "2.5.4.10" => "O",
        "2.5.4.11" => "OU",
        "2.5.4.9" => "STREET",
        "0.9.2342.19200300.100.1.25" => "DC",
        "0.9.2342.19200300.100.1.1" => "UID",
        _ => return id,
    };
    short.to_string()
}

fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let last = value.chars().count().saturating_sub(1);
    for (i, c) in value.chars().enumerate() {
        let needs_escape = matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';')
            || (i == 0 && (c == '#' || c == ' '))
            || (i == last && c == ' ');
        if needs_escape {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
