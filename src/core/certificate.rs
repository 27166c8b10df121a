// src/core/certificate.rs

use crate::core::error::ProbeError;
use crate::core::models::CertificateRecord;
use chrono::{DateTime, Utc};
use tracing::debug;
use x509_parser::prelude::*;

const PEM_TAG: &str = "CERTIFICATE";

/// Builds a [`CertificateRecord`] from the DER bytes of a leaf certificate.
///
/// The raw bytes are kept verbatim inside the PEM block, so decoding the PEM
/// gives back exactly what the peer sent.
pub fn record_from_der(der: &[u8]) -> Result<CertificateRecord, ProbeError> {
    let (_, x509) =
        parse_x509_certificate(der).map_err(|e| ProbeError::Certificate(e.to_string()))?;

    let common_name = first_common_name(x509.subject());
    let issuer = first_common_name(x509.issuer());
    let not_after = asn1_time_to_chrono_utc(&x509.validity().not_after);

    debug!(
        subject = %x509.subject(),
        issuer = %x509.issuer(),
        %not_after,
        "Parsed peer certificate."
    );

    Ok(CertificateRecord {
        common_name,
        issuer,
        expiry: format_expiry(&not_after),
        // `::pem` is the crate; the x509 prelude brings its own `pem` module.
        pem: ::pem::encode(&::pem::Pem::new(PEM_TAG, der.to_vec())),
    })
}

fn first_common_name(name: &X509Name) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

/// Expiry as `2031-March-04`.
pub fn format_expiry(not_after: &DateTime<Utc>) -> String {
    not_after.format("%Y-%B-%d").to_string()
}
