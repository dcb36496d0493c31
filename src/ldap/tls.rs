// src/ldap/tls.rs

use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore};
use rustls_pemfile::certs;
use std::io::Cursor;
use std::sync::Arc;

use crate::ldap::DirectoryError;

/// TLS-конфигурация клиента для LDAPS / StartTLS.
///
/// Доверяет встроенным корням web PKI и сертификатам из `ca_pem`
/// (внутренние CA каталога редко бывают публичными).
pub fn load_client_config(ca_pem: Option<&[u8]>) -> Result<Arc<ClientConfig>, DirectoryError> {
    let mut roots = RootCertStore::empty();
    roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    if let Some(pem) = ca_pem {
        let ders = certs(&mut Cursor::new(pem))
            .map_err(|e| DirectoryError::Connection(format!("failed to parse CA PEM: {e}")))?;
        if ders.is_empty() {
            return Err(DirectoryError::Connection(
                "no certificates found in CA file".to_string(),
            ));
        }
        for der in ders {
            roots
                .add(&rustls::Certificate(der))
                .map_err(|e| DirectoryError::Connection(format!("invalid CA certificate: {e}")))?;
        }
    }

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Arc::new(config))
}
