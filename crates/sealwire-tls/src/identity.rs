//! PEM identity material loaded from memory.
//!
//! A transport identifies itself with an X.509 certificate chain and the
//! matching private key. Both arrive as PEM buffers (typically embedded in
//! the binary at build time), never as file paths.
//!
//! # Example
//!
//! ```
//! use sealwire_tls::context::CryptoContext;
//! use sealwire_tls::config::TlsVersions;
//! use sealwire_tls::identity::load_identity;
//!
//! let generated = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
//! let cert_pem = generated.cert.pem();
//! let key_pem = generated.key_pair.serialize_pem();
//!
//! let mut context = CryptoContext::new(TlsVersions::default()).unwrap();
//! load_identity(&mut context, cert_pem.as_bytes(), key_pem.as_bytes()).unwrap();
//! assert!(context.identity().is_some());
//! ```

use std::fmt;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::sign::CertifiedKey;
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::Zeroizing;

use crate::context::CryptoContext;
use crate::error::LoadError;

/// Owned PEM buffers for a certificate chain and its private key.
///
/// The key buffer is zeroized on drop.
#[derive(Clone)]
pub struct IdentityPem {
    cert: Vec<u8>,
    key: Zeroizing<Vec<u8>>,
}

impl IdentityPem {
    pub fn new(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            cert: cert_pem.into(),
            key: Zeroizing::new(key_pem.into()),
        }
    }

    pub fn cert_pem(&self) -> &[u8] {
        &self.cert
    }

    pub fn key_pem(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for IdentityPem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityPem")
            .field("cert_len", &self.cert.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Decode every certificate in a PEM buffer, leaf first.
pub fn decode_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, LoadError> {
    let chain = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| LoadError::BadCertificate(e.to_string()))?;

    let leaf = chain
        .first()
        .ok_or_else(|| LoadError::BadCertificate("no certificate in PEM buffer".into()))?;

    x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|e| LoadError::BadCertificate(e.to_string()))?;

    Ok(chain)
}

/// Decode certificates, verify the key against the leaf, and install both
/// into `context`.
///
/// The context is only touched once every check has passed, so a failed
/// load leaves any previously installed identity in place.
pub fn load_identity(
    context: &mut CryptoContext,
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<(), LoadError> {
    let chain = decode_certificates(cert_pem)?;

    let key = PrivateKeyDer::from_pem_slice(key_pem).map_err(|e| LoadError::BadKey(e.to_string()))?;
    let signing_key = context
        .provider()
        .key_provider
        .load_private_key(key)
        .map_err(|e| LoadError::BadKey(e.to_string()))?;

    let certified = CertifiedKey::new(chain, signing_key);
    certified.keys_match().map_err(|e| {
        debug!(error = %e, "private key rejected against leaf certificate");
        LoadError::KeyMismatch
    })?;

    context.install_identity(Arc::new(certified));
    Ok(())
}

/// Hex SHA-256 of a DER certificate.
pub fn fingerprint(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsVersions;
    use crate::test_support::generate_identity;

    fn context() -> CryptoContext {
        CryptoContext::new(TlsVersions::default()).unwrap()
    }

    #[test]
    fn test_matching_pair_loads() {
        let identity = generate_identity();
        let mut ctx = context();

        load_identity(&mut ctx, identity.cert_pem(), identity.key_pem()).unwrap();

        let installed = ctx.identity().unwrap();
        assert_eq!(installed.cert.len(), 1);
    }

    #[test]
    fn test_mismatched_key_rejected() {
        let first = generate_identity();
        let second = generate_identity();
        let mut ctx = context();

        let result = load_identity(&mut ctx, first.cert_pem(), second.key_pem());
        assert!(matches!(result, Err(LoadError::KeyMismatch)));
        assert!(ctx.identity().is_none());
    }

    #[test]
    fn test_failed_reload_keeps_previous_identity() {
        let first = generate_identity();
        let second = generate_identity();
        let mut ctx = context();

        load_identity(&mut ctx, first.cert_pem(), first.key_pem()).unwrap();
        let before = ctx.identity().unwrap().cert[0].clone();

        assert!(load_identity(&mut ctx, second.cert_pem(), first.key_pem()).is_err());
        assert_eq!(ctx.identity().unwrap().cert[0], before);
    }

    #[test]
    fn test_garbage_certificate() {
        let identity = generate_identity();
        let mut ctx = context();

        let result = load_identity(&mut ctx, b"not a certificate", identity.key_pem());
        assert!(matches!(result, Err(LoadError::BadCertificate(_))));
    }

    #[test]
    fn test_corrupt_certificate_body() {
        let identity = generate_identity();
        let mut ctx = context();

        let bogus = "-----BEGIN CERTIFICATE-----\nAAAAAAAA\n-----END CERTIFICATE-----\n";
        let result = load_identity(&mut ctx, bogus.as_bytes(), identity.key_pem());
        assert!(matches!(result, Err(LoadError::BadCertificate(_))));
    }

    #[test]
    fn test_garbage_key() {
        let identity = generate_identity();
        let mut ctx = context();

        let result = load_identity(&mut ctx, identity.cert_pem(), b"not a key");
        assert!(matches!(result, Err(LoadError::BadKey(_))));
    }

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let identity = generate_identity();
        let chain = decode_certificates(identity.cert_pem()).unwrap();

        let fp = fingerprint(chain[0].as_ref());
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, fingerprint(chain[0].as_ref()));
    }

    #[test]
    fn test_debug_redacts_key() {
        let identity = generate_identity();
        let rendered = format!("{:?}", identity);
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("PRIVATE KEY"));
    }
}
