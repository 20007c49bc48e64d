//! Crypto context: provider, version policy, identity and trusted peers.
//!
//! One context backs exactly one transport. It is created before the
//! session, outlives it, and is dropped during teardown.

use std::sync::{Arc, Once};

use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, ServerConfig};
use tracing::debug;

use crate::config::TlsVersions;
use crate::error::{LoadError, TransportError};
use crate::identity::decode_certificates;
use crate::verifier::{FixedIdentity, PinnedPeerVerifier};

static PROVIDER_INIT: Once = Once::new();

/// Install the ring provider as the process-wide default, once.
///
/// If another component already installed a provider, that one is kept.
pub fn install_crypto_provider() {
    PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("process crypto provider already installed, keeping it");
        }
    });
}

pub struct CryptoContext {
    provider: Arc<CryptoProvider>,
    versions: TlsVersions,
    identity: Option<Arc<CertifiedKey>>,
    trusted: Vec<CertificateDer<'static>>,
}

impl CryptoContext {
    /// Create a context bound to the process crypto provider.
    ///
    /// Fails if the provider cannot serve the requested protocol versions.
    pub fn new(versions: TlsVersions) -> Result<Self, TransportError> {
        install_crypto_provider();

        let provider = CryptoProvider::get_default().cloned().ok_or_else(|| {
            TransportError::ContextCreationFailed("no process crypto provider".into())
        })?;

        ServerConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(versions.protocol_versions())
            .map_err(|e| TransportError::ContextCreationFailed(e.to_string()))?;

        Ok(Self {
            provider,
            versions,
            identity: None,
            trusted: Vec::new(),
        })
    }

    pub fn provider(&self) -> &Arc<CryptoProvider> {
        &self.provider
    }

    pub fn versions(&self) -> TlsVersions {
        self.versions
    }

    pub fn identity(&self) -> Option<&Arc<CertifiedKey>> {
        self.identity.as_ref()
    }

    pub(crate) fn install_identity(&mut self, identity: Arc<CertifiedKey>) {
        self.identity = Some(identity);
    }

    /// Add the certificates in `pem` to the set of accepted peers.
    pub fn trust_peer_pem(&mut self, pem: &[u8]) -> Result<(), LoadError> {
        let certs = decode_certificates(pem)?;
        self.trusted.extend(certs);
        Ok(())
    }

    /// Certificates a peer may present. Defaults to our own leaf.
    pub fn trusted(&self) -> Vec<CertificateDer<'static>> {
        if !self.trusted.is_empty() {
            return self.trusted.clone();
        }
        self.identity
            .as_ref()
            .and_then(|identity| identity.cert.first().cloned())
            .into_iter()
            .collect()
    }

    fn require_identity(&self) -> Result<Arc<CertifiedKey>, TransportError> {
        self.identity.clone().ok_or_else(|| {
            TransportError::ContextCreationFailed("no identity loaded into context".into())
        })
    }

    fn verifier(&self) -> Arc<PinnedPeerVerifier> {
        Arc::new(PinnedPeerVerifier::new(
            self.trusted(),
            self.provider.clone(),
        ))
    }

    /// Accept-side session configuration. Client certificates are required.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>, TransportError> {
        let identity = self.require_identity()?;

        let mut config = ServerConfig::builder_with_provider(self.provider.clone())
            .with_protocol_versions(self.versions.protocol_versions())
            .map_err(|e| TransportError::ContextCreationFailed(e.to_string()))?
            .with_client_cert_verifier(self.verifier())
            .with_cert_resolver(Arc::new(FixedIdentity::new(identity)));
        // Every transport owns a fresh context, so tickets could never be
        // redeemed.
        config.send_tls13_tickets = 0;

        Ok(Arc::new(config))
    }

    /// Connect-side session configuration.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, TransportError> {
        let identity = self.require_identity()?;

        let config = ClientConfig::builder_with_provider(self.provider.clone())
            .with_protocol_versions(self.versions.protocol_versions())
            .map_err(|e| TransportError::ContextCreationFailed(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(self.verifier())
            .with_client_cert_resolver(Arc::new(FixedIdentity::new(identity)));

        Ok(Arc::new(config))
    }
}
