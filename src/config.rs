//! Runtime configuration: TLS roles, certificate loading, and the ambient
//! knobs (`delegated_task_threads`, plaintext buffer size) a [`Reactor`]
//! needs at construction.
//!
//! The PEM-loading helpers are grounded on the teacher's `tests/tls.rs`
//! `Configs::gen()` (`rustls_pemfile::certs`/`private_key`, `RootCertStore`,
//! `ServerConfig::builder().with_no_client_auth().with_single_cert(...)`,
//! `ClientConfig::builder().with_root_certificates(...).with_no_client_auth()`),
//! promoted from a test fixture into part of the crate's public surface
//! since real callers need to load certificates too, not just tests.
//!
//! [`Reactor`]: crate::reactor::Reactor

use crate::engine::rustls_engine::{RustlsClientEngine, RustlsServerEngine};
use crate::engine::TlsEngine;
use crate::error::{Result, TlsCoreError};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::io::BufRead;
use std::sync::Arc;

/// Server-side TLS configuration: one certificate chain and key, reused to
/// build a fresh [`TlsEngine`] per accepted connection.
#[derive(Clone)]
pub struct ServerTlsConfig {
    rustls: Arc<ServerConfig>,
}

impl ServerTlsConfig {
    pub fn new(rustls: Arc<ServerConfig>) -> Self {
        Self { rustls }
    }

    /// Build from a PEM certificate chain and a PEM private key, with no
    /// client certificate authentication.
    pub fn from_pem(cert_chain_pem: &mut dyn BufRead, key_pem: &mut dyn BufRead) -> Result<Self> {
        let certificate_chain = load_certs(cert_chain_pem)?;
        let private_key = load_private_key(key_pem)?;
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certificate_chain, private_key)
            .map_err(TlsCoreError::Protocol)?;
        Ok(Self::new(Arc::new(config)))
    }

    /// A fresh [`TlsEngine`] for one accepted connection.
    pub fn new_engine(&self) -> Result<Box<dyn TlsEngine>> {
        let conn = rustls::ServerConnection::new(Arc::clone(&self.rustls))
            .map_err(TlsCoreError::Protocol)?;
        Ok(Box::new(RustlsServerEngine::new(conn)))
    }
}

/// Client-side TLS configuration: a root store plus the `ServerName` used
/// for SNI and certificate verification.
#[derive(Clone)]
pub struct ClientTlsConfig {
    rustls: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

impl ClientTlsConfig {
    pub fn new(rustls: Arc<ClientConfig>, server_name: ServerName<'static>) -> Self {
        Self {
            rustls,
            server_name,
        }
    }

    /// Build from a PEM root certificate bundle and the name to verify the
    /// peer against.
    pub fn from_pem_roots(root_certs_pem: &mut dyn BufRead, server_name: &str) -> Result<Self> {
        let chain = load_certs(root_certs_pem)?;
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(chain);
        if added == 0 {
            return Err(TlsCoreError::Invariant(
                "no parsable root certificates in PEM input",
            ));
        }
        if ignored > 0 {
            log::warn!("{ignored} root certificate(s) in PEM input were not parsable");
        }
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TlsCoreError::Invariant("invalid server name for SNI"))?;
        Ok(Self::new(Arc::new(config), server_name))
    }

    /// A fresh [`TlsEngine`] for one outbound connection.
    pub fn new_engine(&self) -> Result<Box<dyn TlsEngine>> {
        let conn =
            rustls::ClientConnection::new(Arc::clone(&self.rustls), self.server_name.clone())
                .map_err(TlsCoreError::Protocol)?;
        Ok(Box::new(RustlsClientEngine::new(conn)))
    }
}

fn load_certs(pem: &mut dyn BufRead) -> Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(TlsCoreError::Io)
}

fn load_private_key(pem: &mut dyn BufRead) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(pem)
        .map_err(TlsCoreError::Io)?
        .ok_or(TlsCoreError::Invariant(
            "no private key found in PEM input",
        ))
}

/// Ambient knobs for a [`Reactor`][crate::reactor::Reactor]: how many
/// threads service delegated tasks, and the buffer size used for
/// plaintext (non-TLS) sessions, which have no engine to dictate one.
#[derive(Debug, Clone, Copy)]
pub struct ReactorConfig {
    pub delegated_task_threads: usize,
    pub plain_buffer_size: usize,
    pub events_capacity: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            delegated_task_threads: 2,
            plain_buffer_size: 16 * 1024,
            events_capacity: 1024,
        }
    }
}
