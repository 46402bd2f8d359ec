//! Error taxonomy for the TLS session core.
//!
//! Transient conditions (`BUFFER_UNDERFLOW`, a partial socket write) are not
//! errors at all — they are represented as ordinary [`crate::engine::EngineStatus`]
//! values and drive re-selection. Everything that reaches `TlsCoreError` is
//! fatal for the session and funnels through [`crate::session::Session::close`].

use std::io;

/// Fatal conditions that terminate a session.
#[derive(Debug, thiserror::Error)]
pub enum TlsCoreError {
    /// The TLS engine reported a protocol-level failure (bad record, failed
    /// certificate verification, alert from the peer, etc).
    #[error("TLS protocol error: {0}")]
    Protocol(#[from] rustls::Error),

    /// The underlying socket failed.
    #[error("socket I/O error: {0}")]
    Io(#[from] io::Error),

    /// A programmer-error invariant was violated: `BUFFER_OVERFLOW` on
    /// unwrap, a handshake-phase wrap that consumed plaintext or produced no
    /// ciphertext, or a handshake status of `NotHandshaking` observed where
    /// the driver expected to still be handshaking.
    #[error("internal invariant violated: {0}")]
    Invariant(&'static str),
}

pub type Result<T> = std::result::Result<T, TlsCoreError>;
