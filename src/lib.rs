//! Non-blocking TCP core: a TLS (or raw) session state machine sitting
//! between a readiness-driven reactor and an application's plaintext
//! handler, in the spirit of `SSLEngine` from Java NIO.
//!
//! The session itself never touches a socket directly except through the
//! [`bridge::SelectorBridge`] contract, so the state machine in
//! [`session`]/[`engine`] can be exercised with [`engine::mock::MockEngine`]
//! without a real network or real cryptography. The concrete pieces that
//! make a running service — [`reactor::Reactor`] (a `mio` event loop) and
//! [`config`] (certificate loading) — are built on top of that contract,
//! not load-bearing for it.
//!
//! # Versioning
//!
//! Rustls is re-exported as `nbio_tls::rustls` so callers can build
//! `ServerConfig`/`ClientConfig` values without an independent `rustls`
//! dependency of their own.

pub mod bridge;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod handler;
pub mod reactor;
pub mod session;

pub use rustls;

pub use bridge::SelectorBridge;
pub use config::{ClientTlsConfig, ReactorConfig, ServerTlsConfig};
pub use error::{Result, TlsCoreError};
pub use handler::{Channel, EventHandler, SessionHandle};
pub use reactor::Reactor;
pub use session::Role;
