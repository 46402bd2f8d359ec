//! TLS Engine Adapter: the thin façade the handshake and data-phase drivers
//! speak to. Every call is synchronous and non-blocking.

pub mod rustls_engine;

#[cfg(test)]
pub mod mock;

use crate::buffer::Buffer;
use crate::error::Result;

/// Outcome of a single `wrap`/`unwrap` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// The call completed normally.
    Ok,
    /// `unwrap` needs more ciphertext bytes than `src` currently holds to
    /// complete a record.
    BufferUnderflow,
    /// The destination buffer did not have enough room for the produced
    /// bytes. For `inbound_clear` this is an invariant violation (the
    /// buffer is sized to the engine's packet size by construction).
    BufferOverflow,
    /// The engine has been closed (inbound, outbound, or both).
    Closed,
}

/// The engine's declared next-step requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// The engine needs more ciphertext from the peer before it can proceed.
    NeedUnwrap,
    /// The engine has ciphertext ready to send and needs a wrap call to
    /// extract it.
    NeedWrap,
    /// The engine needs a CPU-bound delegated task run before it can
    /// proceed; call [`TlsEngine::take_delegated_task`].
    NeedTask,
    /// The handshake has just completed. Reported exactly once, on the call
    /// where it transitions from in-progress to complete.
    Finished,
    /// Not currently handshaking (either never started, or `Finished` was
    /// already reported on a previous call).
    NotHandshaking,
}

/// Result of a [`TlsEngine::wrap`] or [`TlsEngine::unwrap`] call.
#[derive(Debug, Clone, Copy)]
pub struct OpResult {
    pub status: EngineStatus,
    pub handshake_status: HandshakeStatus,
    pub bytes_consumed: usize,
    pub bytes_produced: usize,
}

/// A CPU-bound unit of work the engine asks the caller to run off the I/O
/// thread. Running it updates engine-internal state; the caller must call
/// [`TlsEngine::handshake_status`] again afterwards to see the effect.
pub trait Task: Send {
    fn run(self: Box<Self>);
}

impl<F: FnOnce() + Send> Task for F {
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// The opaque TLS primitive the session state machine drives. Implemented
/// concretely by [`rustls_engine::RustlsEngine`]; a scriptable
/// [`mock::MockEngine`] (test-only) exercises the state machine's edge
/// cases without real cryptography.
pub trait TlsEngine {
    /// Packet buffer size this engine requires for its buffers (the
    /// `inbound_encrypted`/`inbound_clear`/`outbound_encrypted` capacity).
    fn packet_buffer_size(&self) -> usize;

    /// Start the handshake. For engines that begin handshaking implicitly
    /// at construction (e.g. `rustls`) this is a no-op.
    fn begin_handshake(&mut self);

    /// Consume plaintext from `src` (possibly zero bytes, for handshake
    /// records) and produce ciphertext into `dst`.
    fn wrap(&mut self, src: &mut Buffer, dst: &mut Buffer) -> Result<OpResult>;

    /// Consume ciphertext from `src` and produce plaintext into `dst`.
    fn unwrap(&mut self, src: &mut Buffer, dst: &mut Buffer) -> Result<OpResult>;

    /// Signal that no more inbound bytes are coming (peer EOF without a
    /// clean TLS close).
    fn close_inbound(&mut self);

    /// Request a clean shutdown: queue `close_notify` for the next `wrap`.
    fn close_outbound(&mut self);

    /// True once outbound has nothing left to send and `close_notify` (if
    /// applicable) has already gone out.
    fn is_outbound_done(&self) -> bool;

    /// The engine's current next-step requirement. `&mut self` because
    /// implementations latch the one-shot `Finished` status here (it must
    /// be reported exactly once, then fall back to `NotHandshaking`).
    fn handshake_status(&mut self) -> HandshakeStatus;

    /// Take the pending delegated task, if any. Returns `None` unless
    /// `handshake_status()` just reported `NeedTask`.
    fn take_delegated_task(&mut self) -> Option<Box<dyn Task>>;
}
