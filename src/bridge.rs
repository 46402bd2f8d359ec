//! The abstract interface the core requires from the outer I/O loop.
//!
//! Deliberately out of scope for the TLS session state machine itself (see
//! spec §1): this is the contract a concrete reactor must satisfy. The
//! concrete implementation lives in [`crate::reactor::Reactor`].

use crate::engine::Task;
use mio::Token;

/// Re-arm readiness, offload CPU work, and swap the registered handler for a
/// session's `Token`.
///
/// `delink`/`add_handler` exist for contract fidelity with the spec's
/// "atomic swap used at handshake completion" (§6), for bridges that model
/// the handshake/data-phase handoff as a literal swap of two handler
/// objects. This crate's concrete reactor keeps a single table entry per
/// `Token` for the session's whole lifetime and flips an internal `Phase`
/// tag instead (see `session::Phase`), so its own session controller never
/// calls `add_handler`, and calls `delink` exactly once: at final close, to
/// drop the registration (and the `Session`/`Reactor` reference cycle it
/// completes) rather than at the handshake/data-phase boundary.
pub trait SelectorBridge {
    /// Re-arm interest in read readiness for this session. Idempotent.
    fn select_for_read(&self, token: Token);

    /// Re-arm interest in write readiness for this session. Idempotent.
    fn select_for_write(&self, token: Token);

    /// Run a CPU-bound unit of work off the I/O thread. The bridge is
    /// responsible for routing the completion back onto the owning reactor
    /// thread before the session is touched again.
    fn execute(&self, token: Token, task: Box<dyn Task>);

    /// Remove the handler association for `token` from the registry.
    fn delink(&self, token: Token);

    /// (Re-)establish the handler association for `token`.
    fn add_handler(&self, token: Token);

    /// Diagnostic label for the concrete bridge implementation.
    fn name(&self) -> &str;
}
