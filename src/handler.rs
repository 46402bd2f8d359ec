//! Application event handler contract (spec §6) and the two small handles
//! passed into it: [`Channel`] (plaintext I/O) and [`SessionHandle`]
//! (readiness re-arming and close).

use crate::session::{self, SessionRef};
use mio::Token;
use std::io;
use std::rc::Rc;

/// Implemented by applications. Every callback is invoked on the reactor
/// thread that owns the session; none of them may block.
pub trait EventHandler {
    /// Exactly once, after an inbound handshake completes (or immediately,
    /// for a plaintext session accepted by the listener).
    fn on_accept(&self, channel: Channel, session: SessionHandle);

    /// Exactly once, after an outbound handshake completes (or immediately,
    /// for a plaintext session).
    fn on_connect(&self, channel: Channel, session: SessionHandle);

    /// Invoked whenever readable plaintext is available. The handler should
    /// pull bytes from `channel` until exhausted and re-arm via
    /// `session_handle.select_for_read()` if it wants more.
    fn on_read(&self, channel: Channel);

    /// Invoked when the channel can accept more bytes. The handler writes
    /// as much as it has and re-arms via `select_for_write()` if more
    /// remains.
    fn on_write(&self, channel: Channel);

    /// Last call before teardown. Never followed by another callback for
    /// this channel.
    fn closing(&self, channel: Channel);
}

/// The plaintext I/O surface handed to the application. Backed by the same
/// `Session` the reactor drives; reading/writing here only ever touches the
/// `inbound_clear`/data-phase-write path, never TLS internals directly.
#[derive(Clone)]
pub struct Channel {
    session: SessionRef,
}

impl Channel {
    pub(crate) fn new(session: SessionRef) -> Self {
        Self { session }
    }

    /// Pull decrypted (or, for a plaintext session, raw) bytes out of the
    /// inbound buffer. Returns `Ok(0)` when nothing is currently available;
    /// that is not EOF — EOF is signalled via `closing`, not a read return.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.session.borrow_mut().read_plain(buf)
    }

    /// Queue plaintext for transmission. May accept fewer bytes than
    /// `buf.len()`; the caller re-arms for write readiness via
    /// `SessionHandle::select_for_write` to send the rest.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        self.session.borrow_mut().write_plain(buf)
    }
}

/// Readiness re-arming and close, scoped to one session. The application
/// must retain this (per spec §6) to call `select_for_read`/`select_for_write`
/// later, outside the callback that handed it out.
#[derive(Clone)]
pub struct SessionHandle {
    session: SessionRef,
    token: Token,
}

impl SessionHandle {
    pub(crate) fn new(session: SessionRef, token: Token) -> Self {
        Self { session, token }
    }

    pub fn select_for_read(&self) {
        let bridge = self.session.borrow().bridge.clone();
        bridge.select_for_read(self.token);
    }

    pub fn select_for_write(&self) {
        let bridge = self.session.borrow().bridge.clone();
        bridge.select_for_write(self.token);
    }

    /// Begin closing this session. Idempotent.
    pub fn close(&self) {
        session::close(&self.session);
    }
}
