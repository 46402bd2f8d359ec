//! Session Controller: lifecycle, handoff from handshake to data phase, and
//! close coordination (spec §3, §4.5).
//!
//! `Session` itself only owns state; anything that must invoke an
//! application callback (`on_accept`/`on_connect`/`closing`) is a free
//! function taking `&SessionRef` here, because constructing a
//! [`crate::handler::Channel`] or [`crate::handler::SessionHandle`] requires
//! the shared `Rc`, not just `&mut Session`.

pub mod data_phase;
pub mod handshake;

#[cfg(test)]
pub(crate) mod test_support;

use crate::bridge::SelectorBridge;
use crate::buffer::BufferTriad;
use crate::engine::TlsEngine;
use crate::handler::{Channel, EventHandler, SessionHandle};
use mio::net::TcpStream;
use mio::Token;
use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared handle to a session, held by the reactor's handler table and by
/// every `Channel`/`SessionHandle` issued to the application for it.
/// Single-threaded (`Rc<RefCell<_>>`) by design: a session never leaves the
/// reactor thread it was created on.
pub type SessionRef = Rc<RefCell<Session>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Tagged variant standing in for "handshake handler" vs. "data-phase
/// handler". A single `Session` is always the thing registered with the
/// selector bridge; `Phase` just tells `readable`/`writable` which driver to
/// run. This is what keeps the handoff atomic (see `bridge` module docs):
/// there is no window where the registry points at neither or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Handshaking,
    Data,
}

pub struct Session {
    pub role: Role,
    pub engine: Option<Box<dyn TlsEngine>>,
    pub buffers: BufferTriad,
    pub open: Arc<AtomicBool>,
    pub token: Token,
    pub socket: TcpStream,
    pub app: Rc<dyn EventHandler>,
    pub bridge: Rc<dyn SelectorBridge>,
    pub phase: Phase,
    /// `on_accept`/`on_connect` has already fired.
    announced: bool,
    /// `close()` has been called; further calls are no-ops.
    closing: bool,
    /// A delegated task has been submitted and its continuation hasn't come
    /// back yet. Guards the spec's "at most one delegated task in flight per
    /// session" ordering (spec §5/§9): while set, the handshake/data-phase
    /// drivers must not touch the engine again.
    task_in_flight: bool,
}

impl Session {
    /// Construct a TLS session and kick off its handshake. `role` picks
    /// which of `on_accept`/`on_connect` fires on completion.
    pub fn new_tls(
        role: Role,
        mut engine: Box<dyn TlsEngine>,
        socket: TcpStream,
        token: Token,
        app: Rc<dyn EventHandler>,
        bridge: Rc<dyn SelectorBridge>,
    ) -> SessionRef {
        let buffers = BufferTriad::new(engine.packet_buffer_size());
        engine.begin_handshake();
        Rc::new(RefCell::new(Session {
            role,
            engine: Some(engine),
            buffers,
            open: Arc::new(AtomicBool::new(true)),
            token,
            socket,
            app,
            bridge,
            phase: Phase::Handshaking,
            announced: false,
            closing: false,
            task_in_flight: false,
        }))
    }

    /// Construct a plaintext (no-TLS) session, starting directly in the
    /// data phase. Grounded on the teacher's "if TLS is not configured,
    /// pass data straight through" branch.
    pub fn new_plain(
        role: Role,
        socket: TcpStream,
        token: Token,
        app: Rc<dyn EventHandler>,
        bridge: Rc<dyn SelectorBridge>,
        buffer_size: usize,
    ) -> SessionRef {
        Rc::new(RefCell::new(Session {
            role,
            engine: None,
            buffers: BufferTriad::new(buffer_size),
            open: Arc::new(AtomicBool::new(true)),
            token,
            socket,
            app,
            bridge,
            phase: Phase::Data,
            announced: false,
            closing: false,
            task_in_flight: false,
        }))
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Whether a delegated task submitted for this session is still
    /// outstanding. Set by [`handshake::offload_task`], cleared by
    /// [`on_task_complete`].
    pub(crate) fn task_in_flight(&self) -> bool {
        self.task_in_flight
    }

    pub(crate) fn set_task_in_flight(&mut self, in_flight: bool) {
        self.task_in_flight = in_flight;
    }

    /// A snapshot of the open flag, cheap to clone and safe to check from a
    /// delegated-task continuation running on another thread.
    pub fn open_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.open)
    }

    pub fn has_announced(&self) -> bool {
        self.announced
    }

    /// Pull plaintext out of `inbound_clear` for the application's `Channel`.
    pub fn read_plain(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.buffers.inbound_clear.read(buf)
    }

    /// Queue application plaintext for the data phase to wrap and flush, or
    /// (plaintext session) write it straight to the socket.
    pub fn write_plain(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.engine.is_some() {
            data_phase::write(self, buf)
        } else {
            self.socket.write(buf)
        }
    }
}

/// Handoff: called exactly once, the turn `handshake::drive` observes
/// `Finished`/`NotHandshaking`. Flips `Phase` to `Data` and fires
/// `on_accept`/`on_connect`.
pub fn complete_handshake(session: &SessionRef) {
    let (role, token) = {
        let mut s = session.borrow_mut();
        debug_assert!(!s.has_announced());
        s.phase = Phase::Data;
        s.announced = true;
        (s.role, s.token)
    };

    let channel = Channel::new(Rc::clone(session));
    let handle = SessionHandle::new(Rc::clone(session), token);
    let app = session.borrow().app.clone();
    match role {
        Role::Client => app.on_connect(channel, handle),
        Role::Server => app.on_accept(channel, handle),
    }
}

/// Announce a plaintext session (no handshake to wait for): called by the
/// reactor immediately after registering it. Mirrors the second half of
/// [`complete_handshake`] without the phase flip, since `new_plain` sessions
/// already start in `Phase::Data`.
pub fn announce_plain(session: &SessionRef) {
    let (role, token) = {
        let mut s = session.borrow_mut();
        debug_assert!(!s.has_announced());
        s.announced = true;
        (s.role, s.token)
    };

    let channel = Channel::new(Rc::clone(session));
    let handle = SessionHandle::new(Rc::clone(session), token);
    let app = session.borrow().app.clone();
    match role {
        Role::Client => app.on_connect(channel, handle),
        Role::Server => app.on_accept(channel, handle),
    }
}

/// `close()` is idempotent (spec §8 property 5): guarded by `closing`. If
/// `outbound_encrypted` still has bytes, defer until the write-drain
/// continuation observes it empty (spec §8 property 6).
pub fn close(session: &SessionRef) {
    let should_shutdown = {
        let mut s = session.borrow_mut();
        if s.closing {
            return;
        }
        s.closing = true;
        if !s.buffers.outbound_encrypted.is_empty() {
            s.bridge.select_for_write(s.token);
            false
        } else {
            true
        }
    };
    if should_shutdown {
        do_shutdown(session);
    }
}

/// Run the actual shutdown sequence once `outbound_encrypted` is known to be
/// empty. Any TLS error proceeds straight to raw-socket close without retry
/// (spec §4.5).
pub fn do_shutdown(session: &SessionRef) {
    let outbound_done = {
        let mut s = session.borrow_mut();
        if let Some(engine) = s.engine.as_mut() {
            engine.close_outbound();
            engine.is_outbound_done()
        } else {
            true
        }
    };

    if !outbound_done {
        if let Err(e) = handshake::wrap_step(session) {
            log::warn!("error producing close_notify, closing raw socket anyway: {e}");
        }
    }

    finish_close(session);
}

fn finish_close(session: &SessionRef) {
    let token = {
        let mut s = session.borrow_mut();
        s.open.store(false, Ordering::Release);
        let _ = s.socket.shutdown(std::net::Shutdown::Both);
        s.token
    };
    let (bridge, app) = {
        let s = session.borrow();
        (s.bridge.clone(), s.app.clone())
    };
    bridge.delink(token);
    app.closing(Channel::new(Rc::clone(session)));
}

/// Single entry point the reactor calls on read readiness. A pending close
/// takes priority over phase dispatch only in the sense that `closing` is
/// driven purely by `outbound_encrypted`, which read readiness never
/// touches, so this just forwards to the current phase's reader.
pub fn on_readable(session: &SessionRef) -> crate::error::Result<()> {
    let phase = session.borrow().phase;
    match phase {
        Phase::Handshaking => handshake::readable(session),
        Phase::Data => data_phase::readable(session),
    }
}

/// Single entry point the reactor calls on write readiness. A session mid
/// `close()` (waiting for `outbound_encrypted` to drain) is serviced first,
/// regardless of phase, since that drain is what `do_shutdown` is blocked
/// on.
pub fn on_writable(session: &SessionRef) -> crate::error::Result<()> {
    let closing = session.borrow().closing;
    if closing {
        if handshake::flush_outbound(session)? {
            do_shutdown(session);
        }
        return Ok(());
    }
    let phase = session.borrow().phase;
    match phase {
        Phase::Handshaking => handshake::writable(session),
        Phase::Data => data_phase::writable(session),
    }
}

/// Called by the reactor once a delegated task's completion has been
/// observed on the reactor thread (via the `mio::Waker`-signalled channel).
/// A no-op if the session closed while the task was running.
pub fn on_task_complete(session: &SessionRef) {
    if !session.borrow().is_open() {
        return;
    }
    session.borrow_mut().set_task_in_flight(false);
    let phase = session.borrow().phase;
    match phase {
        Phase::Handshaking => {
            if let Err(e) = handshake::drive(session) {
                log::warn!("handshake driver error after delegated task: {e}");
                close(session);
            }
        }
        Phase::Data => data_phase::on_task_complete(session),
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::session_with_engine;
    use super::*;
    use crate::engine::mock::MockEngine;

    /// `close()` with unflushed `outbound_encrypted` bytes must not touch the
    /// raw socket until the write-drain continuation observes it empty.
    #[test]
    fn close_with_pending_write_defers_socket_teardown() {
        let engine = MockEngine::new(4096);
        let (session, bridge, handler, mut peer) = session_with_engine(Role::Server, Box::new(engine));
        session.borrow_mut().phase = Phase::Data;
        {
            let mut s = session.borrow_mut();
            s.buffers.outbound_encrypted.clear();
            s.buffers.outbound_encrypted.put(b"pending-ciphertext");
            s.buffers.outbound_encrypted.flip();
        }

        close(&session);
        assert!(session.borrow().is_open(), "socket must stay open while bytes remain unflushed");
        assert_eq!(bridge.writes_armed.get(), 1);
        assert_eq!(handler.closes.get(), 0);

        on_writable(&session).unwrap();
        assert!(!session.borrow().is_open());
        assert_eq!(handler.closes.get(), 1);

        let mut buf = [0u8; 32];
        let n = peer.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pending-ciphertext");
    }

    /// A second `close()` call is a no-op once the first has already begun
    /// tearing the session down.
    #[test]
    fn close_is_idempotent() {
        let engine = MockEngine::new(4096);
        let (session, _bridge, handler, _peer) = session_with_engine(Role::Server, Box::new(engine));
        session.borrow_mut().phase = Phase::Data;

        close(&session);
        close(&session);

        assert_eq!(handler.closes.get(), 1);
        assert!(!session.borrow().is_open());
    }
}
