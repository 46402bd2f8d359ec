//! Data-Phase Handler: plaintext read/write once the handshake has
//! completed (spec §4.4). Also carries the minimal mid-session
//! renegotiation path (spec §9 Design Notes, Open Question): a
//! renegotiation never re-fires `on_accept`/`on_connect` — it just borrows
//! the handshake driver's wrap/unwrap/offload primitives and resumes data
//! flow silently once finished.

use super::handshake;
use super::{Session, SessionRef};
use crate::buffer::Buffer;
use crate::engine::{EngineStatus, HandshakeStatus, OpResult};
use crate::error::{Result, TlsCoreError};
use crate::handler::Channel;
use std::io::{self, ErrorKind, Read, Write};
use std::rc::Rc;

/// Application write. Wraps `buf` as a single plaintext record, appends the
/// ciphertext to `outbound_encrypted`, and attempts an immediate flush.
/// Returns the number of plaintext bytes accepted (possibly fewer than
/// `buf.len()`, possibly zero if a previous write is still draining).
pub fn write(session: &mut Session, buf: &[u8]) -> io::Result<usize> {
    flush_locked(session)?;
    if !session.buffers.outbound_encrypted.is_empty() || buf.is_empty() {
        return Ok(0);
    }

    let mut src = Buffer::new(buf.len());
    src.write_all(buf)?;
    src.flip();

    session.buffers.outbound_encrypted.clear();
    let Session { engine, buffers, .. } = session;
    let engine = engine
        .as_mut()
        .expect("data_phase::write requires a TLS engine");
    let result = engine
        .wrap(&mut src, &mut buffers.outbound_encrypted)
        .map_err(to_io_error)?;
    buffers.outbound_encrypted.flip();

    match result.status {
        EngineStatus::Ok => {}
        EngineStatus::BufferOverflow => {
            return Err(to_io_error(TlsCoreError::Invariant(
                "BUFFER_OVERFLOW on data-phase wrap",
            )))
        }
        EngineStatus::Closed => {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "outbound already closed"))
        }
        EngineStatus::BufferUnderflow => {}
    }

    flush_locked(session)?;
    Ok(result.bytes_consumed)
}

fn flush_locked(session: &mut Session) -> io::Result<bool> {
    loop {
        if session.buffers.outbound_encrypted.is_empty() {
            return Ok(true);
        }
        match session.socket.write(session.buffers.outbound_encrypted.data()) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "peer closed during data-phase flush",
                ))
            }
            Ok(n) => session.buffers.outbound_encrypted.consume(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                session.bridge.select_for_write(session.token);
                return Ok(false);
            }
            Err(e) => return Err(e),
        }
    }
}

fn to_io_error(e: TlsCoreError) -> io::Error {
    io::Error::new(ErrorKind::Other, e.to_string())
}

/// Read readiness: pull ciphertext, unwrap whatever complete records are
/// available into `inbound_clear`, and invoke `on_read` once if anything
/// became available. A `NeedWrap`/`NeedUnwrap`/`NeedTask` status mid-stream
/// means the peer started a renegotiation; handled transparently, no
/// application callback for it.
pub fn readable(session: &SessionRef) -> Result<()> {
    if session.borrow().task_in_flight() {
        return Ok(());
    }
    if session.borrow().engine.is_none() {
        return readable_plain(session);
    }

    {
        let mut s = session.borrow_mut();
        match s.socket.read(s.buffers.inbound_encrypted.space()) {
            Ok(0) => {
                drop(s);
                return handle_peer_eof(session);
            }
            Ok(n) => s.buffers.inbound_encrypted.commit(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                s.bridge.select_for_read(s.token);
                return Ok(());
            }
            Err(e) => return Err(TlsCoreError::Io(e)),
        }
        s.buffers.inbound_encrypted.flip();
        s.buffers.inbound_clear.compact();
    }

    let mut produced_any = false;
    loop {
        let result = call_unwrap(session)?;
        produced_any |= result.bytes_produced > 0;

        match result.status {
            EngineStatus::Ok => match result.handshake_status {
                HandshakeStatus::NotHandshaking => {
                    if result.bytes_produced == 0
                        && !session.borrow().buffers.inbound_encrypted.has_remaining()
                    {
                        break;
                    }
                    if result.bytes_produced == 0 {
                        continue;
                    }
                }
                renegotiating => {
                    renegotiate_step(session, renegotiating)?;
                    break;
                }
            },
            EngineStatus::BufferUnderflow => {
                let s = session.borrow();
                s.bridge.select_for_read(s.token);
                break;
            }
            EngineStatus::Closed => {
                super::close(session);
                return Ok(());
            }
            EngineStatus::BufferOverflow => {
                return Err(TlsCoreError::Invariant(
                    "BUFFER_OVERFLOW on data-phase unwrap: inbound_clear undersized",
                ))
            }
        }

        if !session.borrow().buffers.inbound_encrypted.has_remaining() {
            break;
        }
    }

    session.borrow_mut().buffers.inbound_encrypted.compact();
    session.borrow_mut().buffers.inbound_clear.flip();

    if produced_any {
        let channel = Channel::new(Rc::clone(session));
        let app = session.borrow().app.clone();
        app.on_read(channel);
    }
    Ok(())
}

fn call_unwrap(session: &SessionRef) -> Result<OpResult> {
    let mut s = session.borrow_mut();
    let Session { engine, buffers, .. } = &mut *s;
    let engine = engine.as_mut().expect("data_phase::readable requires a TLS engine");
    engine.unwrap(&mut buffers.inbound_encrypted, &mut buffers.inbound_clear)
}

/// Read readiness for a plaintext (no-engine) session: raw socket bytes go
/// straight into `inbound_clear` for the application to read back out via
/// `Channel`, with no engine involved at all. Mirrors `write_plain`'s
/// `engine.is_none()` branch (`session/mod.rs`) on the read side.
fn readable_plain(session: &SessionRef) -> Result<()> {
    let produced = {
        let mut s = session.borrow_mut();
        s.buffers.inbound_clear.compact();
        match s.socket.read(s.buffers.inbound_clear.space()) {
            Ok(0) => {
                drop(s);
                return handle_peer_eof(session);
            }
            Ok(n) => {
                s.buffers.inbound_clear.commit(n);
                n
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                s.buffers.inbound_clear.flip();
                s.bridge.select_for_read(s.token);
                return Ok(());
            }
            Err(e) => return Err(TlsCoreError::Io(e)),
        }
    };
    session.borrow_mut().buffers.inbound_clear.flip();

    if produced > 0 {
        let channel = Channel::new(Rc::clone(session));
        let app = session.borrow().app.clone();
        app.on_read(channel);
    }
    Ok(())
}

fn handle_peer_eof(session: &SessionRef) -> Result<()> {
    {
        let mut s = session.borrow_mut();
        if let Some(engine) = s.engine.as_mut() {
            engine.close_inbound();
        }
    }
    super::close(session);
    Ok(())
}

/// Write readiness: drain whatever is left in `outbound_encrypted`; once
/// fully flushed, let the application push more via `on_write`.
pub fn writable(session: &SessionRef) -> Result<()> {
    let flushed = {
        let mut s = session.borrow_mut();
        flush_locked(&mut s).map_err(TlsCoreError::Io)?
    };
    if flushed {
        let channel = Channel::new(Rc::clone(session));
        let app = session.borrow().app.clone();
        app.on_write(channel);
    }
    Ok(())
}

/// Resume a renegotiation after its delegated task completed, reported via
/// `session::on_task_complete` while `phase == Data`.
pub fn on_task_complete(session: &SessionRef) {
    let status = {
        let mut s = session.borrow_mut();
        match s.engine.as_mut() {
            Some(engine) => engine.handshake_status(),
            None => return,
        }
    };
    if let Err(e) = renegotiate_step(session, status) {
        log::warn!("error resuming renegotiation after delegated task: {e}");
        super::close(session);
    }
}

fn renegotiate_step(session: &SessionRef, status: HandshakeStatus) -> Result<()> {
    match status {
        HandshakeStatus::Finished | HandshakeStatus::NotHandshaking => Ok(()),
        HandshakeStatus::NeedWrap => {
            handshake::wrap_step(session)?;
            Ok(())
        }
        HandshakeStatus::NeedUnwrap => handshake::unwrap_step(session),
        HandshakeStatus::NeedTask => handshake::offload_task(session),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::session::test_support::session_with_engine;
    use crate::session::{Phase, Role};
    use std::io::Read as _;

    /// An `Ok`/`NotHandshaking` result that consumes the whole input it was
    /// given, so a test's `unwrap` loop terminates after one call instead of
    /// spinning on a `src` buffer the mock never drains.
    fn ok_result(consumed: usize, produced: usize) -> OpResult {
        OpResult {
            status: EngineStatus::Ok,
            handshake_status: HandshakeStatus::NotHandshaking,
            bytes_consumed: consumed,
            bytes_produced: produced,
        }
    }

    /// Build a session already past the handshake, for data-phase tests.
    fn data_session(
        engine: MockEngine,
    ) -> (
        super::super::SessionRef,
        std::rc::Rc<crate::session::test_support::RecordingBridge>,
        std::rc::Rc<crate::session::test_support::RecordingHandler>,
        mio::net::TcpStream,
    ) {
        let (session, bridge, handler, peer) = session_with_engine(Role::Server, Box::new(engine));
        session.borrow_mut().phase = Phase::Data;
        (session, bridge, handler, peer)
    }

    #[test]
    fn write_wraps_and_flushes_to_the_socket() {
        let engine = MockEngine::new(4096).script_wrap([OpResult {
            status: EngineStatus::Ok,
            handshake_status: HandshakeStatus::NotHandshaking,
            bytes_consumed: 5,
            bytes_produced: 5,
        }]);
        let (session, _bridge, _handler, mut peer) = data_session(engine);

        let n = {
            let mut s = session.borrow_mut();
            write(&mut s, b"hello").unwrap()
        };
        assert_eq!(n, 5);

        let mut buf = [0u8; 16];
        let read = peer.read(&mut buf).unwrap();
        assert_eq!(&buf[..read], &[0xAAu8; 5]);
    }

    #[test]
    fn readable_fires_on_read_once_when_plaintext_is_produced() {
        let engine = MockEngine::new(4096).script_unwrap([ok_result(10, 6)]);
        let (session, _bridge, handler, mut peer) = data_session(engine);

        peer.write_all(b"ciphertext").unwrap();
        readable(&session).unwrap();

        assert_eq!(handler.reads.get(), 1);
    }

    #[test]
    fn closed_status_on_unwrap_closes_the_session() {
        let engine = MockEngine::new(4096).script_unwrap([OpResult {
            status: EngineStatus::Closed,
            handshake_status: HandshakeStatus::NotHandshaking,
            bytes_consumed: 0,
            bytes_produced: 0,
        }]);
        let (session, _bridge, handler, mut peer) = data_session(engine);

        peer.write_all(b"close_notify").unwrap();
        readable(&session).unwrap();

        assert_eq!(handler.closes.get(), 1);
        assert!(!session.borrow().is_open());
    }

    #[test]
    fn peer_eof_in_data_phase_closes_session() {
        let engine = MockEngine::new(4096);
        let (session, _bridge, handler, peer) = data_session(engine);

        drop(peer);
        readable(&session).unwrap();

        assert_eq!(handler.closes.get(), 1);
    }

    #[test]
    fn plaintext_session_readable_does_not_touch_the_engine() {
        use crate::session::test_support::session_plain;

        let (session, _bridge, handler, mut peer) = session_plain(Role::Server);
        session.borrow_mut().phase = Phase::Data;
        assert!(session.borrow().engine.is_none());

        peer.write_all(b"raw bytes, no tls").unwrap();
        readable(&session).unwrap();

        assert_eq!(handler.reads.get(), 1);
        let mut buf = [0u8; 32];
        let n = {
            let mut s = session.borrow_mut();
            s.read_plain(&mut buf).unwrap()
        };
        assert_eq!(&buf[..n], b"raw bytes, no tls");
    }

    #[test]
    fn renegotiation_mid_stream_does_not_reannounce() {
        // Peer's record mid-stream reports NeedWrap: the engine wants to send
        // its own handshake message as part of a renegotiation.
        let engine = MockEngine::new(4096)
            .script_unwrap([OpResult {
                status: EngineStatus::Ok,
                handshake_status: HandshakeStatus::NeedWrap,
                bytes_consumed: 0,
                bytes_produced: 0,
            }])
            .script_wrap([OpResult {
                status: EngineStatus::Ok,
                handshake_status: HandshakeStatus::NotHandshaking,
                bytes_consumed: 0,
                bytes_produced: 4,
            }]);
        let (session, _bridge, handler, mut peer) = data_session(engine);

        peer.write_all(b"reneg-trigger").unwrap();
        readable(&session).unwrap();

        // No accept/connect callback for a renegotiation, and the session
        // stays in the data phase throughout.
        assert_eq!(handler.accepts.get(), 0);
        assert_eq!(handler.connects.get(), 0);
        assert_eq!(session.borrow().phase, Phase::Data);
    }
}
