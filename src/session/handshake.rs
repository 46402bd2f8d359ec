//! Handshake Handler: drives `begin_handshake` to `Finished`, arbitrating
//! between read, wrap, delegated-task, and re-selection (spec §4.2, §4.3).
//!
//! Grounded on the teacher's `process()` loop shape (`src/client.rs`,
//! `src/server.rs`: "ServerConnection -> ext.wr", "ext.rd -> ServerConnection",
//! looping until nothing is left to do) but restructured around the
//! explicit `HandshakeStatus` dispatch table the spec calls for, instead of
//! branching on `PipeBuf` buffer state.

use super::{Session, SessionRef};
use crate::buffer::Buffer;
use crate::engine::{EngineStatus, HandshakeStatus, Task};
use crate::error::{Result, TlsCoreError};
use std::io::{ErrorKind, Read, Write};

/// `on_accept`/`on_connect` both call `begin_handshake` (already done at
/// `Session` construction) then `drive`.
pub fn on_accept(session: &SessionRef) -> Result<()> {
    drive(session)
}

pub fn on_connect(session: &SessionRef) -> Result<()> {
    drive(session)
}

pub fn readable(session: &SessionRef) -> Result<()> {
    unwrap_step(session)
}

/// `on_write → if flush_data() then drive`.
pub fn writable(session: &SessionRef) -> Result<()> {
    if flush_outbound(session)? {
        drive(session)
    } else {
        Ok(())
    }
}

/// The main handshake loop (spec §4.2 table). Exits as soon as it has taken
/// an action that requires waiting for something external (more read data,
/// write readiness, or a delegated task).
pub fn drive(session: &SessionRef) -> Result<()> {
    if session.borrow().task_in_flight() {
        return Ok(());
    }
    loop {
        let status = {
            let mut s = session.borrow_mut();
            engine_mut(&mut s).handshake_status()
        };

        match status {
            HandshakeStatus::Finished | HandshakeStatus::NotHandshaking => {
                super::complete_handshake(session);
                return Ok(());
            }
            HandshakeStatus::NeedTask => {
                offload_task(session)?;
                return Ok(());
            }
            HandshakeStatus::NeedUnwrap => {
                unwrap_step(session)?;
                return Ok(());
            }
            HandshakeStatus::NeedWrap => {
                let pending = {
                    let s = session.borrow();
                    !s.buffers.outbound_encrypted.is_empty()
                };
                if pending {
                    // Don't clobber bytes still waiting to flush; a
                    // write-readiness event will drain them first.
                    return Ok(());
                }
                if wrap_step(session)? {
                    continue;
                } else {
                    return Ok(());
                }
            }
        }
    }
}

/// Read ciphertext, unwrap as many complete records as are available, and
/// dispatch on the resulting status (spec §4.2 `unwrap_step`).
pub(crate) fn unwrap_step(session: &SessionRef) -> Result<()> {
    if session.borrow().task_in_flight() {
        return Ok(());
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

    let mut result = call_unwrap(session)?;
    while result.status == EngineStatus::Ok
        && result.handshake_status == HandshakeStatus::NeedUnwrap
        && result.bytes_produced == 0
        && session.borrow().buffers.inbound_encrypted.has_remaining()
    {
        result = call_unwrap(session)?;
    }
    if result.status == EngineStatus::Ok && session.borrow().buffers.inbound_encrypted.has_remaining()
    {
        result = call_unwrap(session)?;
    }

    session.borrow_mut().buffers.inbound_encrypted.compact();
    session.borrow_mut().buffers.inbound_clear.flip();

    match result.status {
        EngineStatus::BufferUnderflow => {
            let s = session.borrow();
            s.bridge.select_for_read(s.token);
            Ok(())
        }
        EngineStatus::Closed => {
            super::close(session);
            Ok(())
        }
        EngineStatus::BufferOverflow => Err(TlsCoreError::Invariant(
            "BUFFER_OVERFLOW on unwrap: inbound_clear undersized for packet_buffer_size",
        )),
        EngineStatus::Ok => match result.handshake_status {
            HandshakeStatus::Finished | HandshakeStatus::NotHandshaking => {
                super::complete_handshake(session);
                Ok(())
            }
            HandshakeStatus::NeedWrap => {
                wrap_step(session)?;
                Ok(())
            }
            HandshakeStatus::NeedTask => offload_task(session),
            HandshakeStatus::NeedUnwrap => {
                let s = session.borrow();
                s.bridge.select_for_read(s.token);
                Ok(())
            }
        },
    }
}

fn call_unwrap(session: &SessionRef) -> Result<crate::engine::OpResult> {
    let mut s = session.borrow_mut();
    let Session {
        engine, buffers, ..
    } = &mut *s;
    let engine = engine.as_mut().expect("unwrap_step requires a TLS engine");
    engine.unwrap(&mut buffers.inbound_encrypted, &mut buffers.inbound_clear)
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

/// Shared wrap step (spec §4.3). Precondition: `outbound_encrypted` is
/// drained-empty. Returns `true` if the produced bytes were fully flushed.
pub(crate) fn wrap_step(session: &SessionRef) -> Result<bool> {
    {
        let s = session.borrow();
        debug_assert!(
            s.buffers.outbound_encrypted.is_empty(),
            "wrap_step called with unflushed outbound_encrypted bytes"
        );
    }

    let result = {
        let mut s = session.borrow_mut();
        s.buffers.outbound_encrypted.clear();
        let mut empty_plain = Buffer::new(0);
        let Session {
            engine, buffers, ..
        } = &mut *s;
        let engine = engine.as_mut().expect("wrap_step requires a TLS engine");
        let result = engine.wrap(&mut empty_plain, &mut buffers.outbound_encrypted)?;
        buffers.outbound_encrypted.flip();
        result
    };

    if result.bytes_consumed != 0 {
        return Err(TlsCoreError::Invariant(
            "handshake-phase wrap consumed plaintext",
        ));
    }
    if result.bytes_produced == 0 {
        return Err(TlsCoreError::Invariant(
            "handshake-phase wrap produced no ciphertext",
        ));
    }

    flush_outbound(session)
}

/// Drain `outbound_encrypted` to the socket. Returns `true` once fully
/// flushed; re-arms write readiness and returns `false` on a partial write.
pub(crate) fn flush_outbound(session: &SessionRef) -> Result<bool> {
    loop {
        let mut s = session.borrow_mut();
        if s.buffers.outbound_encrypted.is_empty() {
            return Ok(true);
        }
        match s.socket.write(s.buffers.outbound_encrypted.data()) {
            Ok(0) => {
                return Err(TlsCoreError::Io(std::io::Error::new(
                    ErrorKind::WriteZero,
                    "peer closed while flushing TLS output",
                )))
            }
            Ok(n) => s.buffers.outbound_encrypted.consume(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                s.bridge.select_for_write(s.token);
                return Ok(false);
            }
            Err(e) => return Err(TlsCoreError::Io(e)),
        }
    }
}

/// Take the delegated task and submit it to the executor via the bridge.
/// The continuation (re-entering `drive`) is not run here: it is routed
/// back onto the reactor thread by the bridge/reactor (see `reactor`
/// module), captured by `Token` rather than by strong reference to
/// `Session`, per the design notes.
pub(crate) fn offload_task(session: &SessionRef) -> Result<()> {
    let (task, token, bridge): (Box<dyn Task>, _, _) = {
        let mut s = session.borrow_mut();
        let token = s.token;
        let bridge = s.bridge.clone();
        let task = engine_mut(&mut s)
            .take_delegated_task()
            .ok_or(TlsCoreError::Invariant(
                "NEED_TASK reported but no delegated task available",
            ))?;
        s.set_task_in_flight(true);
        (task, token, bridge)
    };
    bridge.execute(token, task);
    Ok(())
}

fn engine_mut(s: &mut Session) -> &mut dyn crate::engine::TlsEngine {
    s.engine
        .as_deref_mut()
        .expect("handshake driver requires a TLS engine")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::engine::OpResult;
    use crate::session::test_support::session_with_engine;
    use crate::session::{on_task_complete, Phase, Role};
    use std::io::Write;
    use std::sync::atomic::Ordering;

    #[test]
    fn delegated_task_runs_once_and_does_not_complete_handshake_itself() {
        let engine = MockEngine::new(4096)
            .script_handshake([HandshakeStatus::NeedTask, HandshakeStatus::Finished]);
        let tasks_run = engine.tasks_run.clone();
        let (session, _bridge, handler, _peer) = session_with_engine(Role::Client, Box::new(engine));

        on_connect(&session).unwrap();
        assert_eq!(tasks_run.load(Ordering::SeqCst), 1);
        assert_eq!(handler.connects.get(), 0, "NEED_TASK must not itself finish the handshake");
        assert_eq!(session.borrow().phase, Phase::Handshaking);
    }

    #[test]
    fn task_completion_resumes_drive_to_finished() {
        let engine = MockEngine::new(4096)
            .script_handshake([HandshakeStatus::NeedTask, HandshakeStatus::Finished]);
        let (session, _bridge, handler, _peer) = session_with_engine(Role::Server, Box::new(engine));

        on_accept(&session).unwrap();
        on_task_complete(&session);

        assert_eq!(handler.accepts.get(), 1);
        assert_eq!(session.borrow().phase, Phase::Data);
    }

    #[test]
    fn second_need_task_is_suppressed_while_one_is_in_flight() {
        let engine = MockEngine::new(4096).script_handshake([
            HandshakeStatus::NeedTask,
            HandshakeStatus::NeedTask,
            HandshakeStatus::Finished,
        ]);
        let tasks_run = engine.tasks_run.clone();
        let (session, _bridge, handler, _peer) = session_with_engine(Role::Server, Box::new(engine));

        on_accept(&session).unwrap();
        assert_eq!(tasks_run.load(Ordering::SeqCst), 1);
        assert!(session.borrow().task_in_flight());

        // A read-readiness event races in before the first task's
        // continuation has been delivered back: must not start a second
        // delegated task while one is still outstanding.
        readable(&session).unwrap();
        assert_eq!(
            tasks_run.load(Ordering::SeqCst),
            1,
            "a second delegated task must not start while one is in flight"
        );
        assert_eq!(handler.accepts.get(), 0);

        on_task_complete(&session);
        assert_eq!(tasks_run.load(Ordering::SeqCst), 2);
        assert!(session.borrow().task_in_flight());
        assert_eq!(handler.accepts.get(), 0);

        on_task_complete(&session);
        assert_eq!(handler.accepts.get(), 1);
        assert_eq!(session.borrow().phase, Phase::Data);
    }

    #[test]
    fn finished_handshake_fires_on_accept_exactly_once_and_flips_phase() {
        let engine = MockEngine::new(4096).script_handshake([HandshakeStatus::Finished]);
        let (session, _bridge, handler, _peer) = session_with_engine(Role::Server, Box::new(engine));

        on_accept(&session).unwrap();
        assert_eq!(handler.accepts.get(), 1);
        // Once in `Phase::Data`, `session::on_readable`/`on_writable` route
        // away from this module entirely (see `session` dispatch), which is
        // what actually keeps `complete_handshake` from firing twice.
        assert_eq!(session.borrow().phase, Phase::Data);
    }

    #[test]
    fn buffer_underflow_rearms_read_without_error() {
        let underflow = OpResult {
            status: EngineStatus::BufferUnderflow,
            handshake_status: HandshakeStatus::NeedUnwrap,
            bytes_consumed: 0,
            bytes_produced: 0,
        };
        let engine = MockEngine::new(4096).script_unwrap([underflow]);
        let (session, bridge, _handler, mut peer) = session_with_engine(Role::Server, Box::new(engine));

        peer.write_all(b"partial-record").unwrap();
        readable(&session).unwrap();

        assert_eq!(bridge.reads_armed.get(), 1);
        assert_eq!(session.borrow().phase, Phase::Handshaking);
    }

    #[test]
    fn peer_eof_during_handshake_closes_session() {
        let engine = MockEngine::new(4096);
        let (session, _bridge, handler, peer) = session_with_engine(Role::Server, Box::new(engine));

        drop(peer); // peer closes its end -> our next read sees EOF
        readable(&session).unwrap();

        assert_eq!(handler.closes.get(), 1);
        assert!(!session.borrow().is_open());
    }
}
