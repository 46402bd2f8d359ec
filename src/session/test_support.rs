//! Test doubles shared by the `handshake`/`data_phase` unit test modules.
//! Not part of the public surface; exists purely so state-machine edge
//! cases can be driven without a real reactor.

use super::{Role, Session, SessionRef};
use crate::bridge::SelectorBridge;
use crate::engine::{Task, TlsEngine};
use crate::handler::{Channel, EventHandler, SessionHandle};
use mio::net::TcpStream as MioTcpStream;
use mio::Token;
use std::cell::Cell;
use std::net::TcpListener;
use std::rc::Rc;

/// Counts calls instead of touching a real `mio::Registry`. `execute` runs
/// the task inline rather than on a worker thread, so a test can observe its
/// effect without a channel/waker round trip.
#[derive(Default)]
pub(crate) struct RecordingBridge {
    pub reads_armed: Cell<usize>,
    pub writes_armed: Cell<usize>,
    pub delinked: Cell<bool>,
}

impl SelectorBridge for RecordingBridge {
    fn select_for_read(&self, _token: Token) {
        self.reads_armed.set(self.reads_armed.get() + 1);
    }

    fn select_for_write(&self, _token: Token) {
        self.writes_armed.set(self.writes_armed.get() + 1);
    }

    fn execute(&self, _token: Token, task: Box<dyn Task>) {
        task.run();
    }

    fn delink(&self, _token: Token) {
        self.delinked.set(true);
    }

    fn add_handler(&self, _token: Token) {}

    fn name(&self) -> &str {
        "recording-test-bridge"
    }
}

/// Records every callback so tests can assert counts/ordering without a real
/// application.
#[derive(Default)]
pub(crate) struct RecordingHandler {
    pub accepts: Cell<usize>,
    pub connects: Cell<usize>,
    pub reads: Cell<usize>,
    pub writes: Cell<usize>,
    pub closes: Cell<usize>,
}

impl EventHandler for RecordingHandler {
    fn on_accept(&self, _channel: Channel, _session: SessionHandle) {
        self.accepts.set(self.accepts.get() + 1);
    }

    fn on_connect(&self, _channel: Channel, _session: SessionHandle) {
        self.connects.set(self.connects.get() + 1);
    }

    fn on_read(&self, _channel: Channel) {
        self.reads.set(self.reads.get() + 1);
    }

    fn on_write(&self, _channel: Channel) {
        self.writes.set(self.writes.get() + 1);
    }

    fn closing(&self, _channel: Channel) {
        self.closes.set(self.closes.get() + 1);
    }
}

/// A connected, non-blocking loopback TCP pair. Neither end is ever driven
/// by a real `mio::Poll` in these tests; a `WouldBlock` once a side's kernel
/// buffer is empty is the expected steady state, not a test failure.
pub(crate) fn tcp_pair() -> (MioTcpStream, MioTcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().unwrap();
    let client = std::net::TcpStream::connect(addr).expect("connect loopback");
    let (server, _) = listener.accept().expect("accept loopback");
    client.set_nonblocking(true).unwrap();
    server.set_nonblocking(true).unwrap();
    (MioTcpStream::from_std(client), MioTcpStream::from_std(server))
}

/// Build a `Session` over one end of a loopback pair, wired to the given
/// engine, a fresh `RecordingBridge`, and a fresh `RecordingHandler`.
/// Returns the other end of the pair for tests that need to push bytes in
/// from "the peer".
pub(crate) fn session_with_engine(
    role: Role,
    engine: Box<dyn TlsEngine>,
) -> (
    SessionRef,
    Rc<RecordingBridge>,
    Rc<RecordingHandler>,
    MioTcpStream,
) {
    let (local, peer) = tcp_pair();
    let bridge = Rc::new(RecordingBridge::default());
    let handler = Rc::new(RecordingHandler::default());
    let session = Session::new_tls(
        role,
        engine,
        local,
        Token(0),
        handler.clone() as Rc<dyn EventHandler>,
        bridge.clone() as Rc<dyn SelectorBridge>,
    );
    (session, bridge, handler, peer)
}

/// Build a plaintext (`engine: None`) `Session` over one end of a loopback
/// pair, wired the same way as [`session_with_engine`]. Returns the other
/// end of the pair for tests that need to push bytes in from "the peer".
pub(crate) fn session_plain(
    role: Role,
) -> (
    SessionRef,
    Rc<RecordingBridge>,
    Rc<RecordingHandler>,
    MioTcpStream,
) {
    let (local, peer) = tcp_pair();
    let bridge = Rc::new(RecordingBridge::default());
    let handler = Rc::new(RecordingHandler::default());
    let session = Session::new_plain(
        role,
        local,
        Token(0),
        handler.clone() as Rc<dyn EventHandler>,
        bridge.clone() as Rc<dyn SelectorBridge>,
        4096,
    );
    (session, bridge, handler, peer)
}
