//! Scriptable [`TlsEngine`] test double.
//!
//! The production adapter (`rustls_engine`) never needs a delegated task and
//! its exact `wrap`/`unwrap` byte counts depend on real cryptography, so the
//! edge cases in spec §8 (delegated-task offload, buffer underflow, partial
//! writes) are exercised against this engine instead, driven purely by
//! scripted [`HandshakeStatus`] and [`OpResult`] sequences. Keeps the state
//! machine tests free of any real TLS handshake.

use crate::buffer::Buffer;
use crate::engine::{EngineStatus, HandshakeStatus, OpResult, Task, TlsEngine};
use crate::error::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A scripted engine: each call to `handshake_status`/`wrap`/`unwrap` pops
/// the next entry off its queue. Once a queue is empty, `handshake_status`
/// repeats `NotHandshaking` and `wrap`/`unwrap` repeat a no-op `Ok` result.
pub struct MockEngine {
    handshake_statuses: VecDeque<HandshakeStatus>,
    wrap_results: VecDeque<OpResult>,
    unwrap_results: VecDeque<OpResult>,
    packet_buffer_size: usize,
    /// Incremented by the task handed out via `take_delegated_task`, so
    /// tests can assert it ran exactly once.
    pub tasks_run: Arc<AtomicUsize>,
    task_pending: bool,
}

impl MockEngine {
    pub fn new(packet_buffer_size: usize) -> Self {
        Self {
            handshake_statuses: VecDeque::new(),
            wrap_results: VecDeque::new(),
            unwrap_results: VecDeque::new(),
            packet_buffer_size,
            tasks_run: Arc::new(AtomicUsize::new(0)),
            task_pending: false,
        }
    }

    pub fn script_handshake(mut self, statuses: impl IntoIterator<Item = HandshakeStatus>) -> Self {
        self.handshake_statuses.extend(statuses);
        self
    }

    pub fn script_wrap(mut self, results: impl IntoIterator<Item = OpResult>) -> Self {
        self.wrap_results.extend(results);
        self
    }

    pub fn script_unwrap(mut self, results: impl IntoIterator<Item = OpResult>) -> Self {
        self.unwrap_results.extend(results);
        self
    }
}

impl TlsEngine for MockEngine {
    fn packet_buffer_size(&self) -> usize {
        self.packet_buffer_size
    }

    fn begin_handshake(&mut self) {}

    fn wrap(&mut self, src: &mut Buffer, dst: &mut Buffer) -> Result<OpResult> {
        let result = self.wrap_results.pop_front().unwrap_or(OpResult {
            status: EngineStatus::Ok,
            handshake_status: HandshakeStatus::NotHandshaking,
            bytes_consumed: 0,
            bytes_produced: 0,
        });
        if src.has_remaining() && result.bytes_consumed > 0 {
            src.consume(result.bytes_consumed.min(src.remaining()));
        }
        if result.bytes_produced > 0 {
            let n = result.bytes_produced.min(dst.remaining());
            let filler = vec![0xAAu8; n];
            dst.put(&filler);
        }
        Ok(result)
    }

    fn unwrap(&mut self, src: &mut Buffer, dst: &mut Buffer) -> Result<OpResult> {
        let result = self.unwrap_results.pop_front().unwrap_or(OpResult {
            status: EngineStatus::Ok,
            handshake_status: HandshakeStatus::NotHandshaking,
            bytes_consumed: 0,
            bytes_produced: 0,
        });
        if result.bytes_consumed > 0 {
            src.consume(result.bytes_consumed.min(src.remaining()));
        }
        if result.bytes_produced > 0 {
            let n = result.bytes_produced.min(dst.remaining());
            let filler = vec![0xBBu8; n];
            dst.put(&filler);
        }
        Ok(result)
    }

    fn close_inbound(&mut self) {}

    fn close_outbound(&mut self) {}

    fn is_outbound_done(&self) -> bool {
        self.wrap_results.is_empty()
    }

    fn handshake_status(&mut self) -> HandshakeStatus {
        let status = self
            .handshake_statuses
            .pop_front()
            .unwrap_or(HandshakeStatus::NotHandshaking);
        if status == HandshakeStatus::NeedTask {
            self.task_pending = true;
        }
        status
    }

    fn take_delegated_task(&mut self) -> Option<Box<dyn Task>> {
        if !self.task_pending {
            return None;
        }
        self.task_pending = false;
        let counter = self.tasks_run.clone();
        Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }
}
