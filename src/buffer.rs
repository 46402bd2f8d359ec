//! Fixed-capacity byte buffer with NIO-style fill/drain semantics.
//!
//! A [`Buffer`] starts in *fill* mode: writers append bytes and `position`
//! tracks how much has been written. [`Buffer::flip`] switches to *drain*
//! mode, where `position` instead tracks how much has been consumed out of
//! `0..limit`. [`Buffer::clear`] resets to an empty fill buffer;
//! [`Buffer::compact`] preserves unread bytes (in drain mode) and switches
//! back to fill mode with those bytes at the front.

/// A fixed-capacity byte region with `position`/`limit`/`capacity`.
///
/// There is no separate mode flag: by convention a buffer is in *fill* mode
/// when `limit == capacity`, and in *drain* mode otherwise (after `flip`,
/// `limit` is pinned at the amount of valid data). This mirrors
/// `java.nio.ByteBuffer` usage without needing a `Read`/`Write` trait split.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    position: usize,
    limit: usize,
    capacity: usize,
}

impl Buffer {
    /// Create a new buffer of the given capacity, in fill mode, empty.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            position: 0,
            limit: capacity,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes remaining before `limit` is reached.
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// True when there is no valid data left to drain (drain mode) or no
    /// room left to fill (fill mode).
    pub fn is_empty(&self) -> bool {
        self.position == self.limit
    }

    /// Reset to an empty fill buffer: all capacity available, nothing
    /// pending. Used when a buffer's prior contents have all been consumed
    /// and flushed (e.g. `outbound_encrypted` before a wrap step).
    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity;
    }

    /// Switch from fill mode to drain mode: the bytes written so far
    /// (`0..position`) become the readable window, and `position` resets to
    /// the start of it.
    pub fn flip(&mut self) {
        self.limit = self.position;
        self.position = 0;
    }

    /// Preserve any unread bytes (drain mode: `position..limit`) by moving
    /// them to the front, and switch back to fill mode with those bytes
    /// already accounted for in `position`.
    pub fn compact(&mut self) {
        let unread = self.limit - self.position;
        if unread > 0 && self.position > 0 {
            self.data.copy_within(self.position..self.limit, 0);
        }
        self.position = unread;
        self.limit = self.capacity;
    }

    /// The unread window in drain mode.
    pub fn data(&self) -> &[u8] {
        &self.data[self.position..self.limit]
    }

    /// Consume `n` bytes from the front of the drain window.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());
        self.position += n;
    }

    /// The writable window in fill mode.
    pub fn space(&mut self) -> &mut [u8] {
        &mut self.data[self.position..self.limit]
    }

    /// Record that `n` bytes were written into the space returned by
    /// [`Buffer::space`].
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());
        self.position += n;
    }

    /// Append bytes in fill mode, returning how many were actually copied
    /// (bounded by remaining space).
    pub fn put(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.remaining());
        let dst = &mut self.data[self.position..self.position + n];
        dst.copy_from_slice(&src[..n]);
        self.position += n;
        n
    }
}

impl std::io::Read for Buffer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

impl std::io::Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Ok(self.put(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// The three session-private buffers, sized to the engine's packet size.
///
/// `outbound_clear` is deliberately not part of the triad: it belongs to the
/// application call site (the slice passed into `Session::write`).
pub struct BufferTriad {
    pub inbound_encrypted: Buffer,
    pub inbound_clear: Buffer,
    pub outbound_encrypted: Buffer,
}

impl BufferTriad {
    /// `inbound_encrypted` starts in fill mode (ready to receive network
    /// bytes); `inbound_clear` and `outbound_encrypted` start drained-empty.
    pub fn new(packet_buffer_size: usize) -> Self {
        let mut inbound_clear = Buffer::new(packet_buffer_size);
        inbound_clear.flip();
        let mut outbound_encrypted = Buffer::new(packet_buffer_size);
        outbound_encrypted.flip();
        Self {
            inbound_encrypted: Buffer::new(packet_buffer_size),
            inbound_clear,
            outbound_encrypted,
        }
    }
}
