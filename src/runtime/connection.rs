//! Connection table: slot arena for live connections.
//!
//! Each slot pairs a connection descriptor with a fixed buffer from the
//! [`BufferPool`]. Slots are handed out by a slab and identified by
//! [`ConnId`], whose generation is bumped on release so tokens issued
//! for a previous occupant are recognised as stale.
//!
//! The `in_flight` marker is the buffer ownership capability: while it is
//! set the kernel may be touching the slot's buffer, so no second
//! operation can be started and the slot cannot be released.

use crate::error::SlotError;
use crate::runtime::buffer::BufferPool;
use crate::runtime::token::{ConnId, OpKind};
use slab::Slab;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

/// Current stage of a connection's echo cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for the peer to send data.
    Reading,
    /// Echoing `total` bytes back, `written` of them already sent.
    Writing { written: usize, total: usize },
}

/// A single client connection.
#[derive(Debug)]
pub struct Connection {
    /// File descriptor for the socket.
    pub fd: RawFd,
    /// Current connection stage.
    pub stage: Stage,
    /// Operation currently owned by the kernel, if any.
    in_flight: Option<OpKind>,
    /// Last time an operation for this connection completed.
    pub last_active: Instant,
    /// A cancel has been issued for the in-flight operation.
    pub cancelling: bool,
}

impl Connection {
    /// Create a new connection in initial reading stage.
    pub fn new(fd: RawFd, now: Instant) -> Self {
        Self {
            fd,
            stage: Stage::Reading,
            in_flight: None,
            last_active: now,
            cancelling: false,
        }
    }

    /// Transition to writing stage.
    pub fn start_writing(&mut self, total: usize) {
        self.stage = Stage::Writing { written: 0, total };
    }

    /// Transition back to reading stage.
    pub fn start_reading(&mut self) {
        self.stage = Stage::Reading;
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> Option<OpKind> {
        self.in_flight
    }
}

/// Fixed-capacity table of connections and their buffers.
pub struct ConnectionTable {
    connections: Slab<Connection>,
    /// Generation per slot index, bumped every time the slot is released.
    generations: Vec<u32>,
    buffers: BufferPool,
    max_connections: usize,
}

impl ConnectionTable {
    /// Create a table with `max_connections` slots of `message_len` bytes each.
    pub fn new(max_connections: usize, message_len: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            generations: vec![0; max_connections],
            buffers: BufferPool::new(max_connections, message_len),
            max_connections,
        }
    }

    /// Claim a slot for a freshly accepted socket.
    ///
    /// Returns `None` if the table is at capacity.
    pub fn claim(&mut self, fd: RawFd, now: Instant) -> Option<ConnId> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        let index = self.connections.insert(Connection::new(fd, now));
        debug_assert!(index < self.max_connections);
        Some(ConnId::new(index as u32, self.generations[index]))
    }

    /// Look up a live connection. Stale and out-of-range ids yield `None`.
    pub fn get(&self, id: ConnId) -> Option<&Connection> {
        if !self.is_current(id) {
            return None;
        }
        self.connections.get(id.index())
    }

    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        if !self.is_current(id) {
            return None;
        }
        self.connections.get_mut(id.index())
    }

    /// Start a receive: marks the read in flight and returns the socket
    /// together with the whole slot buffer.
    pub fn begin_read(&mut self, id: ConnId) -> Result<(RawFd, *mut u8, usize), SlotError> {
        let conn = self.take_ownership(id, OpKind::Read)?;
        conn.start_reading();
        let fd = conn.fd;
        let len = self.buffers.buffer_size();
        Ok((fd, self.buffers.as_mut_ptr(id.index()), len))
    }

    /// Start a send of the unwritten part of the current echo.
    pub fn begin_write(&mut self, id: ConnId) -> Result<(RawFd, *const u8, usize), SlotError> {
        let conn = self.get(id).ok_or(SlotError::Stale)?;
        let (written, total) = match conn.stage {
            Stage::Writing { written, total } if written < total => (written, total),
            _ => return Err(SlotError::WrongStage),
        };
        if total > self.buffers.buffer_size() {
            return Err(SlotError::WrongStage);
        }

        let fd = self.take_ownership(id, OpKind::Write)?.fd;
        // SAFETY: written < total <= buffer_size, so the offset stays inside the buffer.
        let ptr = unsafe { self.buffers.as_mut_ptr(id.index()).add(written) };
        Ok((fd, ptr as *const u8, total - written))
    }

    /// Undo a `begin_*` whose operation never reached the kernel.
    pub fn abort(&mut self, id: ConnId) {
        if let Some(conn) = self.get_mut(id) {
            conn.in_flight = None;
        }
    }

    /// Observe the completion of `op` on `id`, returning the buffer to the table.
    pub fn finish(
        &mut self,
        id: ConnId,
        op: OpKind,
        now: Instant,
    ) -> Result<&mut Connection, SlotError> {
        let conn = self.get_mut(id).ok_or(SlotError::Stale)?;
        if conn.in_flight != Some(op) {
            return Err(SlotError::Unexpected {
                expected: conn.in_flight,
                found: op,
            });
        }
        conn.in_flight = None;
        conn.cancelling = false;
        conn.last_active = now;
        Ok(conn)
    }

    /// Free a slot for reuse. Refused while an operation is in flight.
    pub fn release(&mut self, id: ConnId) -> Result<Connection, SlotError> {
        let conn = self.get(id).ok_or(SlotError::Stale)?;
        if let Some(op) = conn.in_flight {
            return Err(SlotError::Busy(op));
        }

        let index = id.index();
        let conn = self.connections.remove(index);
        self.buffers.clear(index);
        self.generations[index] = self.generations[index].wrapping_add(1);
        Ok(conn)
    }

    /// Replace the contents of `out` with the connections whose in-flight
    /// operation has been pending longer than `timeout`.
    ///
    /// At most `capacity()` entries are written, so an `out` allocated with
    /// that capacity is never grown.
    pub fn collect_idle(&self, now: Instant, timeout: Duration, out: &mut Vec<(ConnId, OpKind)>) {
        out.clear();
        out.extend(
            self.connections
                .iter()
                .filter(|(_, conn)| !conn.cancelling)
                .filter(|(_, conn)| now.saturating_duration_since(conn.last_active) >= timeout)
                .filter_map(|(index, conn)| {
                    conn.in_flight
                        .map(|op| (ConnId::new(index as u32, self.generations[index]), op))
                }),
        );
    }

    /// Bytes currently held in the slot's buffer.
    #[cfg(test)]
    pub fn buffer(&self, id: ConnId) -> Option<&[u8]> {
        self.get(id).map(|_| self.buffers.get(id.index()))
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    fn is_current(&self, id: ConnId) -> bool {
        self.generations
            .get(id.index())
            .is_some_and(|&generation| ConnId::new(id.index() as u32, generation) == id)
    }

    fn take_ownership(&mut self, id: ConnId, op: OpKind) -> Result<&mut Connection, SlotError> {
        let conn = self.get_mut(id).ok_or(SlotError::Stale)?;
        if let Some(current) = conn.in_flight {
            return Err(SlotError::Busy(current));
        }
        conn.in_flight = Some(op);
        Ok(conn)
    }
}
