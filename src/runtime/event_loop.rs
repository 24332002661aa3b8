//! Completion-driven echo loop.
//!
//! Each turn submits everything queued so far, blocks until at least one
//! completion is ready, then drains the completion queue in batches of
//! `batch_size` until it is empty. Every completion advances one
//! connection's state machine:
//!
//! ```text
//! accept ──> Reading ──(n bytes)──> Writing ──(all sent)──┐
//!               ^                      │ (short send)      │
//!               │                      └──> Writing        │
//!               └──────────────────────────────────────────┘
//! Reading ──(0 / reset / error)──> closed
//! ```
//!
//! At most one operation per connection is ever in flight, so completions
//! for the same connection arrive in submission order.

use crate::config::Config;
use crate::error::{Result, SlotError, SubmitError};
use crate::runtime::completion::{classify, Completion, Cqe, Outcome};
use crate::runtime::connection::{ConnectionTable, Stage};
use crate::runtime::driver::{Driver, Op};
use crate::runtime::token::{ConnId, OpKind, Token};
use std::io;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Counters kept by the loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub accepted: u64,
    pub rejected: u64,
    pub closed: u64,
    /// Connections closed after their idle operation was cancelled.
    pub timed_out: u64,
    pub echoed_bytes: u64,
}

pub struct EventLoop<D: Driver> {
    driver: D,
    listener_fd: RawFd,
    connections: ConnectionTable,
    /// Scratch space for draining completions.
    batch: Vec<Cqe>,
    batch_size: usize,
    /// Scratch space for idle sweeps, sized for a full table.
    idle: Vec<(ConnId, OpKind)>,
    idle_timeout: Option<Duration>,
    accept_outstanding: bool,
    stats: Stats,
}

impl<D: Driver> EventLoop<D> {
    pub fn new(driver: D, listener_fd: RawFd, config: &Config) -> Self {
        Self {
            driver,
            listener_fd,
            connections: ConnectionTable::new(config.max_connections, config.message_len),
            batch: Vec::with_capacity(config.batch_size),
            batch_size: config.batch_size,
            idle: Vec::with_capacity(config.max_connections),
            idle_timeout: config.idle_timeout,
            accept_outstanding: false,
            stats: Stats::default(),
        }
    }

    /// Queue the first accept and, if idle timeouts are enabled, the sweep timer.
    pub fn start(&mut self) -> Result<()> {
        self.submit_accept()?;
        self.arm_tick()
    }

    /// Run forever. Only returns on a loop-fatal error.
    pub fn run(&mut self) -> Result<()> {
        self.start()?;
        loop {
            self.turn()?;
        }
    }

    /// One iteration: submit, wait, drain. Returns the number of completions handled.
    pub fn turn(&mut self) -> Result<usize> {
        match self.driver.submit_and_wait(1) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(0),
            // Completion queue overflowed; draining makes room.
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {}
            Err(e) => return Err(e.into()),
        }

        let mut batch = std::mem::take(&mut self.batch);
        let result = self.drain_ready(&mut batch);
        self.batch = batch;
        result
    }

    fn drain_ready(&mut self, batch: &mut Vec<Cqe>) -> Result<usize> {
        let mut processed = 0;
        loop {
            batch.clear();
            let n = self.driver.drain(batch, self.batch_size);
            if n == 0 {
                return Ok(processed);
            }
            for &cqe in batch.iter() {
                self.dispatch(cqe)?;
            }
            processed += n;
        }
    }

    fn dispatch(&mut self, cqe: Cqe) -> Result<()> {
        let Some(completion) = Completion::decode(cqe) else {
            warn!(user_data = cqe.user_data, "Unknown token in completion");
            return Ok(());
        };
        trace!(?completion, "Completion");

        match completion {
            Completion::Accept { result } => self.on_accept(result)?,
            Completion::Read { conn, result } => self.on_read(conn, result),
            Completion::Write { conn, result } => self.on_write(conn, result),
            Completion::Tick => self.on_tick()?,
            Completion::Cancel { conn, result } => {
                trace!(conn = conn.index(), result, "Cancel completed");
            }
        }
        Ok(())
    }

    fn on_accept(&mut self, result: i32) -> Result<()> {
        self.accept_outstanding = false;
        // Always re-arm accept
        if let Err(e) = self.submit_accept() {
            if result >= 0 {
                self.driver.shutdown(result);
            }
            return Err(e);
        }

        if result < 0 {
            let err = io::Error::from_raw_os_error(-result);
            match classify(result) {
                Outcome::Failed(_) => warn!(error = %err, "Accept failed"),
                _ => debug!(error = %err, "Accept interrupted"),
            }
            return Ok(());
        }

        let fd = result;
        let conn = match self.connections.claim(fd, Instant::now()) {
            Some(id) => id,
            None => {
                warn!(
                    fd,
                    max_connections = self.connections.capacity(),
                    "Connection limit reached, rejecting"
                );
                self.stats.rejected += 1;
                self.driver.shutdown(fd);
                return Ok(());
            }
        };

        self.stats.accepted += 1;
        debug!(
            conn = conn.index(),
            generation = conn.generation(),
            fd,
            active = self.connections.len(),
            "Accepted connection"
        );

        if let Err(e) = self.submit_read(conn) {
            warn!(conn = conn.index(), error = %e, "Failed to submit read");
            self.close(conn);
        }
        Ok(())
    }

    fn on_read(&mut self, conn: ConnId, result: i32) {
        if let Err(e) = self.connections.finish(conn, OpKind::Read, Instant::now()) {
            debug!(conn = conn.index(), error = %e, "Dropping read completion");
            return;
        }

        let next = match classify(result) {
            Outcome::Transferred(n) => self.submit_write(conn, n),
            Outcome::Retry => self.submit_read(conn),
            Outcome::Closed if result == -libc::ECANCELED => return self.time_out(conn),
            Outcome::Closed => {
                debug!(conn = conn.index(), result, "Connection closed by peer");
                return self.close(conn);
            }
            Outcome::Failed(err) => {
                warn!(conn = conn.index(), error = %err, "Read failed");
                return self.close(conn);
            }
        };

        if let Err(e) = next {
            warn!(conn = conn.index(), error = %e, "Failed to submit after read");
            self.close(conn);
        }
    }

    fn on_write(&mut self, conn: ConnId, result: i32) {
        let stage = match self.connections.finish(conn, OpKind::Write, Instant::now()) {
            Ok(c) => c.stage,
            Err(e) => {
                debug!(conn = conn.index(), error = %e, "Dropping write completion");
                return;
            }
        };
        let Stage::Writing { written, total } = stage else {
            warn!(conn = conn.index(), "Write completed outside writing stage");
            return self.close(conn);
        };

        let next = match classify(result) {
            Outcome::Transferred(n) => {
                let written = (written + n).min(total);
                if written == total {
                    self.stats.echoed_bytes += total as u64;
                    self.submit_read(conn)
                } else {
                    trace!(conn = conn.index(), written, total, "Short write");
                    if let Some(c) = self.connections.get_mut(conn) {
                        c.stage = Stage::Writing { written, total };
                    }
                    self.resume_write(conn)
                }
            }
            Outcome::Retry => self.resume_write(conn),
            Outcome::Closed if result == -libc::ECANCELED => return self.time_out(conn),
            Outcome::Closed => {
                debug!(conn = conn.index(), result, "Peer stopped accepting data");
                return self.close(conn);
            }
            Outcome::Failed(err) => {
                warn!(conn = conn.index(), error = %err, "Write failed");
                return self.close(conn);
            }
        };

        if let Err(e) = next {
            warn!(conn = conn.index(), error = %e, "Failed to submit after write");
            self.close(conn);
        }
    }

    /// Cancel every operation that has been pending longer than the idle
    /// timeout.
    ///
    /// The sweep runs every half timeout, so a connection is cancelled
    /// between one and one and a half timeouts after its last completion.
    /// A cancel matches by token, and every read on a slot generation shares
    /// one token. The kernel issues submissions in queue order, so the cancel
    /// can only reach the operation that was in flight during the sweep, never
    /// a retry queued behind it.
    fn on_tick(&mut self) -> Result<()> {
        let Some(timeout) = self.idle_timeout else {
            return Ok(());
        };

        let mut idle = std::mem::take(&mut self.idle);
        self.connections
            .collect_idle(Instant::now(), timeout, &mut idle);
        for &(conn, op) in idle.iter() {
            let target = Token::new(conn, op).encode();
            if let Err(e) = self.push(Op::Cancel { target }, Token::new(conn, OpKind::Cancel)) {
                warn!(conn = conn.index(), error = %e, "Failed to cancel idle connection");
                break;
            }
            if let Some(c) = self.connections.get_mut(conn) {
                c.cancelling = true;
            }
            debug!(conn = conn.index(), ?op, "Cancelling idle connection");
        }
        self.idle = idle;

        self.arm_tick()
    }

    fn arm_tick(&mut self) -> Result<()> {
        if let Some(timeout) = self.idle_timeout {
            self.push(Op::Timeout { after: timeout / 2 }, Token::tick())?;
        }
        Ok(())
    }

    /// Queue an accept on the listener.
    pub fn submit_accept(&mut self) -> Result<()> {
        debug_assert!(!self.accept_outstanding, "accept already outstanding");
        self.push(
            Op::Accept {
                fd: self.listener_fd,
            },
            Token::accept(),
        )?;
        self.accept_outstanding = true;
        Ok(())
    }

    /// Queue a receive into the connection's buffer.
    pub fn submit_read(&mut self, conn: ConnId) -> Result<()> {
        let (fd, buf, len) = self.connections.begin_read(conn)?;
        let res = self.push(Op::Recv { fd, buf, len }, Token::new(conn, OpKind::Read));
        if res.is_err() {
            self.connections.abort(conn);
        }
        res
    }

    /// Queue a send of the first `len` bytes of the connection's buffer.
    pub fn submit_write(&mut self, conn: ConnId, len: usize) -> Result<()> {
        self.connections
            .get_mut(conn)
            .ok_or(SlotError::Stale)?
            .start_writing(len);
        self.resume_write(conn)
    }

    /// Queue a send of whatever part of the current echo is still unsent.
    fn resume_write(&mut self, conn: ConnId) -> Result<()> {
        let (fd, buf, len) = self.connections.begin_write(conn)?;
        let res = self.push(Op::Send { fd, buf, len }, Token::new(conn, OpKind::Write));
        if res.is_err() {
            self.connections.abort(conn);
        }
        res
    }

    /// Push onto the submission queue, flushing once if it is full.
    fn push(&mut self, op: Op, token: Token) -> Result<()> {
        let user_data = token.encode();
        // SAFETY: buffers come from the connection table, which never moves
        // them, and the slot's in-flight marker keeps them from being reused
        // or released until this completion has been dispatched.
        match unsafe { self.driver.push(op, user_data) } {
            Ok(()) => Ok(()),
            Err(SubmitError::QueueFull) => {
                self.driver.flush()?;
                unsafe { self.driver.push(op, user_data) }?;
                Ok(())
            }
        }
    }

    fn time_out(&mut self, conn: ConnId) {
        debug!(conn = conn.index(), "Idle timeout, closing connection");
        self.stats.timed_out += 1;
        self.close(conn);
    }

    fn close(&mut self, conn: ConnId) {
        match self.connections.release(conn) {
            Ok(c) => {
                self.driver.shutdown(c.fd);
                self.stats.closed += 1;
                debug!(
                    conn = conn.index(),
                    fd = c.fd,
                    active = self.connections.len(),
                    "Connection closed"
                );
            }
            Err(e) => warn!(conn = conn.index(), error = %e, "Cannot release connection"),
        }
    }

    #[cfg(test)]
    pub(crate) fn connections(&self) -> &ConnectionTable {
        &self.connections
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Whether the listener has an accept queued or in flight.
    #[cfg(test)]
    pub(crate) fn accept_outstanding(&self) -> bool {
        self.accept_outstanding
    }

    #[cfg(test)]
    pub(crate) fn driver(&self) -> &D {
        &self.driver
    }

    #[cfg(test)]
    pub(crate) fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}
