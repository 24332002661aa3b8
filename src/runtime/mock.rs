//! Scripted in-memory driver for exercising the event loop.
//!
//! Operations move from `queued` to `submitted` on flush, and only
//! submitted operations can complete, mirroring the ring. Sockets are
//! simulated per descriptor: tests feed inbound bytes, inject errnos,
//! cap send sizes and inspect what the server echoed.

use crate::error::SubmitError;
use crate::runtime::completion::Cqe;
use crate::runtime::driver::{Driver, Op};
use crate::runtime::token::{OpKind, Token};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

#[derive(Default)]
struct MockSocket {
    inbound: VecDeque<u8>,
    peer_closed: bool,
    outbound: Vec<u8>,
    send_limit: Option<usize>,
    read_errors: VecDeque<i32>,
    write_errors: VecDeque<i32>,
    shut: bool,
}

pub struct MockDriver {
    queued: Vec<(Op, u64)>,
    submitted: Vec<(Op, u64)>,
    sq_capacity: usize,
    sockets: HashMap<RawFd, MockSocket>,
    /// New descriptors (or negated errnos) handed to the next accepts.
    pending_accepts: VecDeque<i32>,
    next_fd: RawFd,
    tick_ready: bool,
    forced_flushes: usize,
    /// Errno returned by the next wait instead of submitting.
    wait_error: Option<i32>,
    /// Flushes report success but leave the queue full.
    flush_stalled: bool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::with_sq_capacity(usize::MAX)
    }

    pub fn with_sq_capacity(sq_capacity: usize) -> Self {
        Self {
            queued: Vec::new(),
            submitted: Vec::new(),
            sq_capacity,
            sockets: HashMap::new(),
            pending_accepts: VecDeque::new(),
            next_fd: 10,
            tick_ready: false,
            forced_flushes: 0,
            wait_error: None,
            flush_stalled: false,
        }
    }

    /// A client connects; returns the descriptor the server will accept.
    pub fn connect(&mut self) -> RawFd {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.connect_fd(fd);
        fd
    }

    /// A client connects on a specific (possibly recycled) descriptor.
    pub fn connect_fd(&mut self, fd: RawFd) {
        self.sockets.insert(fd, MockSocket::default());
        self.pending_accepts.push_back(fd);
    }

    pub fn fail_accept(&mut self, errno: i32) {
        self.pending_accepts.push_back(-errno);
    }

    pub fn send(&mut self, fd: RawFd, data: &[u8]) {
        self.socket(fd).inbound.extend(data);
    }

    pub fn close_write(&mut self, fd: RawFd) {
        self.socket(fd).peer_closed = true;
    }

    pub fn fail_next_read(&mut self, fd: RawFd, errno: i32) {
        self.socket(fd).read_errors.push_back(errno);
    }

    pub fn fail_next_write(&mut self, fd: RawFd, errno: i32) {
        self.socket(fd).write_errors.push_back(errno);
    }

    /// Cap every send on `fd` to `limit` bytes.
    pub fn limit_send(&mut self, fd: RawFd, limit: usize) {
        self.socket(fd).send_limit = Some(limit);
    }

    /// Bytes the server has sent on `fd` since the last call.
    pub fn take_received(&mut self, fd: RawFd) -> Vec<u8> {
        std::mem::take(&mut self.socket(fd).outbound)
    }

    pub fn is_shut(&self, fd: RawFd) -> bool {
        self.sockets.get(&fd).is_some_and(|s| s.shut)
    }

    pub fn set_sq_capacity(&mut self, sq_capacity: usize) {
        self.sq_capacity = sq_capacity;
    }

    pub fn stall_flush(&mut self, stalled: bool) {
        self.flush_stalled = stalled;
    }

    /// Fail the next `submit_and_wait` with `errno`.
    pub fn fail_next_wait(&mut self, errno: i32) {
        self.wait_error = Some(errno);
    }

    /// Period of the outstanding timeout, if any.
    pub fn tick_period(&self) -> Option<Duration> {
        self.queued
            .iter()
            .chain(self.submitted.iter())
            .find_map(|&(op, _)| match op {
                Op::Timeout { after } => Some(after),
                _ => None,
            })
    }

    /// Let the pending timeout complete.
    pub fn fire_tick(&mut self) {
        self.tick_ready = true;
    }

    /// Operations of `kind` queued or in flight.
    pub fn outstanding(&self, kind: OpKind) -> usize {
        self.queued
            .iter()
            .chain(self.submitted.iter())
            .filter(|(_, user_data)| Token::decode(*user_data).map(|t| t.op) == Some(kind))
            .count()
    }

    /// Explicit flushes caused by a full submission queue.
    pub fn forced_flushes(&self) -> usize {
        self.forced_flushes
    }

    fn socket(&mut self, fd: RawFd) -> &mut MockSocket {
        self.sockets.entry(fd).or_default()
    }

    fn move_queued(&mut self) -> usize {
        let n = self.queued.len();
        self.submitted.append(&mut self.queued);
        n
    }

    /// Result of `op` if it can complete now.
    fn try_complete(&mut self, op: Op) -> Option<i32> {
        match op {
            Op::Accept { .. } => self.pending_accepts.pop_front(),
            Op::Recv { fd, buf, len } => {
                let socket = match self.sockets.get_mut(&fd) {
                    Some(s) if !s.shut => s,
                    _ => return Some(-libc::EBADF),
                };
                if let Some(errno) = socket.read_errors.pop_front() {
                    return Some(-errno);
                }
                if !socket.inbound.is_empty() {
                    let n = len.min(socket.inbound.len());
                    let data: Vec<u8> = socket.inbound.drain(..n).collect();
                    // SAFETY: the push contract keeps `buf` valid for `len` bytes
                    // until this completion is drained.
                    unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), buf, n) };
                    return Some(n as i32);
                }
                socket.peer_closed.then_some(0)
            }
            Op::Send { fd, buf, len } => {
                let socket = match self.sockets.get_mut(&fd) {
                    Some(s) if !s.shut => s,
                    _ => return Some(-libc::EBADF),
                };
                if let Some(errno) = socket.write_errors.pop_front() {
                    return Some(-errno);
                }
                let n = socket.send_limit.map_or(len, |limit| limit.min(len));
                // SAFETY: as for Recv.
                let data = unsafe { std::slice::from_raw_parts(buf, n) };
                socket.outbound.extend_from_slice(data);
                Some(n as i32)
            }
            Op::Timeout { .. } => {
                if std::mem::take(&mut self.tick_ready) {
                    Some(-libc::ETIME)
                } else {
                    None
                }
            }
            Op::Cancel { .. } => unreachable!("cancel is resolved in drain"),
        }
    }
}

impl Driver for MockDriver {
    unsafe fn push(&mut self, op: Op, user_data: u64) -> Result<(), SubmitError> {
        if self.queued.len() >= self.sq_capacity {
            return Err(SubmitError::QueueFull);
        }
        self.queued.push((op, user_data));
        Ok(())
    }

    fn flush(&mut self) -> io::Result<usize> {
        self.forced_flushes += 1;
        if self.flush_stalled {
            return Ok(0);
        }
        Ok(self.move_queued())
    }

    fn submit_and_wait(&mut self, _want: usize) -> io::Result<usize> {
        if let Some(errno) = self.wait_error.take() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        Ok(self.move_queued())
    }

    fn drain(&mut self, out: &mut Vec<Cqe>, max: usize) -> usize {
        let start = out.len();
        let mut i = 0;

        while i < self.submitted.len() && out.len() - start < max {
            let (op, user_data) = self.submitted[i];

            // A cancel only sees operations submitted ahead of it.
            if let Op::Cancel { target } = op {
                self.submitted.remove(i);
                match self.submitted[..i].iter().position(|&(_, ud)| ud == target) {
                    Some(pos) => {
                        self.submitted.remove(pos);
                        i -= 1;
                        out.push(Cqe {
                            user_data: target,
                            result: -libc::ECANCELED,
                        });
                        out.push(Cqe {
                            user_data,
                            result: 0,
                        });
                    }
                    None => out.push(Cqe {
                        user_data,
                        result: -libc::ENOENT,
                    }),
                }
                continue;
            }

            match self.try_complete(op) {
                Some(result) => {
                    self.submitted.remove(i);
                    out.push(Cqe { user_data, result });
                }
                None => i += 1,
            }
        }

        out.len() - start
    }

    fn shutdown(&mut self, fd: RawFd) {
        self.socket(fd).shut = true;
    }
}
