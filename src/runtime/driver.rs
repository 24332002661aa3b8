//! Submission/completion channel used by the event loop.
//!
//! The event loop never talks to the kernel directly. It pushes [`Op`]s
//! tagged with a token, flushes them, waits, and drains [`Cqe`]s. The
//! io_uring backend lives in `runtime::uring`; tests use a scripted
//! in-memory driver.

use crate::error::SubmitError;
use crate::runtime::completion::Cqe;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// An asynchronous operation to queue.
#[derive(Debug, Clone, Copy)]
pub enum Op {
    /// Accept one connection on a listening socket.
    Accept { fd: RawFd },
    /// Receive up to `len` bytes into `buf`.
    Recv { fd: RawFd, buf: *mut u8, len: usize },
    /// Send exactly `len` bytes from `buf` (the kernel may send fewer).
    Send {
        fd: RawFd,
        buf: *const u8,
        len: usize,
    },
    /// Complete after `after` has elapsed.
    Timeout { after: Duration },
    /// Cancel the in-flight operation tagged with `target`.
    Cancel { target: u64 },
}

pub trait Driver {
    /// Queue an operation without submitting it.
    ///
    /// # Safety
    /// Any buffer referenced by `op` must stay valid, and must not be
    /// accessed elsewhere, until the completion tagged `user_data` has been
    /// drained.
    unsafe fn push(&mut self, op: Op, user_data: u64) -> Result<(), SubmitError>;

    /// Hand queued operations to the kernel without waiting.
    fn flush(&mut self) -> io::Result<usize>;

    /// Hand queued operations to the kernel and block until at least
    /// `want` completions are ready.
    fn submit_and_wait(&mut self, want: usize) -> io::Result<usize>;

    /// Move up to `max` ready completions into `out`, returning how many.
    fn drain(&mut self, out: &mut Vec<Cqe>, max: usize) -> usize;

    /// Shut down both directions of a socket and close it.
    fn shutdown(&mut self, fd: RawFd);
}
