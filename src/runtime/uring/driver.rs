//! [`Driver`] implementation over an `io_uring` instance.

use crate::error::{Error, Result, SubmitError};
use crate::runtime::completion::Cqe;
use crate::runtime::driver::{Driver, Op};
use io_uring::{opcode, squeue, types, IoUring};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;
use tracing::debug;

pub struct UringDriver {
    ring: IoUring,
    /// Storage for the pending timeout. Only one tick is outstanding at a time.
    tick: Box<types::Timespec>,
}

impl UringDriver {
    /// Create a ring with `entries` submission slots.
    ///
    /// Fails if the kernel lacks `IORING_FEAT_FAST_POLL`, which lets recv and
    /// accept on a socket without data wait inside the kernel instead of
    /// being punted to worker threads.
    pub fn new(entries: u32) -> Result<Self> {
        let ring = IoUring::new(entries)?;

        if !ring.params().is_feature_fast_poll() {
            return Err(Error::Unsupported(
                "IORING_FEAT_FAST_POLL not available in the kernel",
            ));
        }

        debug!(
            sq_entries = ring.params().sq_entries(),
            cq_entries = ring.params().cq_entries(),
            "io_uring ready"
        );

        Ok(Self {
            ring,
            tick: Box::new(types::Timespec::new()),
        })
    }

    fn build(&mut self, op: Op) -> squeue::Entry {
        match op {
            Op::Accept { fd } => {
                opcode::Accept::new(types::Fd(fd), std::ptr::null_mut(), std::ptr::null_mut())
                    .build()
            }
            Op::Recv { fd, buf, len } => opcode::Recv::new(types::Fd(fd), buf, len as u32).build(),
            Op::Send { fd, buf, len } => opcode::Send::new(types::Fd(fd), buf, len as u32).build(),
            Op::Timeout { after } => {
                *self.tick = timespec(after);
                opcode::Timeout::new(&*self.tick as *const types::Timespec).build()
            }
            Op::Cancel { target } => opcode::AsyncCancel::new(target).build(),
        }
    }
}

fn timespec(d: Duration) -> types::Timespec {
    types::Timespec::new()
        .sec(d.as_secs())
        .nsec(d.subsec_nanos())
}

impl Driver for UringDriver {
    unsafe fn push(&mut self, op: Op, user_data: u64) -> std::result::Result<(), SubmitError> {
        let entry = self.build(op).user_data(user_data);
        self.ring
            .submission()
            .push(&entry)
            .map_err(|_| SubmitError::QueueFull)
    }

    fn flush(&mut self) -> io::Result<usize> {
        self.ring.submit()
    }

    fn submit_and_wait(&mut self, want: usize) -> io::Result<usize> {
        self.ring.submit_and_wait(want)
    }

    fn drain(&mut self, out: &mut Vec<Cqe>, max: usize) -> usize {
        let start = out.len();
        out.extend(self.ring.completion().take(max).map(|cqe| Cqe {
            user_data: cqe.user_data(),
            result: cqe.result(),
        }));
        out.len() - start
    }

    fn shutdown(&mut self, fd: RawFd) {
        unsafe {
            libc::shutdown(fd, libc::SHUT_RDWR);
            libc::close(fd);
        }
    }
}
