//! Decoding and classification of completion queue entries.

use crate::runtime::token::{ConnId, OpKind, Token};
use std::io;

/// A raw completion as delivered by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cqe {
    pub user_data: u64,
    pub result: i32,
}

/// A completion tagged with the operation that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Accept finished; `result` is the new socket or a negated errno.
    Accept { result: i32 },
    /// Receive finished; `result` is the byte count or a negated errno.
    Read { conn: ConnId, result: i32 },
    /// Send finished; `result` is the byte count or a negated errno.
    Write { conn: ConnId, result: i32 },
    /// The idle sweep timer fired.
    Tick,
    /// An idle cancel finished.
    Cancel { conn: ConnId, result: i32 },
}

impl Completion {
    /// Resolve a raw completion through its token. Unknown tokens yield `None`.
    pub fn decode(cqe: Cqe) -> Option<Self> {
        let token = Token::decode(cqe.user_data)?;
        let result = cqe.result;
        Some(match token.op {
            OpKind::Accept => Completion::Accept { result },
            OpKind::Read => Completion::Read {
                conn: token.conn,
                result,
            },
            OpKind::Write => Completion::Write {
                conn: token.conn,
                result,
            },
            OpKind::Tick => Completion::Tick,
            OpKind::Cancel => Completion::Cancel {
                conn: token.conn,
                result,
            },
        })
    }
}

/// What a read or write result means for the connection.
#[derive(Debug)]
pub enum Outcome {
    /// `n > 0` bytes were moved.
    Transferred(usize),
    /// Transient failure; submit the same operation again.
    Retry,
    /// The peer went away or the operation was cancelled.
    Closed,
    /// Anything else. The connection is terminated and the error reported.
    Failed(io::Error),
}

/// Classify a recv/send result.
pub fn classify(result: i32) -> Outcome {
    if result > 0 {
        return Outcome::Transferred(result as usize);
    }
    if result == 0 {
        return Outcome::Closed;
    }

    match -result {
        libc::EINTR | libc::EAGAIN | libc::ENOBUFS => Outcome::Retry,
        libc::ECONNRESET
        | libc::EPIPE
        | libc::ENOTCONN
        | libc::ECONNABORTED
        | libc::ECANCELED
        | libc::ETIMEDOUT
        | libc::ESHUTDOWN => Outcome::Closed,
        errno => Outcome::Failed(io::Error::from_raw_os_error(errno)),
    }
}
