//! Error types shared by the runtime and the startup path.

use crate::config::ConfigError;
use crate::runtime::OpKind;
use std::{error, fmt, io, result};

/// A convenience wrapper around `Result` for [`Error`].
pub type Result<T> = result::Result<T, Error>;

/// Errors that can stop the server.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A system call or ring operation failed.
    Io(io::Error),
    /// The configuration could not be loaded.
    Config(ConfigError),
    /// An operation could not be queued.
    Submit(SubmitError),
    /// A slot was used outside its lifecycle.
    Slot(SlotError),
    /// The kernel or platform lacks a required capability.
    Unsupported(&'static str),
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Error {
        Error::Config(err)
    }
}

impl From<SubmitError> for Error {
    fn from(err: SubmitError) -> Error {
        Error::Submit(err)
    }
}

impl From<SlotError> for Error {
    fn from(err: SlotError) -> Error {
        Error::Slot(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Io(ref e) => fmt::Display::fmt(e, f),
            Error::Config(ref e) => fmt::Display::fmt(e, f),
            Error::Submit(ref e) => fmt::Display::fmt(e, f),
            Error::Slot(ref e) => fmt::Display::fmt(e, f),
            Error::Unsupported(what) => write!(f, "unsupported: {what}"),
        }
    }
}

/// Failure to place an operation on the submission queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// No free submission queue entry, even after flushing.
    QueueFull,
}

impl error::Error for SubmitError {}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SubmitError::QueueFull => write!(f, "submission queue full"),
        }
    }
}

/// Misuse of a connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// The id does not name a live slot (released, reused, or out of range).
    Stale,
    /// The slot already has an operation in flight.
    Busy(OpKind),
    /// A completion arrived that does not match the in-flight operation.
    Unexpected {
        expected: Option<OpKind>,
        found: OpKind,
    },
    /// The slot is not in a state that allows the operation.
    WrongStage,
}

impl error::Error for SlotError {}

impl fmt::Display for SlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SlotError::Stale => write!(f, "stale connection id"),
            SlotError::Busy(op) => write!(f, "slot busy with in-flight {op:?}"),
            SlotError::Unexpected { expected, found } => write!(
                f,
                "completion {found:?} does not match in-flight {expected:?}"
            ),
            SlotError::WrongStage => write!(f, "slot is in the wrong stage"),
        }
    }
}
