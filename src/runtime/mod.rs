//! Completion-queue runtime for the echo server.
//!
//! - `Driver`: the submission/completion channel (io_uring on Linux)
//! - `EventLoop`: submits operations and dispatches their completions
//! - `ConnectionTable`: fixed arena of connections and their buffers
//! - `Token`: operation tagging for completion correlation

mod buffer;
mod completion;
mod connection;
mod driver;
mod event_loop;
mod token;

#[cfg(test)]
mod mock;

pub(crate) use event_loop::EventLoop;
pub(crate) use token::OpKind;

#[cfg(target_os = "linux")]
mod uring;

#[cfg(target_os = "linux")]
pub(crate) use uring::UringDriver;
