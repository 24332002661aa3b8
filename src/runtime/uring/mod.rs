//! Linux io_uring backend.
//!
//! Completion-based I/O with batched submissions. The ring only moves
//! operations and completions; all connection logic lives in the
//! generic event loop.

mod driver;

pub(crate) use driver::UringDriver;
