//! Domain model of the event stream
//!
//! The types in this module describe what flows through the system: producer
//! submitted [`entries`](Entry) and the per-consumer [`cursors`](StreamCursor)
//! that track how far each consumer has read.

mod cursor;
mod entry;

pub use cursor::{StreamCursor, CURSOR_TAIL};
pub use entry::{Action, Entry, ValidationError, META_FORMAT};
