//! Project agnostic primitives
//!
//! Nothing in this module knows about entries, cursors or Redis. Types here
//! exist so that the more specific layers can agree on common seams.

mod clock;

pub use clock::{Clock, SystemClock};

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result with no value and a [`BoxedError`]
pub type EmptyResult = Result<(), BoxedError>;
