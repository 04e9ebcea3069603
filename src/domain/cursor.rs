use std::time::Duration;

/// Cursor position sentinel that skips everything already in the stream
///
/// A cursor sitting at the tail only receives entries appended after it was
/// created. Freshly started consumers that found nobody to succeed use this
/// so a new fleet does not replay the backlog. The store also knows `"0"`
/// (read from the very beginning) which this design reserves but never uses.
pub const CURSOR_TAIL: &str = "$";

/// Position marker of a single consumer within the event stream
///
/// Cursors are registered in the store under their `name` together with a
/// heartbeat key whose expiry signals the owner's death. A cursor whose
/// heartbeat is gone may be adopted by a new consumer, which atomically
/// renames it and continues from its `last_id`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamCursor {
    /// Unique name of the owning consumer
    pub name: String,

    /// Identifier of the last acknowledged entry, or [`CURSOR_TAIL`]
    pub last_id: String,

    /// Time-to-live of the heartbeat key written alongside the position
    pub heart_timeout: Duration,

    /// Whether the heartbeat key still existed when the cursor was read
    pub has_heart: bool,
}
