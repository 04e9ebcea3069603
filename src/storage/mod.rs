//! Persistence of entries and cursors
//!
//! The [`EntryRepository`] trait is the only place where the rest of the
//! system touches durable state. It is modelled as a capability set so that
//! the streamer and the ingress can be exercised against recording test
//! doubles instead of a live store.

#[cfg(test)]
pub mod mock;
mod redis;

pub use self::redis::{RedisConnectionVariant, RedisFactory, RedisRepository};

use crate::domain::{Entry, StreamCursor};
use crate::library::BoxedError;
use async_trait::async_trait;
use thiserror::Error;

/// Batch of entries read from the event stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryBatch {
    /// Successfully decoded entries in store order
    pub entries: Vec<Entry>,

    /// Identifier of the last raw record in the batch
    ///
    /// This also advances past records that failed to decode and were
    /// quarantined, so readers do not fetch them again. `None` when the
    /// batch is empty.
    pub last_id: Option<String>,
}

/// Errors produced by [`EntryRepository`] implementations
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A cursor transaction aborted because the watched position moved
    ///
    /// During adoption this means the supposed victim is still advancing
    /// (or a rival adopter got there first) and is not an error condition
    /// for the caller.
    #[error("cursor transaction aborted, the position moved underneath us")]
    TxConflict,

    /// An entry could not be serialized for appending
    #[error("failed to serialize entry: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store rejected or failed a command
    #[error("store command failed: {0}")]
    Store(#[from] ::redis::RedisError),

    /// No connection to the store could be established
    #[error("failed to open store connection: {0}")]
    Connection(#[source] BoxedError),

    /// The store answered with something the repository can not interpret
    #[error("unexpected reply from the store: {0}")]
    UnexpectedReply(&'static str),
}

/// Capability set for persisting entries and coordinating cursors
#[async_trait]
pub trait EntryRepository {
    /// Appends an entry to the event stream, making it visible to readers
    async fn add_entry(&self, entry: &Entry) -> Result<(), RepositoryError>;

    /// Reads a bounded batch of entries strictly after `last_id`
    ///
    /// Blocks for a short interval when no entries are immediately
    /// available and returns an empty batch once it elapses.
    async fn get_entries(&self, last_id: &str) -> Result<EntryBatch, RepositoryError>;

    /// Registers the cursor and refreshes its position and heartbeat
    ///
    /// All three side effects (membership, position, heartbeat) apply
    /// atomically or not at all.
    async fn store_cursor(&self, cursor: &StreamCursor) -> Result<(), RepositoryError>;

    /// Lists all known cursors together with their liveness state
    ///
    /// `heart_timeout` is not populated on the returned cursors.
    async fn get_cursors(&self) -> Result<Vec<StreamCursor>, RepositoryError>;

    /// Atomically renames a dead cursor to `new_name`
    ///
    /// Fails with [`RepositoryError::TxConflict`] when the victim's position
    /// changed (or vanished) since it was observed, which signals that the
    /// victim is alive or has already been adopted by somebody else.
    async fn steal_cursor(
        &self,
        victim: &StreamCursor,
        new_name: &str,
    ) -> Result<(), RepositoryError>;
}
