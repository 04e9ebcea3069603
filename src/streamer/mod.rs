//! Per-process ownership of a stream cursor
//!
//! Every consumer process runs exactly one [`Streamer`]. On its first fetch
//! it determines who it is: either the successor of a consumer whose
//! heartbeat expired (continuing from that cursor's position) or a brand-new
//! consumer starting at the stream tail. Afterwards it turns repository
//! batches into entries and folds acknowledgements back into cursor updates.

use crate::domain::{Entry, StreamCursor, CURSOR_TAIL};
use crate::library::Clock;
use crate::storage::{EntryRepository, RepositoryError};
use async_trait::async_trait;
use log::warn;
use std::time::{Duration, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Time allotted for processing a single entry
///
/// Doubles as the heartbeat TTL: a consumer that has not acknowledged for
/// this long loses its heartbeat and becomes an adoption candidate.
pub const CONSUMER_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors produced while streaming entries
#[derive(Debug, Error)]
pub enum StreamerError {
    /// Determining an identity during the first fetch failed
    #[error("cursor adoption failed: {0}")]
    Adoption(#[source] RepositoryError),

    /// Fetching the next batch from the repository failed
    #[error("failed to fetch entries: {0}")]
    Fetch(#[source] RepositoryError),

    /// Persisting the advanced cursor failed
    #[error("failed to store cursor position: {0}")]
    Acknowledge(#[source] RepositoryError),
}

/// Capability set for fetching entries and acknowledging their delivery
#[async_trait]
pub trait EntryStreamer {
    /// Fetches the next batch of entries in stream order
    async fn get_entries(&mut self) -> Result<Vec<Entry>, StreamerError>;

    /// Records that the entry with the given id has been fully processed
    async fn mark_entry_processed(&mut self, id: &str) -> Result<(), StreamerError>;
}

/// Stateful owner of a single [`StreamCursor`]
pub struct Streamer<R, C> {
    repository: R,
    clock: C,
    cursor: StreamCursor,
}

impl<R, C> Streamer<R, C>
where
    R: EntryRepository + Send + Sync,
    C: Clock + Send + Sync,
{
    /// Creates a streamer with no identity yet
    ///
    /// The identity is established lazily by the first
    /// [`get_entries`](EntryStreamer::get_entries) call.
    pub fn new(repository: R, clock: C) -> Self {
        Self {
            repository,
            clock,
            cursor: StreamCursor::default(),
        }
    }

    /// The cursor this streamer currently operates under
    pub fn cursor(&self) -> &StreamCursor {
        &self.cursor
    }

    /// Assumes the name and position of a consumer that stopped beating, or
    /// self-births at the stream tail when no candidate can be adopted.
    async fn identify(&mut self) -> Result<(), RepositoryError> {
        let cursors = self.repository.get_cursors().await?;

        for mut candidate in cursors {
            // A live heartbeat means the owner is still at work.
            if candidate.has_heart {
                continue;
            }

            let successor = unique_name();
            candidate.heart_timeout = CONSUMER_TIMEOUT;

            match self.repository.steal_cursor(&candidate, &successor).await {
                Ok(()) => {
                    self.cursor.name = successor;
                    self.cursor.last_id = candidate.last_id;
                    return Ok(());
                }
                // The owner advanced in the meantime or a rival adopter won.
                Err(RepositoryError::TxConflict) => continue,
                Err(error) => return Err(error),
            }
        }

        // Nobody to succeed. Start fresh and skip the backlog; the store
        // only learns about this cursor on its first acknowledgement.
        self.cursor.name = unique_name();
        self.cursor.last_id = CURSOR_TAIL.to_owned();

        Ok(())
    }

    /// Whether an acknowledgement arrives later than the heartbeat allows
    ///
    /// By that point the entry may already have been handed to an adopter,
    /// so the delivery possibly happened twice. Worth an advisory, never a
    /// failure.
    fn is_ack_overdue(&self, id: &str) -> bool {
        let millis = match id.split('-').next().and_then(|prefix| prefix.parse::<u64>().ok()) {
            Some(millis) => millis,
            None => {
                warn!("Failed to parse entry id {} into a timestamp", id);
                return false;
            }
        };

        let appended_at = UNIX_EPOCH + Duration::from_millis(millis);

        match self.clock.now().duration_since(appended_at) {
            Ok(elapsed) => elapsed > CONSUMER_TIMEOUT,
            Err(_) => false,
        }
    }
}

#[async_trait]
impl<R, C> EntryStreamer for Streamer<R, C>
where
    R: EntryRepository + Send + Sync,
    C: Clock + Send + Sync,
{
    async fn get_entries(&mut self) -> Result<Vec<Entry>, StreamerError> {
        if self.cursor.name.is_empty() {
            self.identify().await.map_err(StreamerError::Adoption)?;
        }

        let batch = self
            .repository
            .get_entries(&self.cursor.last_id)
            .await
            .map_err(StreamerError::Fetch)?;

        if let Some(last_id) = batch.last_id {
            self.cursor.last_id = last_id;
        }

        Ok(batch.entries)
    }

    async fn mark_entry_processed(&mut self, id: &str) -> Result<(), StreamerError> {
        if self.is_ack_overdue(id) {
            warn!(
                "Consumer {} finished processing entry {} after its heartbeat expired",
                self.cursor.name, id
            );
        }

        self.repository
            .store_cursor(&StreamCursor {
                name: self.cursor.name.clone(),
                last_id: id.to_owned(),
                heart_timeout: CONSUMER_TIMEOUT,
                has_heart: false,
            })
            .await
            .map_err(StreamerError::Acknowledge)
    }
}

fn unique_name() -> String {
    Uuid::new_v4().to_string()
}
