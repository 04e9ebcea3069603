//! Delivery of entries to a terminal sink
//!
//! The [`Driver`] is the consumer process's main loop: fetch a batch from
//! the streamer, hand each entry to the [`Sink`], acknowledge what went
//! through. Delivery is at-least-once; an entry whose sink call or
//! acknowledgement fails is fetched again later because the cursor never
//! moved past it.

use crate::domain::Entry;
use crate::library::EmptyResult;
use crate::streamer::{EntryStreamer, StreamerError};
use async_trait::async_trait;
use log::warn;

/// Terminal consumer of entries
///
/// Because of at-least-once delivery, implementations should be idempotent
/// over repeated entry ids.
#[async_trait]
pub trait Sink {
    /// Processes a single entry, failing when it could not be handled
    async fn consume(&self, entry: &Entry) -> EmptyResult;
}

/// [`Sink`] that pretty-prints every entry to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct Printer;

#[async_trait]
impl Sink for Printer {
    async fn consume(&self, entry: &Entry) -> EmptyResult {
        let rendered = serde_json::to_string_pretty(entry)?;
        println!("{}", rendered);

        Ok(())
    }
}

/// Delivery loop connecting a streamer to a sink
pub struct Driver<S, K> {
    streamer: S,
    sink: K,
}

impl<S, K> Driver<S, K>
where
    S: EntryStreamer + Send,
    K: Sink + Send + Sync,
{
    /// Creates a new driver from its two collaborators
    pub fn new(streamer: S, sink: K) -> Self {
        Self { streamer, sink }
    }

    /// Delivers entries until fetching fails and returns the fatal error
    ///
    /// Sink and acknowledgement failures are logged and skipped; the entry
    /// in question is re-delivered on a later fetch since the cursor only
    /// advances on successful acknowledgement.
    pub async fn run(&mut self) -> StreamerError {
        loop {
            let entries = match self.streamer.get_entries().await {
                Ok(entries) => entries,
                Err(error) => return error,
            };

            for entry in entries {
                if let Err(error) = self.sink.consume(&entry).await {
                    warn!("Failed to consume entry {}: {}", entry.id, error);
                    continue;
                }

                if let Err(error) = self.streamer.mark_entry_processed(&entry.id).await {
                    warn!("Failed to acknowledge entry {}: {}", entry.id, error);
                }
            }
        }
    }
}
