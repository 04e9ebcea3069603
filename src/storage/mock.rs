//! Recording test doubles for the storage layer
//!
//! [`MockRepository`] stands in for the full [`EntryRepository`] contract and
//! records every interaction, while [`ScriptedFactory`] and
//! [`ScriptedConnection`] replace the raw store client underneath the real
//! [`RedisRepository`](super::RedisRepository) with pre-scripted replies.

use super::{EntryBatch, EntryRepository, RedisConnectionVariant, RedisFactory, RepositoryError};
use crate::domain::{Entry, StreamCursor};
use crate::library::BoxedError;
use async_trait::async_trait;
use futures::FutureExt;
use redis::aio::ConnectionLike;
use redis::{Cmd, ErrorKind, Pipeline, RedisError, RedisFuture, RedisResult, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Store connection that answers from a list of scripted replies
///
/// Every packed command is recorded in a shared log (as lossy UTF-8) so
/// tests can assert on the wire traffic.
pub struct ScriptedConnection {
    replies: VecDeque<RedisResult<Value>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnection {
    fn pop_reply(&mut self) -> RedisResult<Value> {
        self.replies
            .pop_front()
            .unwrap_or_else(|| Err(RedisError::from((ErrorKind::ClientError, "no scripted reply left"))))
    }

    fn record(&self, packed: Vec<u8>) {
        self.commands
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&packed).into_owned());
    }
}

impl ConnectionLike for ScriptedConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        self.record(cmd.get_packed_command());

        let reply = self.pop_reply();
        (async move { reply }).boxed()
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        _offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        self.record(cmd.get_packed_pipeline());

        let mut replies = Vec::with_capacity(count);
        for _ in 0..count {
            replies.push(self.pop_reply());
        }

        (async move { replies.into_iter().collect() }).boxed()
    }

    fn get_db(&self) -> i64 {
        0
    }
}

/// [`RedisFactory`] handing out [`ScriptedConnection`]s in order
///
/// All connections created through one factory share a single command log.
#[derive(Default)]
pub struct ScriptedFactory {
    connections: Mutex<VecDeque<ScriptedConnection>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl ScriptedFactory {
    /// Queues a connection that will answer with the given replies
    pub fn push_connection(&self, replies: Vec<RedisResult<Value>>) {
        self.connections.lock().unwrap().push_back(ScriptedConnection {
            replies: replies.into(),
            commands: self.commands.clone(),
        });
    }

    /// Shared log of all packed commands sent through this factory
    pub fn command_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.commands.clone()
    }
}

#[async_trait]
impl RedisFactory for ScriptedFactory {
    type Connection = ScriptedConnection;

    async fn connection(
        &self,
        _variant: RedisConnectionVariant,
    ) -> Result<Self::Connection, BoxedError> {
        self.connections
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| "no scripted connection left".into())
    }
}

#[derive(Default)]
struct MockState {
    added: Vec<Entry>,
    add_entry_error: Option<RepositoryError>,
    batches: VecDeque<EntryBatch>,
    get_entries_error: Option<RepositoryError>,
    fetched_after: Vec<String>,
    stored: Vec<StreamCursor>,
    store_cursor_error: Option<RepositoryError>,
    cursors: Vec<StreamCursor>,
    get_cursors_error: Option<RepositoryError>,
    stolen: Vec<(StreamCursor, String)>,
    steal_results: VecDeque<Result<(), RepositoryError>>,
}

/// Recording [`EntryRepository`] stand-in
///
/// Interactions are captured for later inspection; scripted errors are
/// consumed on first use. Unscripted calls succeed with empty results.
/// Clones share their state, so tests can keep a handle on a repository
/// they moved into the code under test.
#[derive(Default, Clone)]
pub struct MockRepository {
    state: Arc<Mutex<MockState>>,
}

impl MockRepository {
    /// Queues a batch to be returned by a future `get_entries` call
    pub fn push_batch(&self, batch: EntryBatch) {
        self.state.lock().unwrap().batches.push_back(batch);
    }

    /// Makes the next `get_entries` call fail
    pub fn fail_get_entries(&self, error: RepositoryError) {
        self.state.lock().unwrap().get_entries_error = Some(error);
    }

    /// Sets the cursor listing returned by `get_cursors`
    pub fn set_cursors(&self, cursors: Vec<StreamCursor>) {
        self.state.lock().unwrap().cursors = cursors;
    }

    /// Makes the next `get_cursors` call fail
    pub fn fail_get_cursors(&self, error: RepositoryError) {
        self.state.lock().unwrap().get_cursors_error = Some(error);
    }

    /// Queues the outcome of a future `steal_cursor` call
    pub fn push_steal_result(&self, result: Result<(), RepositoryError>) {
        self.state.lock().unwrap().steal_results.push_back(result);
    }

    /// Makes the next `store_cursor` call fail
    pub fn fail_store_cursor(&self, error: RepositoryError) {
        self.state.lock().unwrap().store_cursor_error = Some(error);
    }

    /// Makes the next `add_entry` call fail
    pub fn fail_add_entry(&self, error: RepositoryError) {
        self.state.lock().unwrap().add_entry_error = Some(error);
    }

    /// Entries passed to `add_entry` so far
    pub fn added(&self) -> Vec<Entry> {
        self.state.lock().unwrap().added.clone()
    }

    /// Positions passed to `get_entries` so far
    pub fn fetched_after(&self) -> Vec<String> {
        self.state.lock().unwrap().fetched_after.clone()
    }

    /// Cursors passed to `store_cursor` so far
    pub fn stored(&self) -> Vec<StreamCursor> {
        self.state.lock().unwrap().stored.clone()
    }

    /// Victim and successor name of every `steal_cursor` call so far
    pub fn stolen(&self) -> Vec<(StreamCursor, String)> {
        self.state.lock().unwrap().stolen.clone()
    }
}

#[async_trait]
impl EntryRepository for MockRepository {
    async fn add_entry(&self, entry: &Entry) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.added.push(entry.clone());

        match state.add_entry_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn get_entries(&self, last_id: &str) -> Result<EntryBatch, RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.fetched_after.push(last_id.to_owned());

        if let Some(error) = state.get_entries_error.take() {
            return Err(error);
        }

        Ok(state.batches.pop_front().unwrap_or_default())
    }

    async fn store_cursor(&self, cursor: &StreamCursor) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.stored.push(cursor.clone());

        match state.store_cursor_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn get_cursors(&self) -> Result<Vec<StreamCursor>, RepositoryError> {
        let mut state = self.state.lock().unwrap();

        match state.get_cursors_error.take() {
            Some(error) => Err(error),
            None => Ok(state.cursors.clone()),
        }
    }

    async fn steal_cursor(
        &self,
        victim: &StreamCursor,
        new_name: &str,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        state.stolen.push((victim.clone(), new_name.to_owned()));

        state.steal_results.pop_front().unwrap_or(Ok(()))
    }
}
