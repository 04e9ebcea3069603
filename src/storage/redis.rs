use super::{EntryBatch, EntryRepository, RepositoryError};
use crate::domain::{Entry, StreamCursor};
use crate::library::BoxedError;
use async_trait::async_trait;
use futures::lock::Mutex;
use log::warn;
use redis::aio::ConnectionLike;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Value};
use std::collections::HashMap;
use std::str;
use std::time::Duration;
use thiserror::Error;

const EVENT_STREAM: &str = "eventStream";
const FAULTY_STREAM: &str = "faultyStream";
const ENTRY_FIELD: &str = "entry";
const CONSUMER_SET: &str = "consumers";
const STREAM_ID_NEW: &str = "*";

const READ_BATCH_SIZE: usize = 10;
const READ_BLOCK: Duration = Duration::from_secs(1);

fn last_position_key(name: &str) -> String {
    format!("lastPosition:{}", name)
}

fn heart_key(name: &str) -> String {
    format!("heart:{}", name)
}

/// Variant of connections handed out by a [`RedisFactory`]
pub enum RedisConnectionVariant {
    /// Individual connection the consumer may run blocking or stateful
    /// commands on (`XREAD BLOCK`, `WATCH`) without disturbing other users
    Owned,
    /// Connection that is shared between users and therefore restricted to
    /// short, non-blocking commands
    Multiplexed,
}

/// Factory for connections to the backing store
///
/// Implementations decide how connections are established, monitored and
/// shared. Keeping this a capability allows the repository to run against a
/// scripted stand-in during tests.
#[async_trait]
pub trait RedisFactory: Send + Sync {
    /// Connection type produced by this factory
    type Connection: ConnectionLike + Send;

    /// Establishes a new connection or clones a shared one
    async fn connection(
        &self,
        variant: RedisConnectionVariant,
    ) -> Result<Self::Connection, BoxedError>;
}

/// Reasons a raw stream record could not be turned into an [`Entry`]
#[derive(Debug, Error)]
enum DecodeError {
    #[error("record carries no {ENTRY_FIELD:?} field")]
    MissingField,
    #[error("{ENTRY_FIELD:?} field is not a text value")]
    NotText,
    #[error("{ENTRY_FIELD:?} field is not a valid entry: {0}")]
    Json(#[from] serde_json::Error),
}

/// [`EntryRepository`] implementation backed by Redis Streams
///
/// This is the only type that speaks the store's dialect. Entries live in
/// the `eventStream` stream, undecodable records are diverted to
/// `faultyStream`, and cursors are coordinated through a name set plus
/// per-name position and heartbeat keys.
pub struct RedisRepository<F: RedisFactory> {
    factory: F,

    /// Dedicated connection for blocking stream reads, opened lazily on the
    /// first fetch and dropped after a read error so the next fetch redials.
    reader: Mutex<Option<F::Connection>>,
}

impl<F: RedisFactory> RedisRepository<F> {
    /// Creates a new repository drawing connections from the given factory
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            reader: Mutex::new(None),
        }
    }

    async fn decode_batch<C: ConnectionLike + Send>(
        con: &mut C,
        records: Vec<StreamId>,
    ) -> EntryBatch {
        let mut entries = Vec::with_capacity(records.len());
        let mut last_id = None;

        for record in records {
            last_id = Some(record.id.clone());

            match decode_entry(&record.id, &record.map) {
                Ok(entry) => entries.push(entry),
                Err(error) => {
                    warn!("Failed to decode record {}: {}", record.id, error);
                    quarantine_record(con, &record.id, &record.map).await;
                }
            }
        }

        EntryBatch { entries, last_id }
    }
}

#[async_trait]
impl<F: RedisFactory> EntryRepository for RedisRepository<F> {
    async fn add_entry(&self, entry: &Entry) -> Result<(), RepositoryError> {
        let payload = serde_json::to_vec(entry)?;

        let mut con = self
            .factory
            .connection(RedisConnectionVariant::Multiplexed)
            .await
            .map_err(RepositoryError::Connection)?;

        con.xadd::<_, _, _, _, ()>(EVENT_STREAM, STREAM_ID_NEW, &[(ENTRY_FIELD, payload)])
            .await?;

        Ok(())
    }

    async fn get_entries(&self, last_id: &str) -> Result<EntryBatch, RepositoryError> {
        let mut reader = self.reader.lock().await;
        let mut con = match reader.take() {
            Some(con) => con,
            None => self
                .factory
                .connection(RedisConnectionVariant::Owned)
                .await
                .map_err(RepositoryError::Connection)?,
        };

        let options = StreamReadOptions::default()
            .count(READ_BATCH_SIZE)
            .block(READ_BLOCK.as_millis() as usize);

        // Early returns below leave the reader slot empty, the next fetch
        // redials instead of reusing a connection that errored.
        let reply: Option<StreamReadReply> = con
            .xread_options(&[EVENT_STREAM], &[last_id], &options)
            .await?;

        // A nil reply means the blocking interval elapsed with no new data.
        let reply = match reply {
            Some(reply) => reply,
            None => {
                *reader = Some(con);
                return Ok(EntryBatch::default());
            }
        };

        let stream = reply
            .keys
            .into_iter()
            .find(|key| key.key == EVENT_STREAM)
            .ok_or(RepositoryError::UnexpectedReply(
                "read reply is missing the event stream",
            ))?;

        let batch = Self::decode_batch(&mut con, stream.ids).await;
        *reader = Some(con);

        Ok(batch)
    }

    async fn store_cursor(&self, cursor: &StreamCursor) -> Result<(), RepositoryError> {
        let mut con = self
            .factory
            .connection(RedisConnectionVariant::Multiplexed)
            .await
            .map_err(RepositoryError::Connection)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .sadd(CONSUMER_SET, &cursor.name)
            .set(last_position_key(&cursor.name), &cursor.last_id)
            .pset_ex(
                heart_key(&cursor.name),
                1,
                cursor.heart_timeout.as_millis() as usize,
            );

        pipe.query_async::<_, ()>(&mut con).await?;

        Ok(())
    }

    async fn get_cursors(&self) -> Result<Vec<StreamCursor>, RepositoryError> {
        let mut con = self
            .factory
            .connection(RedisConnectionVariant::Multiplexed)
            .await
            .map_err(RepositoryError::Connection)?;

        // One round-trip resolves membership, liveness and position for
        // every consumer. Sorting by position keeps the candidate order
        // stable across concurrent adopters.
        let reply: Vec<Option<String>> = redis::cmd("SORT")
            .arg(CONSUMER_SET)
            .arg("BY")
            .arg(last_position_key("*"))
            .arg("GET")
            .arg(heart_key("*"))
            .arg("GET")
            .arg("#")
            .arg("GET")
            .arg(last_position_key("*"))
            .arg("ALPHA")
            .query_async(&mut con)
            .await?;

        Ok(cursors_from_sort_reply(reply))
    }

    async fn steal_cursor(
        &self,
        victim: &StreamCursor,
        new_name: &str,
    ) -> Result<(), RepositoryError> {
        let mut con = self
            .factory
            .connection(RedisConnectionVariant::Owned)
            .await
            .map_err(RepositoryError::Connection)?;

        let position_key = last_position_key(&victim.name);

        redis::cmd("WATCH")
            .arg(&position_key)
            .query_async::<_, ()>(&mut con)
            .await?;

        // A changed position means the victim is still advancing; a missing
        // one means a rival adopter already renamed it. Both end the attempt.
        let observed: Option<String> = con.get(&position_key).await?;
        let observed = match observed {
            Some(value) if value == victim.last_id => value,
            _ => {
                redis::cmd("UNWATCH").query_async::<_, ()>(&mut con).await?;
                return Err(RepositoryError::TxConflict);
            }
        };

        let mut pipe = redis::pipe();
        pipe.atomic()
            .srem(CONSUMER_SET, &victim.name)
            .del(&position_key)
            .sadd(CONSUMER_SET, new_name)
            .set(last_position_key(new_name), &observed)
            .pset_ex(
                heart_key(new_name),
                1,
                victim.heart_timeout.as_millis() as usize,
            );

        let committed: Option<()> = pipe.query_async(&mut con).await?;

        match committed {
            Some(()) => Ok(()),
            None => Err(RepositoryError::TxConflict),
        }
    }
}

fn decode_entry(id: &str, fields: &HashMap<String, Value>) -> Result<Entry, DecodeError> {
    let value = fields.get(ENTRY_FIELD).ok_or(DecodeError::MissingField)?;

    let raw = match value {
        Value::Data(bytes) => bytes,
        _ => return Err(DecodeError::NotText),
    };
    let text = str::from_utf8(raw).map_err(|_| DecodeError::NotText)?;

    let mut entry: Entry = serde_json::from_str(text)?;
    entry.id = id.to_owned();

    Ok(entry)
}

/// Diverts an undecodable record to the faulty stream and deletes the
/// original so no other cursor trips over it. Best effort, failures are
/// only logged.
async fn quarantine_record<C: ConnectionLike + Send>(
    con: &mut C,
    id: &str,
    fields: &HashMap<String, Value>,
) {
    let fields: Vec<(String, Vec<u8>)> = fields
        .iter()
        .filter_map(|(key, value)| {
            redis::from_redis_value::<Vec<u8>>(value)
                .ok()
                .map(|bytes| (key.clone(), bytes))
        })
        .collect();

    let mut pipe = redis::pipe();
    pipe.atomic()
        .xadd(FAULTY_STREAM, STREAM_ID_NEW, &fields)
        .xdel(EVENT_STREAM, &[id]);

    if let Err(error) = pipe.query_async::<_, ()>(con).await {
        warn!("Failed to quarantine record {}: {}", id, error);
    }
}

/// Decodes the flat `SORT .. GET heart GET # GET lastPosition` reply into
/// cursors, three values per consumer. Stray trailing values are dropped.
fn cursors_from_sort_reply(values: Vec<Option<String>>) -> Vec<StreamCursor> {
    values
        .chunks_exact(3)
        .filter_map(|triple| {
            let name = triple[1].clone()?;

            Some(StreamCursor {
                name,
                last_id: triple[2].clone().unwrap_or_default(),
                heart_timeout: Duration::ZERO,
                has_heart: triple[0].is_some(),
            })
        })
        .collect()
}
