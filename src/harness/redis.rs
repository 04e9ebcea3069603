//! Monitored connections to the backing store
//!
//! Connections created here report fatal errors to the jatsl job that owns
//! them, so a lost store connection restarts the affected job instead of
//! leaving it wedged. The shared multiplexed connection is cached per
//! factory instance, never in process globals, so test harnesses can build
//! isolated repositories side by side.

use crate::library::BoxedError;
use crate::storage::{RedisConnectionVariant, RedisFactory};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::lock::Mutex;
use jatsl::{TaskManager, TaskResourceHandle};
use log::{debug, error, warn};
use redis::aio::{Connection, ConnectionLike, MultiplexedConnection};
use redis::{Client, Cmd, Pipeline, RedisError, RedisFuture, RedisResult, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tokio::task::yield_now;
use tokio::time::{sleep, timeout};

/// Factory to provide [`TaskResourceHandle`] instances
pub trait ResourceHandleProvider {
    /// Instantiates a new [`TaskResourceHandle`]
    fn create_handle(&self) -> TaskResourceHandle;
}

impl<C> ResourceHandleProvider for TaskManager<C> {
    fn create_handle(&self) -> TaskResourceHandle {
        self.create_resource_handle()
    }
}

/// Dynamic dispatch version of [`ResourceHandleProvider`]
pub type BoxedResourceHandleProvider = Arc<dyn ResourceHandleProvider + Send + Sync>;

type SharedConnectionFuture = Shared<BoxFuture<'static, MultiplexedConnection>>;

/// Book-keeping for one factory's shared multiplexed connection
#[derive(Default)]
struct SharedConnectionState {
    connection: Mutex<Option<SharedConnectionFuture>>,
    handles: Mutex<HashSet<TaskResourceHandle>>,
}

/// Redis connection that monitors for connection errors
///
/// Fatal errors are reported through the owning job's resource handle; for
/// shared connections all sibling handles are notified as well and the
/// cached connection is invalidated so the next user redials.
pub struct RedisResource<C: ConnectionLike> {
    con: C,
    handle: TaskResourceHandle,
    shared_state: Option<Arc<SharedConnectionState>>,
}

impl<C: ConnectionLike> RedisResource<C> {
    async fn notify(&mut self, error: &RedisError) {
        error!("Redis connection encountered an error: {}", error);

        self.handle.resource_died().await;

        if let Some(state) = &self.shared_state {
            *state.connection.lock().await = None;

            let handles = state.handles.lock().await;
            for handle in handles.iter() {
                handle.clone().resource_died().await;
            }
        }

        yield_now().await;
    }
}

impl<C: ConnectionLike> Drop for RedisResource<C> {
    fn drop(&mut self) {
        // Lazily unregister from the sibling notification list
        if let Some(state) = self.shared_state.take() {
            let handle = self.handle.clone();
            task::spawn(async move {
                state.handles.lock().await.remove(&handle);
            });
        }
    }
}

macro_rules! notify_if_disconnected {
    ($self:expr, $result:expr) => {
        if let Err(ref e) = $result {
            if e.is_connection_dropped()
                || e.is_io_error()
                || e.is_connection_refusal()
                || e.is_timeout()
            {
                $self.notify(e).await;
            }
        }
    };
}

impl<C: ConnectionLike + Send> ConnectionLike for RedisResource<C> {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        (async move {
            let result = self.con.req_packed_command(cmd).await;
            notify_if_disconnected!(self, result);
            result
        })
        .boxed()
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        (async move {
            let result = self.con.req_packed_commands(cmd, offset, count).await;
            notify_if_disconnected!(self, result);
            result
        })
        .boxed()
    }

    fn get_db(&self) -> i64 {
        self.con.get_db()
    }
}

impl RedisResource<Connection> {
    /// Creates a new standalone redis connection
    async fn standalone(handle: TaskResourceHandle, url: &str) -> RedisResult<Self> {
        debug!("Instantiating new standalone redis client");

        let client = Client::open(url)?;
        let con = connect_standalone(client).await;

        Ok(Self {
            con,
            handle,
            shared_state: None,
        })
    }
}

async fn connect_standalone(client: Client) -> Connection {
    let retry_interval = Duration::from_secs(2);
    let request_timeout = Duration::from_secs(4);

    loop {
        match timeout(request_timeout, client.get_async_connection()).await {
            Ok(Ok(connection)) => return connection,
            Ok(Err(error)) => warn!("Failed to connect to redis: {}", error),
            Err(_) => warn!("Timeout connecting to redis"),
        }

        sleep(retry_interval).await;
    }
}

async fn connect_shared(client: Client) -> MultiplexedConnection {
    let retry_interval = Duration::from_secs(2);
    let request_timeout = Duration::from_secs(4);

    loop {
        match timeout(request_timeout, client.get_multiplexed_tokio_connection()).await {
            Ok(Ok(connection)) => return connection,
            Ok(Err(error)) => warn!("Failed to connect to redis: {}", error),
            Err(_) => warn!("Timeout connecting to redis"),
        }

        sleep(retry_interval).await;
    }
}

/// Connection handed out by the [`MonitoredRedisFactory`]
pub enum RedisConnection {
    /// Individual connection for blocking or stateful command sequences
    Standalone(RedisResource<Connection>),
    /// Handle to the factory-wide multiplexed connection
    Shared(RedisResource<MultiplexedConnection>),
}

impl ConnectionLike for RedisConnection {
    fn req_packed_command<'a>(&'a mut self, cmd: &'a Cmd) -> RedisFuture<'a, Value> {
        match self {
            RedisConnection::Standalone(con) => con.req_packed_command(cmd),
            RedisConnection::Shared(con) => con.req_packed_command(cmd),
        }
    }

    fn req_packed_commands<'a>(
        &'a mut self,
        cmd: &'a Pipeline,
        offset: usize,
        count: usize,
    ) -> RedisFuture<'a, Vec<Value>> {
        match self {
            RedisConnection::Standalone(con) => con.req_packed_commands(cmd, offset, count),
            RedisConnection::Shared(con) => con.req_packed_commands(cmd, offset, count),
        }
    }

    fn get_db(&self) -> i64 {
        match self {
            RedisConnection::Standalone(con) => con.get_db(),
            RedisConnection::Shared(con) => con.get_db(),
        }
    }
}

/// [`RedisFactory`] implementation providing jatsl interop
///
/// Jobs construct one factory per execution from their [`jatsl::JobManager`]
/// so that every connection failure marks the job's resources as dead and
/// triggers a restart.
pub struct MonitoredRedisFactory {
    url: String,
    handle_provider: BoxedResourceHandleProvider,
    shared: Arc<SharedConnectionState>,
}

impl MonitoredRedisFactory {
    /// Creates a new factory opening connections to the given URL
    pub fn new(url: String, handle_provider: BoxedResourceHandleProvider) -> Self {
        Self {
            url,
            handle_provider,
            shared: Arc::new(SharedConnectionState::default()),
        }
    }

    async fn shared_connection(
        &self,
        handle: TaskResourceHandle,
    ) -> RedisResult<RedisResource<MultiplexedConnection>> {
        let client = Client::open(self.url.as_str())?;

        let future = {
            let mut slot = self.shared.connection.lock().await;
            match &*slot {
                Some(future) => future.clone(),
                None => {
                    debug!("Instantiating new shared redis connection");
                    let future = connect_shared(client).boxed().shared();
                    *slot = Some(future.clone());
                    future
                }
            }
        };

        let con = future.await;

        self.shared.handles.lock().await.insert(handle.clone());

        Ok(RedisResource {
            con,
            handle,
            shared_state: Some(self.shared.clone()),
        })
    }
}

#[async_trait]
impl RedisFactory for MonitoredRedisFactory {
    type Connection = RedisConnection;

    async fn connection(
        &self,
        variant: RedisConnectionVariant,
    ) -> Result<Self::Connection, BoxedError> {
        let handle = self.handle_provider.create_handle();

        match variant {
            RedisConnectionVariant::Owned => Ok(RedisConnection::Standalone(
                RedisResource::standalone(handle, &self.url).await?,
            )),
            RedisConnectionVariant::Multiplexed => {
                Ok(RedisConnection::Shared(self.shared_connection(handle).await?))
            }
        }
    }
}
