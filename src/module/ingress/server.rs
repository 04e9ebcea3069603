use crate::domain::Entry;
use crate::harness::MonitoredRedisFactory;
use crate::library::EmptyResult;
use crate::storage::{EntryRepository, RedisRepository};
use async_trait::async_trait;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use jatsl::{Job, JobManager};
use log::warn;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

const ENTRY_PATH: &str = "/entry";

/// Job serving the producer facing HTTP endpoint
pub struct ServerJob {
    port: u16,
    redis_url: String,
}

impl ServerJob {
    /// Creates a new instance from raw parts
    pub fn new(port: u16, redis_url: String) -> Self {
        Self { port, redis_url }
    }
}

#[async_trait]
impl Job for ServerJob {
    const NAME: &'static str = module_path!();
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    async fn execute(&self, manager: JobManager) -> EmptyResult {
        let factory =
            MonitoredRedisFactory::new(self.redis_url.clone(), Arc::new(manager.clone()));
        let repository = Arc::new(RedisRepository::new(factory));

        let make_svc = make_service_fn(move |_conn| {
            let repository = repository.clone();

            async move {
                Ok::<_, Infallible>(service_fn(move |request| {
                    let repository = repository.clone();

                    async move { Ok::<_, Infallible>(respond(&*repository, request).await) }
                }))
            }
        });

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let server = Server::bind(&addr).serve(make_svc);
        let graceful = server.with_graceful_shutdown(manager.termination_signal());

        manager.ready().await;
        graceful.await?;

        Ok(())
    }
}

/// Validates and appends a submitted entry
///
/// Producers see `201` once the entry is durable, `400` for anything wrong
/// with the submission itself and `500` when the request body could not be
/// read at all.
async fn respond<R: EntryRepository + Sync>(
    repository: &R,
    request: Request<Body>,
) -> Response<Body> {
    let method_matches = request.method() == Method::POST;
    let path_matches = request.uri().path().eq_ignore_ascii_case(ENTRY_PATH);

    if !(method_matches && path_matches) {
        return plain_response(StatusCode::NOT_FOUND, "404 Not found.");
    }

    let body = match hyper::body::to_bytes(request.into_body()).await {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!("Failed to read request body: {}", error);
            return plain_response(StatusCode::INTERNAL_SERVER_ERROR, &error.to_string());
        }
    };

    let entry = match serde_json::from_slice::<Entry>(&body) {
        Ok(entry) => entry,
        Err(error) => {
            warn!("Failed to deserialize entry: {}", error);
            return plain_response(StatusCode::BAD_REQUEST, &error.to_string());
        }
    };

    if let Err(error) = entry.validate() {
        warn!("Failed to validate entry: {}", error);
        return plain_response(StatusCode::BAD_REQUEST, &error.to_string());
    }

    if let Err(error) = repository.add_entry(&entry).await {
        warn!("Failed to append entry: {}", error);
        return plain_response(StatusCode::BAD_REQUEST, &error.to_string());
    }

    Response::builder()
        .status(StatusCode::CREATED)
        .body(Body::empty())
        .unwrap()
}

fn plain_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(message.to_owned()))
        .unwrap()
}
