use crate::consumer::{Driver, Printer};
use crate::harness::MonitoredRedisFactory;
use crate::library::{EmptyResult, SystemClock};
use crate::storage::RedisRepository;
use crate::streamer::Streamer;
use async_trait::async_trait;
use jatsl::{Job, JobManager};
use std::sync::Arc;
use tokio::select;

/// Job driving the fetch, deliver, acknowledge loop
pub struct StreamingJob {
    redis_url: String,
}

impl StreamingJob {
    /// Creates a new instance from raw parts
    pub fn new(redis_url: String) -> Self {
        Self { redis_url }
    }
}

#[async_trait]
impl Job for StreamingJob {
    const NAME: &'static str = module_path!();
    const SUPPORTS_GRACEFUL_TERMINATION: bool = true;

    async fn execute(&self, manager: JobManager) -> EmptyResult {
        let factory =
            MonitoredRedisFactory::new(self.redis_url.clone(), Arc::new(manager.clone()));
        let repository = RedisRepository::new(factory);
        let streamer = Streamer::new(repository, SystemClock);
        let mut driver = Driver::new(streamer, Printer);

        manager.ready().await;

        // The delivery loop only ever returns with a fatal fetch error.
        // Failing the job hands the restart to the scheduler, which re-runs
        // the adoption protocol and recovers the cursor position.
        select! {
            error = driver.run() => Err(error.into()),
            _ = manager.termination_signal() => Ok(()),
        }
    }
}
