//! Streaming consumer delivering entries to the terminal sink

use crate::harness::{Heart, Module};
use crate::library::BoxedError;
use async_trait::async_trait;
use jatsl::{schedule, JobScheduler};

mod options;
mod streaming;

pub use options::Options;
use streaming::StreamingJob;

/// Module implementation
pub struct Consumer {
    options: Options,
}

impl Consumer {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Module for Consumer {
    async fn run(&mut self, scheduler: &JobScheduler) -> Result<Option<Heart>, BoxedError> {
        let streaming_job = StreamingJob::new(self.options.redis.url.clone());

        schedule!(scheduler, { streaming_job });

        Ok(Some(Heart::without_heart_stone()))
    }
}
