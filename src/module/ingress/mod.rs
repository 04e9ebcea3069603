//! HTTP traffic ingress accepting new entries from producers

use crate::harness::{Heart, Module};
use crate::library::BoxedError;
use async_trait::async_trait;
use jatsl::{schedule, JobScheduler};

mod options;
mod server;

pub use options::Options;
use server::ServerJob;

/// Module implementation
pub struct Ingress {
    options: Options,
}

impl Ingress {
    /// Creates a new instance from raw parts
    pub fn new(options: Options) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Module for Ingress {
    async fn run(&mut self, scheduler: &JobScheduler) -> Result<Option<Heart>, BoxedError> {
        let server_job = ServerJob::new(self.options.port, self.options.redis.url.clone());

        schedule!(scheduler, { server_job });

        Ok(Some(Heart::without_heart_stone()))
    }
}
