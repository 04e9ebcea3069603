use crate::module::options::RedisOptions;
use structopt::StructOpt;

/// Options for the consumer module
#[derive(Debug, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub redis: RedisOptions,
}
