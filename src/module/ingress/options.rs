use crate::module::options::RedisOptions;
use structopt::StructOpt;

/// Options for the ingress module
#[derive(Debug, StructOpt)]
pub struct Options {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub redis: RedisOptions,

    /// TCP port the entry endpoint listens on
    #[structopt(short, long, env, default_value = "80")]
    pub port: u16,
}
