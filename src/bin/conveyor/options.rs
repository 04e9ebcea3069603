use structopt::{clap::arg_enum, StructOpt};

arg_enum! {
    #[derive(Debug)]
    pub enum LogFormat {
        Text,
        Compact,
        Json
    }
}

#[derive(Debug, StructOpt)]
#[structopt(about = "Self-coordinating event stream fan-out on top of Redis Streams.")]
pub struct MainOptions {
    /// Log level, scopable to different modules
    ///
    /// Levels: trace, debug, info, warn, error
    #[structopt(
        short,
        long,
        global = true,
        default_value = "info,hyper=warn,h2=warn",
        env = "RUST_LOG",
        value_name = "level"
    )]
    pub log: String,

    /// Formatting style for log outputs
    #[structopt(long, global = true, env, possible_values = &LogFormat::variants(), case_insensitive = true, default_value = "Compact")]
    pub log_format: LogFormat,

    /// Enable status reporting server which can be used as a readiness probe
    #[structopt(long, global = true, env, value_name = "port")]
    pub status_server: Option<u16>,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    Ingress(conveyor::module::ingress::Options),
    Consumer(conveyor::module::consumer::Options),
}
