use anyhow::Result;
use conveyor::harness::ModuleRunner;
use conveyor::module::consumer::Consumer;
use conveyor::module::ingress::Ingress;
use options::{Command, LogFormat};
use structopt::StructOpt;
use tracing::info;

mod options;

#[tokio::main]
async fn main() -> Result<()> {
    let (command, runner) = init().await?;

    match command {
        Command::Ingress(options) => runner.run(Ingress::new(options)).await,
        Command::Consumer(options) => runner.run(Consumer::new(options)).await,
    };

    Ok(())
}

async fn init() -> Result<(options::Command, ModuleRunner)> {
    let options = options::MainOptions::from_args();

    let formatter = tracing_subscriber::fmt().with_env_filter(options.log);

    match options.log_format {
        LogFormat::Text => formatter.init(),
        LogFormat::Compact => formatter.compact().init(),
        LogFormat::Json => formatter.json().init(),
    };

    let runner = match options.status_server {
        Some(port) => ModuleRunner::new_with_status_server(port),
        None => ModuleRunner::default(),
    };

    info!("Conveyor {}", env!("CARGO_PKG_VERSION"));

    Ok((options.command, runner))
}
