use clap::Parser;
use std::sync::Arc;

mod cli;
mod config;
mod errors;
mod logging;
mod middlewares;
mod models;
mod routes;
mod server;
mod services;
mod state;
mod store;
mod transport;
mod utils;

use cli::{Cli, Command};

async fn serve(config: &config::Config, logs: Arc<logging::LogWriter>) -> anyhow::Result<()> {
    let _pidfile = utils::Pidfile::create(config.pidfile.as_deref())?;
    server::run_until_done(server::ServerArgs { logs, config }).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load(&cli.config)?;
    let (logs, log_task) = logging::LogWriter::new();
    logging::registry_logs(&logs, &config.logs)?;
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider was already installed");
    }
    let logs = Arc::new(logs);
    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!(
                "fleetbeat {} starting with {:?}",
                env!("CARGO_PKG_VERSION"),
                cli.config
            );
            serve(&config, logs.clone()).await
        }
        Command::Gateway(command) => cli::administer(command, &config).await,
    };
    if let Err(err) = &result {
        tracing::error!("{:?}", err);
    }
    logs.shutdown();
    match log_task.await {
        Ok(Err(err)) => eprintln!("Log writer failed: {err:?}"),
        Err(err) => eprintln!("Log writer panicked: {err}"),
        Ok(Ok(())) => (),
    }
    result
}
