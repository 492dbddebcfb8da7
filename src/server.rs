use crate::config::Config;
use crate::routes;
use crate::logging::LogWriter;
use crate::services::{
    EngineSettings, FirmwareSync, FirmwareSyncScheduler, HeartbeatEngine, HttpProvisioningClient,
    ProvisioningAuthority, ServerEndpoint,
};
use crate::state::AppState;
use crate::store::{GatewayStore, SqliteGatewayStore};
use crate::transport::BoundListener;
use std::sync::Arc;
use tokio::{signal, task::JoinSet};
use tokio_util::sync::CancellationToken;

pub struct ServerArgs<'a> {
    pub logs: Arc<LogWriter>,
    pub config: &'a Config,
}

/// Everything that can fail at startup happens before the first task is
/// spawned: database, credentials, binds and the update schedule.
pub async fn run_until_done(args: ServerArgs<'_>) -> anyhow::Result<()> {
    let config = args.config;
    let store: Arc<dyn GatewayStore> =
        Arc::new(SqliteGatewayStore::connect(&config.database.path).await?);
    let authority: Arc<dyn ProvisioningAuthority> =
        Arc::new(HttpProvisioningClient::new(&config.provisioning)?);
    let engine = Arc::new(HeartbeatEngine::new(
        store.clone(),
        authority.clone(),
        EngineSettings {
            offline_limit: config.heartbeat.offline_limit,
            notify_retry: config.provisioning.notify_retry(),
            managed_model_prefixes: config.heartbeat.managed_model_prefixes.clone(),
        },
    ));
    let current = BoundListener::bind("current", &config.listeners.current).await?;
    let legacy = BoundListener::bind("legacy", &config.listeners.legacy).await?;
    let scheduler = FirmwareSyncScheduler::new(
        &config.provisioning.update_schedule,
        FirmwareSync::new(
            store,
            authority,
            ServerEndpoint {
                server_addr: config.provisioning.server_addr(),
                legacy_port: config.listeners.legacy.bind.port(),
                current_port: config.listeners.current.bind.port(),
            },
            config.provisioning.call_timeout(),
        ),
    )?;

    let mut join_set = JoinSet::new();
    let shutdown_signal = CancellationToken::new();
    // axum serve, one task per listener
    for (listener, name) in [(current, "current"), (legacy, "legacy")] {
        let router = routes::build(AppState::new(engine.clone(), name));
        join_set.spawn(listener.serve(router, shutdown_signal.clone()));
    }
    join_set.spawn(scheduler.run(shutdown_signal.clone()));

    // signal handlers live in their own set, dropped once the servers are done
    let mut signals: JoinSet<anyhow::Result<()>> = JoinSet::new();
    // register ctrl+c signal
    {
        let shutdown_signal = shutdown_signal.clone();
        signals.spawn(async move {
            signal::ctrl_c().await?;
            tracing::info!("Received Ctrl+C, shutting down");
            shutdown_signal.cancel();
            Ok(())
        });
    }
    // SIGTERM stops the server, SIGUSR1 reopens the log file after rotation
    #[cfg(unix)]
    {
        let shutdown_signal = shutdown_signal.clone();
        let logs = args.logs.clone();
        signals.spawn(async move {
            let mut usr1 = signal::unix::signal(signal::unix::SignalKind::user_defined1())?;
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            loop {
                tokio::select! {
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM signal, start terminating");
                        shutdown_signal.cancel();
                        return Ok(());
                    }
                    _ = usr1.recv() => {
                        tracing::debug!("Received USR1 signal, start reopening log files");
                        match logs.reopen() {
                            Ok(_) => tracing::info!("Log files reopen successful."),
                            Err(err) => eprintln!("Failed to reopen log files: {err:?}")
                        }
                    }
                }
            }
        });
    }

    let mut result = Ok(());
    while let Some(r) = join_set.join_next().await {
        let err = match r {
            Ok(Ok(_)) => continue,
            Ok(Err(e)) => e,
            Err(e) => anyhow::anyhow!("Internal error in spawn: {e}"),
        };
        tracing::error!("{:?}", err);
        // one failed listener takes the whole server down
        if result.is_ok() {
            result = Err(err);
        }
        shutdown_signal.cancel();
    }
    drop(signals);
    tracing::info!("Server stopped");
    result
}
