use anyhow::Context;

use subprov_daemon::Services;
use subprov_infra::SubprovConfig;
use subprov_observability::TracingConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    subprov_observability::init_with(&TracingConfig::from_env());

    let config = SubprovConfig::from_env().context("loading SUBPROV_* configuration")?;
    tracing::info!(
        call_timeout_ms = config.coordinator.call_timeout_ms,
        create_policy = ?config.coordinator.create_policy,
        sweep_interval_secs = config.governance.sweep_interval_secs,
        "configuration loaded"
    );

    let services = Services::in_memory(config).context("wiring services")?;
    let sweeper = services.start_sweeper();
    tracing::info!("subprov daemon running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    tracing::info!("shutdown requested");
    let stats = sweeper.stats();
    sweeper.shutdown().await;
    tracing::info!(
        sweeps = stats.sweeps,
        timed_out = stats.timed_out,
        "subprov daemon stopped"
    );
    Ok(())
}
