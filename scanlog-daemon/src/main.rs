use anyhow::Result;
use clap::Parser;

use scanlog_daemon::cli::DaemonCli;
use scanlog_daemon::logging;
use scanlog_daemon::orchestrator::Orchestrator;
use scanlog_daemon::shutdown::ShutdownRequest;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let config = cli.resolve_config().await?;

    if cli.validate {
        println!("configuration is valid");
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "scanlog-daemon starting");

    let orchestrator = Orchestrator::build(config).await?;
    let report = orchestrator.run().await?;

    tracing::info!(
        reason = %report.reason,
        connections = report.connections.total(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "scanlog-daemon shut down"
    );

    if report.reason == ShutdownRequest::ListenerExited {
        anyhow::bail!("listener stopped unexpectedly");
    }
    Ok(())
}
