mod claim_loop;
mod error;
mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use coordinator_client::{CoordinatorClient, TlsIdentity};
use error::CliError;
use osc_supervisor::{AcceptFlag, InFlightRegistry};
use runner_config::RunnerConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};

use claim_loop::{run_claim_loop, ClaimLoopContext};
use shutdown::ShutdownCoordinator;

/// Distributed worker that claims and drives online schema-change jobs on
/// behalf of a coordinator.
#[derive(Parser)]
#[command(name = "runner", version, about)]
struct Cli {
    /// Directory holding `<env>-config.yaml`; `ENVIRONMENT` selects which.
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Perform a single claim-and-drain pass instead of looping forever.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    if let Err(err) = run().await {
        error!(%err, "runner exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();

    let config_path = runner_config::resolve_config_path(&cli.config_dir);
    let mut config = RunnerConfig::load(&config_path)?;

    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    config.resolve_hostname(&hostname);

    runner_config::write_mysql_defaults_file_if_missing(
        &config.mysql_defaults_file,
        &config.mysql_user,
        &config.mysql_password,
        config.mysql_root_ca.as_deref(),
        config.mysql_cert.as_deref(),
        config.mysql_key.as_deref(),
    )?;

    let tls_identity = TlsIdentity {
        cert_path: config.rest_cert.clone(),
        key_path: config.rest_key.clone(),
    };
    let coordinator = Arc::new(CoordinatorClient::new(config.rest_api.as_str(), &tls_identity)?);

    let registry = InFlightRegistry::new();
    let accept = AcceptFlag::new(true);

    let cancel = CancellationToken::new();
    let shutdown = ShutdownCoordinator::new(cancel.clone());
    shutdown.register_handlers();

    tokio::spawn(osc_supervisor::run_handoff_watcher(
        config.stop_file_path.clone(),
        accept.clone(),
        registry.clone(),
        coordinator.clone(),
    ));

    let ctx = ClaimLoopContext::new(coordinator, Arc::new(config), registry, accept, hostname);

    info!("runner started, entering claim loop");
    tokio::select! {
        _ = run_claim_loop(ctx.clone(), cancel.clone(), cli.once) => {}
        _ = cancel.cancelled() => {}
    }

    if shutdown.is_shutdown_requested() {
        info!("waiting for in-flight claims to register before exit");
        ctx.wait_for_in_flight_claims().await;
    }

    Ok(())
}
