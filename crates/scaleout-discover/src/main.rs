//! Scale-out discovery daemon
//!
//! Brings the scale-out NICs up, configures their point-to-point addresses
//! and PFC, serves traffic counters and restores the original link state
//! on exit.

use anyhow::Context;
use clap::Parser;
use scaleout_discover::{
    AddressConfigurator, Args, Config, DeviceEnumerator, EthtoolStats, GaudinetFile,
    LinkManager, LinkRegistry, LinkStateSync, LldpTool, LldptoolPeerSource, Mode,
    NetworkExporter, PfcController, PfcPriorities, collect_peers, peers::PEER_POLL_INTERVAL,
    spawn_metrics_server,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("discover: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.log_level);
    log_build_details();

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(code) => code,
        Err(e) => {
            error!("discover: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();
}

fn log_build_details() {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = option_env!("GIT_INFO").unwrap_or("N/A"),
        build_date = option_env!("BUILD_DATE").unwrap_or("N/A"),
        os = std::env::consts::OS,
        arch = std::env::consts::ARCH,
        "Build details"
    );
}

#[cfg(target_os = "linux")]
fn link_manager() -> anyhow::Result<Box<dyn LinkManager>> {
    let manager = scaleout_discover::RtnetlinkManager::new()
        .context("Failed to open route netlink connection")?;
    Ok(Box::new(manager))
}

#[cfg(not(target_os = "linux"))]
fn link_manager() -> anyhow::Result<Box<dyn LinkManager>> {
    anyhow::bail!("kernel link management is only supported on Linux")
}

async fn run(config: Config) -> anyhow::Result<ExitCode> {
    info!(
        mode = %config.mode,
        configure = config.configure,
        keep_running = config.keep_running,
        wait = ?config.wait,
        "Starting scale-out discovery"
    );

    let priorities = config.pfc_priorities()?;
    let lldptool = match LldpTool::lookup(&config.lldptool) {
        Ok(tool) => Some(tool),
        Err(e) if priorities.is_some() => {
            return Err(anyhow::Error::new(e)
                .context("PFC settings requested but lldptool is unavailable"));
        }
        Err(e) => {
            if config.mode == Mode::L3 {
                warn!(error = %e, "Cannot read peer data, no addresses derived");
            }
            None
        }
    };
    let pfc = priorities
        .zip(lldptool.clone())
        .map(|(priorities, tool)| (PfcController::new(tool), priorities));

    let names = DeviceEnumerator::new(&config.sysfs_root).discover();
    if names.is_empty() {
        warn!(root = %config.sysfs_root.display(), "No scale-out interfaces found");
    }

    let manager = link_manager()?;
    let mut registry = LinkRegistry::build(manager.as_ref(), names).await;
    let link_sync = LinkStateSync::new(manager.as_ref());

    if let Err(e) = link_sync.interfaces_up(&mut registry).await {
        warn!(error = %e, "Not all links confirmed up");
    }

    let configured = configure(
        &config,
        manager.as_ref(),
        &mut registry,
        lldptool.map(LldptoolPeerSource::new),
        pfc,
    )
    .await;
    if let Err(e) = &configured {
        error!("Configuration failed: {:#}", e);
    }

    registry.log_summary(manager.as_ref(), config.mode).await;

    serve(&config, &registry, shutdown_signal()).await;

    if let Err(e) = link_sync.interfaces_restore_down(&mut registry).await {
        warn!(error = %e, "Link state restore incomplete");
    }

    info!("Scale-out discovery done");
    Ok(if configured.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn configure(
    config: &Config,
    manager: &dyn LinkManager,
    registry: &mut LinkRegistry,
    peers: Option<LldptoolPeerSource>,
    pfc: Option<(PfcController, PfcPriorities)>,
) -> anyhow::Result<()> {
    if config.mode == Mode::L3 {
        if let Some(source) = &peers {
            collect_peers(source, registry, config.wait, PEER_POLL_INTERVAL).await;
        }
    }

    if config.configure {
        if config.mode == Mode::L3 {
            let report = AddressConfigurator::new(manager)
                .configure_interfaces(registry)
                .await?;
            if !report.is_complete() {
                warn!(
                    configured = report.configured,
                    total = report.total,
                    "Not all interfaces configured"
                );
            }
        }

        if let Some((controller, priorities)) = pfc {
            controller
                .apply(priorities, registry.names())
                .await
                .context("Failed to apply PFC settings")?;
        }
    }

    if config.mode == Mode::L3 {
        if let Some(path) = &config.gaudinet {
            if let Err(e) = GaudinetFile::from_registry(registry).write(path) {
                warn!(path = %path.display(), error = %e, "Cannot write NIC network file");
            }
        }
    }

    Ok(())
}

fn start_metrics(
    config: &Config,
    registry: &LinkRegistry,
) -> anyhow::Result<Option<JoinHandle<scaleout_discover::Result<()>>>> {
    let Some(server_config) = config.metrics_server()? else {
        return Ok(None);
    };

    let exporter = NetworkExporter::new(registry, Arc::new(EthtoolStats::new()))
        .context("Failed to create metrics exporter")?;
    let metrics = exporter
        .into_registry()
        .context("Failed to register metrics exporter")?;

    Ok(Some(spawn_metrics_server(server_config, Arc::new(metrics))))
}

/// Runs the metrics server whatever the configuration outcome. With
/// keep-running, blocks until `shutdown` completes or the server exits.
///
/// Returns true if a metrics server was started.
async fn serve(
    config: &Config,
    registry: &LinkRegistry,
    shutdown: impl Future<Output = ()>,
) -> bool {
    let server = start_metrics(config, registry).unwrap_or_else(|e| {
        error!("Metrics disabled: {:#}", e);
        None
    });
    let started = server.is_some();

    if config.keep_running {
        wait_for_shutdown(server, shutdown).await;
    } else if let Some(server) = server {
        server.abort();
    }
    started
}

async fn wait_for_shutdown(
    server: Option<JoinHandle<scaleout_discover::Result<()>>>,
    shutdown: impl Future<Output = ()>,
) {
    info!("Waiting for termination signal");

    let server_exit = async move {
        match server {
            Some(handle) => match handle.await {
                Ok(Ok(())) => warn!("Metrics server stopped"),
                Ok(Err(e)) => error!(error = %e, "Metrics server failed"),
                Err(e) => error!(error = %e, "Metrics server task failed"),
            },
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = shutdown => {}
        _ = server_exit => {}
    }
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
        _ = terminate() => info!("Received SIGTERM"),
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
