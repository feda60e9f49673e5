//! rvoip-switchd - the soft-switch daemon

use anyhow::{Context, Result};
use clap::Parser;
use rvoip_infra_common::{log_welcome, parse_log_level, setup_logging, LoggingConfig, TomlConfigRegistry};
use rvoip_switch_core::{modules, CoreConfig, CoreRuntime, CtlResponse, SessionCtl, ShutdownMode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "rvoip-switchd")]
#[command(about = "RVOIP soft-switch daemon", version)]
pub struct Args {
    /// Core configuration file (TOML); SWITCH_* environment variables override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Configuration registry document (TOML) used by the registry dialplan
    #[arg(short, long)]
    pub registry: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = parse_log_level(&args.log_level)?;
    let mut logging = LoggingConfig::new(level, "rvoip-switchd");
    if args.json_logs {
        logging = logging.with_json();
    }
    let log = setup_logging(logging)?;
    log_welcome("rvoip-switchd", env!("CARGO_PKG_VERSION"));

    let config = CoreConfig::load(args.config.as_deref()).context("loading core configuration")?;
    let mut builder = CoreRuntime::builder().config(config).log_handle(log);
    if let Some(path) = &args.registry {
        info!(path = %path.display(), "Using configuration registry");
        builder = builder.registry(Arc::new(TomlConfigRegistry::from_file(path)));
    }
    let runtime = builder.build();

    runtime.start()?;
    modules::load_builtin(&runtime).await?;
    info!(core_uuid = %runtime.core_uuid(), "Ready");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Interrupt received, shutting down gracefully");
    match runtime.ctl(SessionCtl::Shutdown(ShutdownMode::Graceful)).await? {
        CtlResponse::Exit(code) => std::process::exit(code),
        CtlResponse::Abort => std::process::abort(),
        _ => {}
    }

    let grace = Duration::from_secs(runtime.config().shutdown_grace_secs);
    tokio::select! {
        _ = wait_stopped(&runtime) => {}
        _ = tokio::time::sleep(grace) => {
            warn!("Sessions did not drain in time, forcing shutdown");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Second interrupt, forcing shutdown");
        }
    }
    if let Err(e) = runtime.stop().await {
        error!("Shutdown failed: {}", e);
    }
    Ok(())
}

async fn wait_stopped(runtime: &CoreRuntime) {
    while !runtime.is_stopped() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
