//! `drivelink` – steering and throttle server for the driving simulator
//!
//! 1. Initialises logging (and OTLP export when configured).
//! 2. Loads `drivelink.toml` and `DRIVELINK_*` overrides; an optional first
//!    argument replaces the model path.
//! 3. Loads the steering model once. A bad artifact or config exits with
//!    status 1 before anything is bound.
//! 4. Serves simulator sessions until Ctrl-C.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use drivelink_middleware::EventChannel;
use drivelink_runtime::{ControlPipeline, PredictorHandle, SessionController};
use drivelink_types::DriveError;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    // Tracing first: the OTLP exporter must exist before the runtime.
    let _guard = drivelink_runtime::init_tracing("drivelink");

    let mut cfg = match config::load() {
        Ok(cfg) => cfg,
        Err(e) => return fatal(&e),
    };
    if let Some(model) = std::env::args_os().nth(1) {
        cfg.model_path = PathBuf::from(model);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => return fatal(&DriveError::Config(format!("tokio runtime: {e}"))),
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fatal(&e),
    }
}

async fn run(cfg: config::Config) -> Result<(), DriveError> {
    let predictor = PredictorHandle::load(&cfg.model_path, cfg.predictor_access)?;
    let pipeline = ControlPipeline::new(Arc::new(predictor), cfg.throttle_policy()?);
    let controller = Arc::new(SessionController::new(pipeline));

    let channel = EventChannel::bind(cfg.socket_addr()?, cfg.channel_config()).await?;
    let addr = channel.local_addr()?;
    info!(
        addr = %addr,
        speed_limit = cfg.speed_limit,
        model = %cfg.model_path.display(),
        access = %cfg.predictor_access,
        "drivelink ready"
    );
    println!(
        "  {} listening on {} (speed limit {})",
        "drivelink".bold().cyan(),
        addr.to_string().bold(),
        cfg.speed_limit
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler; run until killed");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = channel.serve(controller.router()) => result,
        () = shutdown => {
            info!("Ctrl-C received; shutting down");
            Ok(())
        }
    }
}

fn fatal(e: &DriveError) -> ExitCode {
    error!(error = %e, fatal = e.is_fatal(), "drivelink cannot start");
    eprintln!("{}: {e}", "error".red().bold());
    ExitCode::FAILURE
}
