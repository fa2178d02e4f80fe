use std::process::ExitCode;

use anyhow::{Context, Result};
use sg_xfer::{
    cfg::{cli::CliArgs, config::Config, logger::init_logger},
    session::{exit::ExitStatus, open_from_config},
};
use tokio::{main, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[main]
async fn main() -> ExitCode {
    match run().await {
        Ok(status) => ExitCode::from(status.code()),
        Err(e) => {
            eprintln!("sg_xfer: {e:#}");
            ExitCode::from(ExitStatus::Syntax.code())
        },
    }
}

async fn run() -> Result<ExitStatus> {
    let cli = CliArgs::parse(std::env::args().skip(1))?;
    let _guard = cli.logger.as_ref().map(init_logger).transpose()?;

    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    let mut session = match open_from_config(&config) {
        Ok(s) => s,
        Err(e) => {
            error!("{e}");
            eprintln!("sg_xfer: {e}");
            return Ok(ExitStatus::from(&e));
        },
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            ctrl_c.cancel();
        }
    });
    spawn_progress_signal(session.progress_handle())?;

    match session.run(&cancel).await {
        Ok(report) => {
            eprint!("{report}");
            Ok(report.exit_status())
        },
        Err(e) => {
            error!("{e}");
            eprintln!("sg_xfer: {e}");
            Ok(ExitStatus::from(&e))
        },
    }
}

/// SIGUSR1 asks the running session for interim statistics.
fn spawn_progress_signal(progress: std::sync::Arc<tokio::sync::Notify>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = signal(SignalKind::user_defined1()).context("cannot watch SIGUSR1")?;
    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            progress.notify_one();
        }
    });
    Ok(())
}
