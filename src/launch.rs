//! One-command startup: build the index, start the API, then the UI.
//!
//! The order is fixed. The build must finish before the API loads the
//! index, and the UI starts only after `[ui].startup_delay_secs` so the API
//! has time to bind. The process runs until either server exits; a failure
//! in one step stops the whole sequence.

use anyhow::{Context, Result};
use std::time::Duration;

use crate::build_cmd::run_build;
use crate::config::Config;
use crate::server::run_server;
use crate::ui::run_ui;

pub async fn run_all(config: &Config, skip_build: bool) -> Result<()> {
    if skip_build {
        tracing::info!(index = %config.index.path.display(), "skipping index build");
    } else {
        tracing::info!("step 1/3: building index");
        run_build(config).await?;
    }

    tracing::info!("step 2/3: starting API server");
    let api_config = config.clone();
    let mut api = tokio::spawn(async move { run_server(&api_config).await });

    let delay = Duration::from_secs(config.ui.startup_delay_secs);
    tokio::select! {
        joined = &mut api => {
            return finished("API server", joined).context("API server failed to start");
        }
        _ = tokio::time::sleep(delay) => {}
    }

    tracing::info!("step 3/3: starting UI server");
    let ui_config = config.clone();
    let mut ui = tokio::spawn(async move { run_ui(&ui_config).await });

    tokio::select! {
        joined = &mut api => {
            ui.abort();
            finished("API server", joined)
        }
        joined = &mut ui => {
            api.abort();
            finished("UI server", joined)
        }
    }
}

fn finished(name: &str, joined: Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    match joined {
        Ok(Ok(())) => {
            tracing::warn!("{} exited", name);
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(e) => Err(anyhow::anyhow!("{} task panicked or was cancelled: {}", name, e)),
    }
}
