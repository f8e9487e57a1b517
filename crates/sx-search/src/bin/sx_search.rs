use anyhow::{bail, Context};
use std::sync::Arc;
use sx_eval::ObjectiveFn;
use sx_search::benchmark::{polynome2, polynome2_space};
use sx_search::{BackendKind, SearchLoop, SearchSettings, StopToken};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const SUMMARY_FILE: &str = "summary.json";

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM; only Ctrl-C stops the search");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let mut settings = SearchSettings::from_env().context("loading search settings")?;
    let space = settings.space.take();
    let (space, objective) = match (&settings.backend, space) {
        (BackendKind::Local, Some(_)) => {
            bail!("the local backend only runs the built-in benchmark; drop `space` or use a subprocess backend")
        }
        (BackendKind::Local, None) => {
            let objective: ObjectiveFn = Arc::new(polynome2);
            (polynome2_space(), Some(objective))
        }
        (BackendKind::Subprocess { .. }, Some(space)) => (space, None),
        (BackendKind::Subprocess { .. }, None) => (polynome2_space(), None),
    };

    let output_dir = settings.output_dir.clone();
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let stop = StopToken::new();
    let mut search =
        SearchLoop::from_settings(settings, space, objective)?.with_stop_token(stop.clone());

    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("shutdown requested, draining search");
        stop.stop();
    });

    let summary = search.run().await?;

    let summary_path = output_dir.join(SUMMARY_FILE);
    let file = std::fs::File::create(&summary_path)
        .with_context(|| format!("creating {}", summary_path.display()))?;
    serde_json::to_writer_pretty(file, &summary)?;

    match &summary.best {
        Some(best) => info!(
            objective = best.objective,
            configuration = %best.configuration,
            "best configuration"
        ),
        None => warn!("no evaluation finished successfully"),
    }
    info!(summary = %summary_path.display(), "done");
    Ok(())
}
