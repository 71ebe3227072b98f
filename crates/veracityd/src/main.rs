use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use veracity_core::FaceFeatureExtractor;
use veracity_media::{FfmpegOpener, LandmarkHelper};
use veracity_models::ModelIntegrityError;

mod config;
mod dbus_interface;
mod engine;
mod report;
mod validation;

use config::Config;
use dbus_interface::{AppState, VeracityService};

const BUS_NAME: &str = "org.freedesktop.Veracity1";
const OBJECT_PATH: &str = "/org/freedesktop/Veracity1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("veracityd starting");

    let config = Config::from_env();
    tracing::info!(
        helper = %config.helper_program.display(),
        model_dir = %config.model_dir.display(),
        workers = config.workers,
        timeout_secs = config.analysis_timeout_secs,
        session_bus = config.session_bus,
        "configuration loaded"
    );

    match veracity_models::verify_models_dir(&config.model_dir) {
        Ok(entries) => tracing::info!(models = entries.len(), "model checksums verified"),
        Err(ModelIntegrityError::MissingManifest(path)) => {
            tracing::warn!(manifest = %path.display(), "no model manifest, skipping integrity check");
        }
        Err(e) => return Err(e).context("model integrity check failed"),
    }

    let opener = Arc::new(FfmpegOpener::new(
        config.ffmpeg_path.clone(),
        config.ffprobe_path.clone(),
    ));
    let helper = config.helper_command();
    let engine = engine::spawn_engine(opener, config.workers, move || {
        LandmarkHelper::start(helper.clone())
            .map(|h| Box::new(h) as Box<dyn FaceFeatureExtractor>)
    })
    .context("failed to start analysis engine")?;

    let service = VeracityService {
        state: Arc::new(AppState::new(config.clone(), engine)),
    };

    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "veracityd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("veracityd shutting down");

    Ok(())
}
