use anyhow::{Context, Result};
use clap::Parser;
use gatewatch_core::{
    FerPlusClassifier, Gallery, GeometricPoseEstimator, OnnxFaceAnalyzer, StudentDirectory, EMOTION_MODEL_FILE,
};
use gatewatch_hw::opener::WARMUP_DELAY;
use gatewatch_hw::{SourceOpener, Warmup};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod overlay;
mod publish;
mod worker;

use config::{Cli, Config};
use engine::{Capabilities, EngineContext, RecognitionEngine};
use publish::{PublishPaths, Publisher};
use worker::{Worker, WorkerSettings};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli)?;

    // RUST_LOG wins over --verbose.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if config.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    for warning in &config.warnings {
        tracing::warn!("{warning}");
    }
    tracing::info!(
        strategy = %config.selection.strategy,
        url = config.selection.url.as_deref().unwrap_or("-"),
        data_dir = %config.data_dir.display(),
        "gatewatchd starting"
    );

    let gallery = Gallery::load(&config.gallery_path)
        .with_context(|| format!("loading gallery {}", config.gallery_path.display()))?;
    tracing::info!(entries = gallery.len(), labels = gallery.labels().len(), "gallery loaded");

    let analyzer = OnnxFaceAnalyzer::load(&config.model_dir)
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))?;

    let emotion_path = config.model_dir.join(EMOTION_MODEL_FILE);
    let emotion = match FerPlusClassifier::load(&emotion_path) {
        Ok(classifier) => Some(Box::new(classifier) as Box<dyn gatewatch_core::EmotionClassifier>),
        Err(error) => {
            tracing::warn!(%error, "expression model unavailable; emotion reported as N/A");
            None
        }
    };

    let directory = StudentDirectory::load_or_empty(&config.students_path);

    let publisher = Publisher::create(PublishPaths::under(&config.data_dir))
        .with_context(|| format!("preparing data dir {}", config.data_dir.display()))?;

    let engine = RecognitionEngine::new(
        EngineContext {
            gallery,
            metric: config.metric.build(),
            directory,
            font: overlay::find_font(config.font_path.as_deref()),
        },
        Capabilities {
            analyzer: Box::new(analyzer),
            pose: Box::new(GeometricPoseEstimator),
            emotion,
        },
        config.engine.clone(),
    );

    let opener = SourceOpener::platform_default().with_warmup(Warmup {
        tries: config.warmup_tries,
        delay: WARMUP_DELAY,
    });

    tracing::info!("gatewatchd ready");
    Worker::new(
        opener,
        config.selection.clone(),
        engine,
        publisher,
        WorkerSettings {
            cam_id: config.cam_id.clone(),
            max_misses: config.max_misses,
            retry: config.retry,
            ..WorkerSettings::default()
        },
    )
    .run()
}
