use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use person_sentry::cli::{CliArgs, ExtractorArg, LocalizerArg};
use person_sentry::cooldown::CooldownGate;
use person_sentry::settings::{resolve_settings, ConfigError, Settings};
use person_sentry_index::{IdentityResolver, InMemoryIndex};
use person_sentry_vision::{EmbeddingExtractor, FullFrameLocalizer, PersonLocalizer};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = CliArgs::parse();
    let settings = resolve_settings(&cli)?;
    info!(
        metric = ?settings.metric,
        threshold = settings.threshold,
        cooldown_secs = settings.cooldown.as_secs(),
        embedding_dim = settings.embedding_dim,
        localizer = ?settings.localizer,
        extractor = ?settings.extractor,
        "starting"
    );

    let localizer = build_localizer(&settings)?;
    let extractor = build_extractor(&settings)?;
    if extractor.dimension() != settings.embedding_dim {
        return Err(ConfigError::InvalidValue {
            field: "embedding_dim",
            reason: format!(
                "extractor produces {}-dimensional embeddings, store is configured for {}",
                extractor.dimension(),
                settings.embedding_dim
            ),
        }
        .into());
    }

    let store = Arc::new(InMemoryIndex::new(settings.metric, settings.embedding_dim));
    let resolver = IdentityResolver::new(store, settings.decision_rule())?;
    let gate = CooldownGate::new(settings.cooldown);

    run(settings, localizer, extractor, resolver, gate).await
}

#[cfg(feature = "source-amqp")]
async fn run(
    settings: Settings,
    localizer: Arc<dyn PersonLocalizer>,
    extractor: Arc<dyn EmbeddingExtractor>,
    resolver: IdentityResolver,
    gate: CooldownGate,
) -> Result<(), Box<dyn Error>> {
    use person_sentry::broker::Broker;
    use person_sentry::pipeline::FramePipeline;

    let broker = Broker::connect(&settings).await?;
    let publisher = Arc::new(broker.alert_publisher());
    let mut pipeline = FramePipeline::new(localizer, extractor, resolver, gate, publisher);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    broker
        .consume_frames(&mut pipeline, settings.requeue_on_store_outage, shutdown_rx)
        .await?;
    info!("stopped");
    Ok(())
}

#[cfg(not(feature = "source-amqp"))]
async fn run(
    _settings: Settings,
    _localizer: Arc<dyn PersonLocalizer>,
    _extractor: Arc<dyn EmbeddingExtractor>,
    _resolver: IdentityResolver,
    _gate: CooldownGate,
) -> Result<(), Box<dyn Error>> {
    Err(Box::new(ConfigError::InvalidValue {
        field: "source",
        reason: "no frame source compiled in; rebuild with the \"source-amqp\" feature"
            .to_string(),
    }))
}

fn build_localizer(settings: &Settings) -> Result<Arc<dyn PersonLocalizer>, Box<dyn Error>> {
    match settings.localizer {
        LocalizerArg::FullFrame => Ok(Arc::new(FullFrameLocalizer)),
        #[cfg(feature = "backend-onnx")]
        LocalizerArg::Onnx => {
            use person_sentry_vision::onnx::{OnnxLocalizerConfig, OnnxPersonLocalizer};

            let model = settings.detector_model.clone().ok_or_else(|| {
                ConfigError::InvalidValue {
                    field: "detector_model",
                    reason: "required when localizer = \"onnx\"".to_string(),
                }
            })?;
            let config = OnnxLocalizerConfig::new(model, settings.confidence);
            Ok(Arc::new(OnnxPersonLocalizer::new(config)?))
        }
        #[cfg(not(feature = "backend-onnx"))]
        LocalizerArg::Onnx => Err(Box::new(ConfigError::InvalidValue {
            field: "localizer",
            reason: "the onnx localizer is not compiled in; rebuild with the \"backend-onnx\" feature"
                .to_string(),
        })),
    }
}

fn build_extractor(settings: &Settings) -> Result<Arc<dyn EmbeddingExtractor>, Box<dyn Error>> {
    match settings.extractor {
        ExtractorArg::Histogram => Ok(Arc::new(
            person_sentry_vision::HistogramExtractor::default(),
        )),
        #[cfg(feature = "backend-onnx")]
        ExtractorArg::Onnx => {
            use person_sentry_vision::onnx::{OnnxExtractorConfig, OnnxReidExtractor};

            let model = settings.reid_model.clone().ok_or_else(|| {
                ConfigError::InvalidValue {
                    field: "reid_model",
                    reason: "required when extractor = \"onnx\"".to_string(),
                }
            })?;
            let config = OnnxExtractorConfig::new(model, settings.embedding_dim);
            Ok(Arc::new(OnnxReidExtractor::new(config)?))
        }
        #[cfg(not(feature = "backend-onnx"))]
        ExtractorArg::Onnx => Err(Box::new(ConfigError::InvalidValue {
            field: "extractor",
            reason: "the onnx extractor is not compiled in; rebuild with the \"backend-onnx\" feature"
                .to_string(),
        })),
    }
}
