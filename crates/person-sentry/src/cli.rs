use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MetricArg {
    L2,
    Cosine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LocalizerArg {
    /// Treat the whole frame as one person (no detector model needed).
    FullFrame,
    /// ONNX person detector (requires `--detector-model`).
    Onnx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExtractorArg {
    /// Color-histogram embedding, deterministic and model-free.
    Histogram,
    /// ONNX re-identification model (requires `--reid-model`).
    Onnx,
}

/// Command line surface. Every option is optional here; unset options fall
/// through to the config file and then to built-in defaults.
#[derive(Debug, Parser)]
#[command(name = "person-sentry", about = "Resolves people in camera frames to stable identities and raises alerts")]
pub struct CliArgs {
    /// Path to a TOML config file.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// AMQP broker URL.
    #[arg(long, value_name = "URL")]
    pub broker_url: Option<String>,

    /// Fanout exchange frames are consumed from.
    #[arg(long, value_name = "NAME")]
    pub frame_exchange: Option<String>,

    /// Fanout exchange alerts are published to.
    #[arg(long, value_name = "NAME")]
    pub alert_exchange: Option<String>,

    /// Consumer tag presented to the broker.
    #[arg(long, value_name = "NAME")]
    pub consumer_tag: Option<String>,

    /// Similarity metric of the identity store.
    #[arg(long, value_enum)]
    pub metric: Option<MetricArg>,

    /// Known/new decision threshold (distance for l2, similarity for cosine).
    #[arg(long, allow_negative_numbers = true)]
    pub threshold: Option<f32>,

    /// Minimum seconds between alerts for the same identity.
    #[arg(long, value_name = "SECONDS")]
    pub cooldown_secs: Option<u64>,

    /// Minimum detector confidence for a person box.
    #[arg(long)]
    pub confidence: Option<f32>,

    /// Embedding dimension the store is keyed on.
    #[arg(long, value_name = "DIM")]
    pub embedding_dim: Option<usize>,

    /// Person localizer backend.
    #[arg(long, value_enum)]
    pub localizer: Option<LocalizerArg>,

    /// Embedding extractor backend.
    #[arg(long, value_enum)]
    pub extractor: Option<ExtractorArg>,

    /// ONNX person detection model path.
    #[arg(long, value_name = "PATH")]
    pub detector_model: Option<PathBuf>,

    /// ONNX re-identification model path.
    #[arg(long, value_name = "PATH")]
    pub reid_model: Option<PathBuf>,

    /// Requeue a frame when the identity store faulted on every detection.
    #[arg(long, value_name = "BOOL")]
    pub requeue_on_store_outage: Option<bool>,
}
