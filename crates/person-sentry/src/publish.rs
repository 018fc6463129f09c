use async_trait::async_trait;
use person_sentry_types::Alert;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize alert: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("alert transport failure: {message}")]
    Transport { message: String },
}

impl PublishError {
    pub fn transport(message: impl Into<String>) -> Self {
        PublishError::Transport {
            message: message.into(),
        }
    }
}

/// Outbound side of the pipeline. Publishing is best effort: a failure is
/// reported to the caller but must not undo identity or cooldown state.
#[async_trait]
pub trait AlertPublisher: Send + Sync {
    async fn publish(&self, alert: &Alert) -> Result<(), PublishError>;
}

/// Publisher that only logs, for running without an alert sink.
pub struct LogPublisher;

#[async_trait]
impl AlertPublisher for LogPublisher {
    async fn publish(&self, alert: &Alert) -> Result<(), PublishError> {
        info!(
            person_id = %alert.person_id,
            timestamp = %alert.timestamp,
            image_bytes = alert.image.len(),
            "alert"
        );
        Ok(())
    }
}
