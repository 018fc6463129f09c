use std::path::PathBuf;

use thiserror::Error;

pub type VisionResult<T> = Result<T, VisionError>;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("failed to decode frame bytes: {reason}")]
    Decode { reason: String },

    #[error("detection crop is empty after clamping to the frame")]
    EmptyCrop,

    #[error("person localization failed: {message}")]
    Localize { message: String },

    #[error("embedding extraction failed: {message}")]
    Extract { message: String },

    #[error("extractor produced a {got}-dimensional vector, expected {expected}")]
    UnexpectedDimension { expected: usize, got: usize },

    #[error("model file {} does not exist", path.display())]
    ModelNotFound { path: PathBuf },

    #[error("failed to encode alert image: {reason}")]
    Encode { reason: String },
}

impl VisionError {
    pub fn decode(reason: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
        }
    }

    pub fn localize(message: impl Into<String>) -> Self {
        Self::Localize {
            message: message.into(),
        }
    }

    pub fn extract(message: impl Into<String>) -> Self {
        Self::Extract {
            message: message.into(),
        }
    }

    pub fn encode(reason: impl Into<String>) -> Self {
        Self::Encode {
            reason: reason.into(),
        }
    }
}
