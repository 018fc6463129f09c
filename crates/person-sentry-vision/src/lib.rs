//! Capability interfaces for the two opaque models the pipeline depends on:
//! person localization and embedding extraction. Both are injected trait
//! objects so the pipeline can run against deterministic fakes in tests and
//! against ONNX sessions in production builds.

mod error;
mod extractor;
mod localizer;

#[cfg(feature = "backend-onnx")]
pub mod onnx;

pub use error::{VisionError, VisionResult};
pub use extractor::{EmbeddingExtractor, HistogramExtractor};
pub use localizer::{
    crop_detection, decode_frame, encode_jpeg, FullFrameLocalizer, PersonLocalizer,
};
