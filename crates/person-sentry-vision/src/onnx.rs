//! ONNX backends for both capability interfaces: a YOLO-style person
//! localizer and a re-id embedding extractor. Sessions are shared through a
//! process-wide registry so the two models reuse one ONNX Runtime
//! environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::DynamicImage;
use ndarray::{Array4, CowArray, IxDyn};
use once_cell::sync::OnceCell;
use ort::environment::Environment;
use ort::session::{Session, SessionBuilder};
use ort::value::Value;
use tracing::{debug, info};

use person_sentry_types::{BoundingBox, Detection, Embedding};

use crate::error::{VisionError, VisionResult};
use crate::extractor::EmbeddingExtractor;
use crate::localizer::PersonLocalizer;

struct ModelRegistry {
    environment: Arc<Environment>,
    sessions: Mutex<HashMap<PathBuf, Arc<Session>>>,
}

impl ModelRegistry {
    fn new() -> VisionResult<Self> {
        let environment = Environment::builder()
            .with_name("person-sentry-vision")
            .build()
            .map_err(|err| VisionError::localize(err.to_string()))?;
        Ok(Self {
            environment: Arc::new(environment),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    fn get(&self, path: &Path) -> VisionResult<Arc<Session>> {
        if !path.exists() {
            return Err(VisionError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let mut sessions = self.sessions.lock().expect("model registry poisoned");
        if let Some(session) = sessions.get(path) {
            return Ok(session.clone());
        }

        let session = SessionBuilder::new(&self.environment)
            .map_err(|err| VisionError::localize(err.to_string()))?
            .with_model_from_file(path)
            .map_err(|err| VisionError::localize(err.to_string()))?;
        info!(model = %path.display(), "loaded onnx session");
        let session = Arc::new(session);
        sessions.insert(path.to_path_buf(), session.clone());
        Ok(session)
    }
}

static MODEL_REGISTRY: OnceCell<ModelRegistry> = OnceCell::new();

fn registry() -> VisionResult<&'static ModelRegistry> {
    MODEL_REGISTRY.get_or_try_init(ModelRegistry::new)
}

fn run_session(session: &Session, input: Array4<f32>) -> VisionResult<(Vec<f32>, Vec<usize>)> {
    let allocator = session.allocator();
    let input_dyn: CowArray<'_, f32, IxDyn> = CowArray::from(input.into_dyn());
    let value = Value::from_array(allocator, &input_dyn)
        .map_err(|err| VisionError::localize(err.to_string()))?;
    let outputs = session
        .run(vec![value])
        .map_err(|err| VisionError::localize(err.to_string()))?;
    let tensor = outputs
        .into_iter()
        .next()
        .ok_or_else(|| VisionError::localize("model produced no output tensor"))?
        .try_extract::<f32>()
        .map_err(|err| VisionError::localize(err.to_string()))?;
    let view = tensor.view();
    let shape = view.shape().to_vec();
    let data = view.iter().copied().collect::<Vec<f32>>();
    Ok((data, shape))
}

/// NCHW tensor in [0, 1] from a resized RGB image.
fn image_to_tensor(image: &DynamicImage, width: u32, height: u32) -> Array4<f32> {
    let resized = image.resize_exact(width, height, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();
    let mut input = Array4::<f32>::zeros((1, 3, height as usize, width as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for channel in 0..3 {
            input[[0, channel, y as usize, x as usize]] = pixel[channel] as f32 / 255.0;
        }
    }
    input
}

#[derive(Debug, Clone)]
pub struct OnnxLocalizerConfig {
    pub model_path: PathBuf,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub person_class: usize,
}

impl OnnxLocalizerConfig {
    pub fn new(model_path: PathBuf, confidence_threshold: f32) -> Self {
        Self {
            model_path,
            input_size: 640,
            confidence_threshold,
            iou_threshold: 0.45,
            person_class: 0,
        }
    }
}

/// YOLO-style single-class person localizer. Expects the usual v8 output
/// layout `[1, 4 + num_classes, num_predictions]` with cxcywh boxes in
/// model-input coordinates.
pub struct OnnxPersonLocalizer {
    config: OnnxLocalizerConfig,
    session: Arc<Session>,
}

impl OnnxPersonLocalizer {
    pub fn new(config: OnnxLocalizerConfig) -> VisionResult<Self> {
        let session = registry()?.get(&config.model_path)?;
        Ok(Self { config, session })
    }

    fn decode_predictions(
        &self,
        data: &[f32],
        shape: &[usize],
        frame_width: u32,
        frame_height: u32,
    ) -> VisionResult<Vec<(BoundingBox, f32)>> {
        let [batch, rows, count] = match shape {
            [b, r, c] => [*b, *r, *c],
            other => {
                return Err(VisionError::localize(format!(
                    "unexpected detector output shape {other:?}"
                )))
            }
        };
        if batch != 1 || rows < 5 || data.len() < rows * count {
            return Err(VisionError::localize(format!(
                "unexpected detector output shape [{batch}, {rows}, {count}]"
            )));
        }

        let class_row = 4 + self.config.person_class;
        if class_row >= rows {
            return Err(VisionError::localize(format!(
                "person class {} out of range for {} output rows",
                self.config.person_class, rows
            )));
        }

        let scale_x = frame_width as f32 / self.config.input_size as f32;
        let scale_y = frame_height as f32 / self.config.input_size as f32;
        let at = |row: usize, i: usize| data[row * count + i];

        let mut candidates = Vec::new();
        for i in 0..count {
            let score = at(class_row, i);
            if score < self.config.confidence_threshold {
                continue;
            }
            // Person must be the winning class, not merely above threshold.
            let best_other = (4..rows)
                .filter(|row| *row != class_row)
                .map(|row| at(row, i))
                .fold(f32::MIN, f32::max);
            if rows > 5 && best_other > score {
                continue;
            }

            let cx = at(0, i) * scale_x;
            let cy = at(1, i) * scale_y;
            let w = at(2, i) * scale_x;
            let h = at(3, i) * scale_y;
            let x1 = (cx - w / 2.0).max(0.0) as u32;
            let y1 = (cy - h / 2.0).max(0.0) as u32;
            let x2 = ((cx + w / 2.0) as u32).min(frame_width);
            let y2 = ((cy + h / 2.0) as u32).min(frame_height);
            if let Ok(bbox) = BoundingBox::new(x1, y1, x2, y2) {
                candidates.push((bbox, score));
            }
        }

        let kept = non_max_suppression(candidates, self.config.iou_threshold);
        debug!(kept = kept.len(), "person boxes after nms");
        Ok(kept)
    }
}

impl PersonLocalizer for OnnxPersonLocalizer {
    fn localize(&self, image: &DynamicImage) -> VisionResult<Vec<Detection>> {
        let input = image_to_tensor(image, self.config.input_size, self.config.input_size);
        let (data, shape) = run_session(&self.session, input)?;
        let boxes = self.decode_predictions(&data, &shape, image.width(), image.height())?;
        Ok(boxes
            .into_iter()
            .map(|(bbox, score)| Detection::new(bbox, score))
            .collect())
    }
}

fn non_max_suppression(
    mut candidates: Vec<(BoundingBox, f32)>,
    iou_threshold: f32,
) -> Vec<(BoundingBox, f32)> {
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut keep: Vec<(BoundingBox, f32)> = Vec::new();
    for candidate in candidates {
        if keep
            .iter()
            .all(|kept| iou(&kept.0, &candidate.0) < iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x1().max(b.x1());
    let y1 = a.y1().max(b.y1());
    let x2 = a.x2().min(b.x2());
    let y2 = a.y2().min(b.y2());
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let intersection = ((x2 - x1) * (y2 - y1)) as f32;
    let union = (a.width() * a.height() + b.width() * b.height()) as f32 - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct OnnxExtractorConfig {
    pub model_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub dimension: usize,
}

impl OnnxExtractorConfig {
    pub fn new(model_path: PathBuf, dimension: usize) -> Self {
        Self {
            model_path,
            input_width: 128,
            input_height: 256,
            dimension,
        }
    }
}

/// Re-id embedding extractor. The 128x256 input matches the person re-id
/// models the original deployment used; output is L2-normalized.
pub struct OnnxReidExtractor {
    config: OnnxExtractorConfig,
    session: Arc<Session>,
}

impl OnnxReidExtractor {
    pub fn new(config: OnnxExtractorConfig) -> VisionResult<Self> {
        let session = registry()?.get(&config.model_path)?;
        Ok(Self { config, session })
    }
}

impl EmbeddingExtractor for OnnxReidExtractor {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn extract(&self, crop: &DynamicImage) -> VisionResult<Embedding> {
        if crop.width() == 0 || crop.height() == 0 {
            return Err(VisionError::EmptyCrop);
        }
        let input = image_to_tensor(crop, self.config.input_width, self.config.input_height);
        let (data, shape) = run_session(&self.session, input)
            .map_err(|err| VisionError::extract(err.to_string()))?;

        let dimension = match shape.as_slice() {
            [1, d] => *d,
            [d] => *d,
            other => {
                return Err(VisionError::extract(format!(
                    "unexpected embedding output shape {other:?}"
                )))
            }
        };
        if dimension != self.config.dimension || data.len() < dimension {
            return Err(VisionError::UnexpectedDimension {
                expected: self.config.dimension,
                got: dimension,
            });
        }

        let embedding = Embedding::from_vec(data[..dimension].to_vec())
            .map_err(|err| VisionError::extract(err.to_string()))?
            .into_unit_norm();
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_model_file_is_reported() {
        let config = OnnxLocalizerConfig::new(PathBuf::from("/nonexistent/yolo.onnx"), 0.4);
        let err = OnnxPersonLocalizer::new(config).unwrap_err();
        assert!(matches!(err, VisionError::ModelNotFound { .. }));
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0, 0, 10, 10).unwrap();
        let b = BoundingBox::new(20, 20, 30, 30).unwrap();
        assert_eq!(iou(&a, &b), 0.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn nms_drops_heavily_overlapping_boxes() {
        let a = BoundingBox::new(0, 0, 100, 100).unwrap();
        let b = BoundingBox::new(5, 5, 105, 105).unwrap();
        let c = BoundingBox::new(200, 200, 300, 300).unwrap();
        let kept = non_max_suppression(vec![(a, 0.9), (b, 0.8), (c, 0.7)], 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].0, a);
        assert_eq!(kept[1].0, c);
    }
}
