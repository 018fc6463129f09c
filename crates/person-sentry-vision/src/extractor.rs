use image::DynamicImage;

use person_sentry_types::Embedding;

use crate::error::{VisionError, VisionResult};

/// Computes the appearance fingerprint of one person crop.
///
/// Implementations must be deterministic: identical crop bytes always yield
/// the identical vector. Vectors are unit-normalized by convention.
pub trait EmbeddingExtractor: Send + Sync {
    /// Fixed output dimension, validated before any store interaction.
    fn dimension(&self) -> usize;

    fn extract(&self, crop: &DynamicImage) -> VisionResult<Embedding>;
}

/// Pure-Rust appearance embedder: a unit-normalized RGB color histogram.
///
/// With the default 8 bins per channel the output is 512-dimensional,
/// matching the re-id models this fingerprint stands in for. Clothing
/// dominates a person crop, so the color distribution is a serviceable
/// appearance signature when no ONNX model is available.
#[derive(Debug, Clone)]
pub struct HistogramExtractor {
    bins_per_channel: u32,
}

impl HistogramExtractor {
    pub const DEFAULT_BINS_PER_CHANNEL: u32 = 8;

    pub fn new(bins_per_channel: u32) -> VisionResult<Self> {
        if !(2..=16).contains(&bins_per_channel) {
            return Err(VisionError::extract(format!(
                "bins_per_channel must be in 2..=16, got {bins_per_channel}"
            )));
        }
        Ok(Self { bins_per_channel })
    }
}

impl Default for HistogramExtractor {
    fn default() -> Self {
        Self {
            bins_per_channel: Self::DEFAULT_BINS_PER_CHANNEL,
        }
    }
}

impl EmbeddingExtractor for HistogramExtractor {
    fn dimension(&self) -> usize {
        (self.bins_per_channel * self.bins_per_channel * self.bins_per_channel) as usize
    }

    fn extract(&self, crop: &DynamicImage) -> VisionResult<Embedding> {
        if crop.width() == 0 || crop.height() == 0 {
            return Err(VisionError::EmptyCrop);
        }

        let bins = self.bins_per_channel;
        let mut counts = vec![0.0f32; self.dimension()];
        let rgb = crop.to_rgb8();
        for pixel in rgb.pixels() {
            let r = bin_of(pixel[0], bins);
            let g = bin_of(pixel[1], bins);
            let b = bin_of(pixel[2], bins);
            let index = (r * bins + g) * bins + b;
            counts[index as usize] += 1.0;
        }

        let embedding = Embedding::from_vec(counts)
            .map_err(|err| VisionError::extract(err.to_string()))?
            .into_unit_norm();
        Ok(embedding)
    }
}

fn bin_of(value: u8, bins: u32) -> u32 {
    (value as u32 * bins / 256).min(bins - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid_image(rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(20, 40, Rgb(rgb)))
    }

    #[test]
    fn default_extractor_is_512_dimensional() {
        let extractor = HistogramExtractor::default();
        assert_eq!(extractor.dimension(), 512);
        let embedding = extractor.extract(&solid_image([200, 40, 90])).unwrap();
        assert_eq!(embedding.dimension(), 512);
    }

    #[test]
    fn extraction_is_deterministic() {
        let extractor = HistogramExtractor::default();
        let image = solid_image([17, 180, 66]);
        let first = extractor.extract(&image).unwrap();
        let second = extractor.extract(&image).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn output_is_unit_normalized() {
        let extractor = HistogramExtractor::default();
        let mut image = RgbImage::from_pixel(8, 8, Rgb([10, 10, 10]));
        for x in 0..8 {
            image.put_pixel(x, 0, Rgb([250, 250, 250]));
        }
        let embedding = extractor
            .extract(&DynamicImage::ImageRgb8(image))
            .unwrap();
        assert!((embedding.l2_norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn different_appearances_produce_different_vectors() {
        let extractor = HistogramExtractor::default();
        let red = extractor.extract(&solid_image([220, 10, 10])).unwrap();
        let blue = extractor.extract(&solid_image([10, 10, 220])).unwrap();
        assert_ne!(red, blue);
    }

    #[test]
    fn bins_out_of_range_are_rejected() {
        assert!(HistogramExtractor::new(1).is_err());
        assert!(HistogramExtractor::new(32).is_err());
        assert!(HistogramExtractor::new(4).is_ok());
    }
}
