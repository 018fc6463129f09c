use std::io::Cursor;

use image::{DynamicImage, ImageOutputFormat};
use tracing::debug;

use person_sentry_types::{BoundingBox, Detection};

use crate::error::{VisionError, VisionResult};

/// Locates people in one decoded frame.
///
/// Implementations return only boxes of the person class with confidence at
/// or above their configured threshold. An empty vector is a valid,
/// non-error result.
pub trait PersonLocalizer: Send + Sync {
    fn localize(&self, image: &DynamicImage) -> VisionResult<Vec<Detection>>;
}

/// Fallback localizer that reports the whole frame as a single detection.
/// Useful for bring-up and for deployments where an upstream motion filter
/// already isolates one person per frame.
#[derive(Debug, Default)]
pub struct FullFrameLocalizer;

impl PersonLocalizer for FullFrameLocalizer {
    fn localize(&self, image: &DynamicImage) -> VisionResult<Vec<Detection>> {
        let bbox = BoundingBox::new(0, 0, image.width(), image.height())
            .map_err(|err| VisionError::localize(err.to_string()))?;
        Ok(vec![Detection::new(bbox, 1.0)])
    }
}

/// Decodes raw frame bytes (JPEG/PNG) into an image.
pub fn decode_frame(bytes: &[u8]) -> VisionResult<DynamicImage> {
    image::load_from_memory(bytes).map_err(|err| VisionError::decode(err.to_string()))
}

/// Crops one detection out of the frame, clamping the box to the frame
/// bounds first. A box that falls entirely outside the frame is an error.
pub fn crop_detection(image: &DynamicImage, bbox: BoundingBox) -> VisionResult<DynamicImage> {
    let clamped = bbox
        .clamp_to(image.width(), image.height())
        .ok_or(VisionError::EmptyCrop)?;
    if clamped != bbox {
        debug!(?bbox, ?clamped, "clamped overhanging box to the frame");
    }
    Ok(image.crop_imm(
        clamped.x1(),
        clamped.y1(),
        clamped.width(),
        clamped.height(),
    ))
}

/// Encodes a crop as JPEG for the alert image payload.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> VisionResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageOutputFormat::Jpeg(quality))
        .map_err(|err| VisionError::encode(err.to_string()))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn solid_image(width: u32, height: u32, rgb: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb(rgb)))
    }

    #[test]
    fn full_frame_localizer_covers_the_frame() {
        let image = solid_image(64, 48, [10, 20, 30]);
        let detections = FullFrameLocalizer.localize(&image).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox().width(), 64);
        assert_eq!(detections[0].bbox().height(), 48);
    }

    #[test]
    fn decode_rejects_garbage_bytes() {
        let err = decode_frame(&[0, 1, 2, 3]).unwrap_err();
        assert!(matches!(err, VisionError::Decode { .. }));
    }

    #[test]
    fn decode_rejects_truncated_jpeg() {
        let image = solid_image(16, 16, [200, 0, 0]);
        let mut jpeg = encode_jpeg(&image, 80).unwrap();
        jpeg.truncate(8);
        assert!(decode_frame(&jpeg).is_err());
    }

    #[test]
    fn crop_clamps_boxes_that_overhang_the_frame() {
        let image = solid_image(100, 100, [1, 2, 3]);
        let bbox = BoundingBox::new(80, 80, 200, 200).unwrap();
        let crop = crop_detection(&image, bbox).unwrap();
        assert_eq!(crop.width(), 20);
        assert_eq!(crop.height(), 20);
    }

    #[test]
    fn crop_outside_the_frame_is_an_error() {
        let image = solid_image(100, 100, [1, 2, 3]);
        let bbox = BoundingBox::new(150, 150, 200, 200).unwrap();
        assert!(matches!(
            crop_detection(&image, bbox),
            Err(VisionError::EmptyCrop)
        ));
    }

    #[test]
    fn jpeg_round_trip_preserves_dimensions() {
        let image = solid_image(32, 24, [120, 130, 140]);
        let jpeg = encode_jpeg(&image, 90).unwrap();
        let decoded = decode_frame(&jpeg).unwrap();
        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 24);
    }
}
