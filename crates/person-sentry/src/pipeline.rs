use std::sync::Arc;

use tracing::{debug, error, warn};

use person_sentry_index::{IdentityResolver, IndexError};
use person_sentry_types::{Alert, Frame};
use person_sentry_vision::{
    crop_detection, decode_frame, encode_jpeg, EmbeddingExtractor, PersonLocalizer,
};

use crate::cooldown::CooldownGate;
use crate::publish::AlertPublisher;

const ALERT_JPEG_QUALITY: u8 = 85;

/// What the pipeline did with one frame. Drives logging and the broker
/// acknowledgement decision; the pipeline itself never talks to the broker.
#[derive(Debug, Default)]
pub struct FrameReport {
    /// Person boxes returned by the localizer.
    pub detections: usize,
    /// Detections that produced a resolution, including fail-safe ones.
    pub resolved: usize,
    /// Resolutions absorbed by the fail-safe policy after a store fault.
    pub store_faults: usize,
    /// Resolutions that minted a fresh identity.
    pub new_identities: usize,
    /// Alerts handed to the publisher.
    pub alerts_published: usize,
    /// Alerts the publisher failed to deliver.
    pub publish_failures: usize,
    /// Detections skipped over crop or extraction failures.
    pub skipped_detections: usize,
    /// The frame payload could not be decoded at all.
    pub decode_failed: bool,
}

/// Broker-facing verdict for a processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acknowledge,
    Requeue,
}

impl FrameReport {
    /// A frame is only worth redelivering when the store swallowed every
    /// resolution in it; any mix of successes means the work that could be
    /// done was done, and redelivery would duplicate it.
    pub fn disposition(&self, requeue_on_store_outage: bool) -> Disposition {
        if requeue_on_store_outage && self.resolved > 0 && self.store_faults == self.resolved {
            Disposition::Requeue
        } else {
            Disposition::Acknowledge
        }
    }
}

/// One frame in, alerts out. Owns the cooldown state, borrows everything
/// else through trait objects so tests can substitute any stage.
pub struct FramePipeline {
    localizer: Arc<dyn PersonLocalizer>,
    extractor: Arc<dyn EmbeddingExtractor>,
    resolver: IdentityResolver,
    gate: CooldownGate,
    publisher: Arc<dyn AlertPublisher>,
}

impl FramePipeline {
    pub fn new(
        localizer: Arc<dyn PersonLocalizer>,
        extractor: Arc<dyn EmbeddingExtractor>,
        resolver: IdentityResolver,
        gate: CooldownGate,
        publisher: Arc<dyn AlertPublisher>,
    ) -> Self {
        Self {
            localizer,
            extractor,
            resolver,
            gate,
            publisher,
        }
    }

    /// Runs one frame through localize, embed, resolve, gate and publish.
    ///
    /// A frame never fails as a whole once it decodes: a bad detection is
    /// skipped and the rest of the frame still runs. Identity and cooldown
    /// state are committed before publishing, so a publish failure cannot
    /// roll them back.
    pub async fn process_frame(&mut self, frame: &Frame) -> FrameReport {
        let mut report = FrameReport::default();

        let image = match decode_frame(frame.data()) {
            Ok(image) => image,
            Err(err) => {
                warn!(bytes = frame.data().len(), %err, "dropping undecodable frame");
                report.decode_failed = true;
                return report;
            }
        };

        let detections = match self.localizer.localize(&image) {
            Ok(detections) => detections,
            Err(err) => {
                warn!(%err, "localizer failed, dropping frame");
                return report;
            }
        };
        report.detections = detections.len();

        for detection in detections {
            let crop = match crop_detection(&image, detection.bbox()) {
                Ok(crop) => crop,
                Err(err) => {
                    warn!(bbox = ?detection.bbox(), %err, "skipping detection: crop failed");
                    report.skipped_detections += 1;
                    continue;
                }
            };

            let embedding = match self.extractor.extract(&crop) {
                Ok(embedding) => embedding,
                Err(err) => {
                    warn!(%err, "skipping detection: embedding extraction failed");
                    report.skipped_detections += 1;
                    continue;
                }
            };

            let resolution = match self.resolver.resolve(&embedding) {
                Ok(resolution) => resolution,
                Err(err @ IndexError::DimensionMismatch { .. }) => {
                    error!(%err, "skipping detection: extractor/store dimension mismatch");
                    report.skipped_detections += 1;
                    continue;
                }
                Err(err) => {
                    error!(%err, "skipping detection: resolution failed");
                    report.skipped_detections += 1;
                    continue;
                }
            };
            report.resolved += 1;

            if let Some(fault) = &resolution.fault {
                error!(
                    person_id = %resolution.person_id,
                    %fault,
                    "identity store fault absorbed: treating person as new"
                );
                report.store_faults += 1;
            }
            if resolution.is_new {
                report.new_identities += 1;
            }

            debug!(
                person_id = %resolution.person_id,
                is_new = resolution.is_new,
                score = ?resolution.score,
                confidence = detection.confidence(),
                "resolved detection"
            );

            if !resolution.is_new || !self.gate.should_alert(&resolution.person_id) {
                continue;
            }

            // The alert is stamped with the frame's arrival time, not the
            // publish time.
            let alert = match encode_jpeg(&crop, ALERT_JPEG_QUALITY) {
                Ok(image) => Alert::new(resolution.person_id.clone(), frame.received_at(), image),
                Err(err) => {
                    warn!(person_id = %resolution.person_id, %err, "alert dropped: crop encode failed");
                    report.publish_failures += 1;
                    continue;
                }
            };
            match self.publisher.publish(&alert).await {
                Ok(()) => report.alerts_published += 1,
                Err(err) => {
                    warn!(person_id = %alert.person_id, %err, "alert publish failed");
                    report.publish_failures += 1;
                }
            }
        }

        report
    }
}
