// src/metrics.rs - Normalized posture metrics from a landmark set
use crate::pose::LandmarkSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum per-point confidence before a frame is trusted.
const MIN_VISIBILITY: f64 = 0.5;
/// Shoulder-to-hip distance below this is degenerate geometry (subject too
/// close, torso folded out of view) and would blow up the normalization.
const MIN_TORSO_LENGTH: f64 = 0.05;
/// Rejected-frame debug notes are emitted at most this often.
const REJECT_NOTE_INTERVAL_SECS: f64 = 5.0;

/// One frame's posture measurement. Both values are normalized by torso
/// length so they are invariant to the subject's distance from the camera,
/// and both are oriented so that larger means worse posture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Signed vertical drop of the shoulder midpoint relative to the hip
    /// midpoint. Image y grows downward, so an upright torso sits near -1.0
    /// and slouching raises the value toward zero.
    pub slouch: f64,
    /// Horizontal offset of the nose from the hip midpoint, in the x-z plane.
    pub forward_head: f64,
    /// Seconds since pipeline start.
    pub timestamp: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrameReject {
    #[error("landmark {0} below visibility floor")]
    LowVisibility(&'static str),
    #[error("torso length {0:.4} is degenerate")]
    DegenerateTorso(f64),
}

/// Converts landmark sets into metrics, rejecting frames that cannot be
/// measured reliably. Rejection is a local recovery: the frame is skipped,
/// nothing downstream changes.
pub struct MetricExtractor {
    min_visibility: f64,
    rejected: u64,
    last_reject_note: f64,
}

impl MetricExtractor {
    pub fn new() -> Self {
        Self {
            min_visibility: MIN_VISIBILITY,
            rejected: 0,
            last_reject_note: f64::NEG_INFINITY,
        }
    }

    #[allow(dead_code)]
    pub fn rejected_frames(&self) -> u64 {
        self.rejected
    }

    pub fn extract(&mut self, set: &LandmarkSet) -> Result<Metric, FrameReject> {
        match self.measure(set) {
            Ok(metric) => Ok(metric),
            Err(reject) => {
                self.rejected += 1;
                if set.timestamp - self.last_reject_note >= REJECT_NOTE_INTERVAL_SECS {
                    self.last_reject_note = set.timestamp;
                    tracing::debug!(total = self.rejected, "frame rejected: {reject}");
                }
                Err(reject)
            }
        }
    }

    fn measure(&self, set: &LandmarkSet) -> Result<Metric, FrameReject> {
        for (name, lm) in set.points() {
            if lm.visibility < self.min_visibility {
                return Err(FrameReject::LowVisibility(name));
            }
        }

        let shoulder_mid = (set.left_shoulder.position + set.right_shoulder.position) / 2.0;
        let hip_mid = (set.left_hip.position + set.right_hip.position) / 2.0;

        let torso = (shoulder_mid - hip_mid).norm();
        if torso < MIN_TORSO_LENGTH {
            return Err(FrameReject::DegenerateTorso(torso));
        }

        let slouch = (shoulder_mid.y - hip_mid.y) / torso;
        let dx = set.nose.position.x - hip_mid.x;
        let dz = set.nose.position.z - hip_mid.z;
        let forward_head = (dx * dx + dz * dz).sqrt() / torso;

        Ok(Metric {
            slouch,
            forward_head,
            timestamp: set.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::{Landmark, LandmarkSet};

    fn upright_set(timestamp: f64) -> LandmarkSet {
        LandmarkSet {
            timestamp,
            nose: Landmark::new(0.50, 0.25, -0.10, 0.9),
            left_shoulder: Landmark::new(0.40, 0.40, 0.0, 0.9),
            right_shoulder: Landmark::new(0.60, 0.40, 0.0, 0.9),
            left_hip: Landmark::new(0.45, 0.75, 0.0, 0.9),
            right_hip: Landmark::new(0.55, 0.75, 0.0, 0.9),
        }
    }

    #[test]
    fn upright_torso_yields_negative_slouch() {
        let mut extractor = MetricExtractor::new();
        let metric = extractor.extract(&upright_set(0.0)).unwrap();
        assert!(metric.slouch < -0.9, "slouch was {}", metric.slouch);
        assert!(metric.forward_head > 0.0);
    }

    #[test]
    fn slouching_raises_the_slouch_value() {
        let mut extractor = MetricExtractor::new();
        let upright = extractor.extract(&upright_set(0.0)).unwrap();

        // Slouching both drops the shoulders and curls them forward; a purely
        // vertical torso would keep the ratio pinned at -1.0.
        let mut slouched = upright_set(1.0);
        for shoulder in [&mut slouched.left_shoulder, &mut slouched.right_shoulder] {
            shoulder.position.y = 0.55;
            shoulder.position.z = -0.15;
        }
        let bad = extractor.extract(&slouched).unwrap();

        assert!(bad.slouch > upright.slouch);
    }

    #[test]
    fn metric_is_invariant_to_subject_distance() {
        let mut extractor = MetricExtractor::new();
        let near = extractor.extract(&upright_set(0.0)).unwrap();

        // Same pose at half scale around the frame center, as if the subject
        // moved away from the camera.
        let mut far_set = upright_set(1.0);
        for (_, lm) in [
            ("nose", &mut far_set.nose),
            ("ls", &mut far_set.left_shoulder),
            ("rs", &mut far_set.right_shoulder),
            ("lh", &mut far_set.left_hip),
            ("rh", &mut far_set.right_hip),
        ] {
            lm.position.x = 0.5 + (lm.position.x - 0.5) * 0.5;
            lm.position.y = 0.5 + (lm.position.y - 0.5) * 0.5;
            lm.position.z *= 0.5;
        }
        let far = extractor.extract(&far_set).unwrap();

        assert!((near.slouch - far.slouch).abs() < 1e-9);
        assert!((near.forward_head - far.forward_head).abs() < 1e-9);
    }

    #[test]
    fn low_visibility_rejects_the_frame() {
        let mut extractor = MetricExtractor::new();
        let mut set = upright_set(0.0);
        set.left_hip.visibility = 0.2;
        assert_eq!(
            extractor.extract(&set),
            Err(FrameReject::LowVisibility("left_hip"))
        );
        assert_eq!(extractor.rejected_frames(), 1);
    }

    #[test]
    fn degenerate_torso_rejects_the_frame() {
        let mut extractor = MetricExtractor::new();
        let mut set = upright_set(0.0);
        set.left_shoulder.position = set.left_hip.position;
        set.right_shoulder.position = set.right_hip.position;
        assert!(matches!(
            extractor.extract(&set),
            Err(FrameReject::DegenerateTorso(_))
        ));
    }
}
