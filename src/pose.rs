// src/pose.rs - Landmark types and the pose-model boundary
use anyhow::Result;
use image::DynamicImage;
use nalgebra::Vector3;

// MediaPipe pose landmark indices for the points we consume
const NOSE: usize = 0;
const LEFT_SHOULDER: usize = 11;
const RIGHT_SHOULDER: usize = 12;
const LEFT_HIP: usize = 23;
const RIGHT_HIP: usize = 24;

/// One named point with its detection confidence.
#[derive(Debug, Clone, Copy)]
pub struct Landmark {
    pub position: Vector3<f64>,
    pub visibility: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64, visibility: f64) -> Self {
        Self {
            position: Vector3::new(x, y, z),
            visibility,
        }
    }
}

/// The landmarks of a single frame. Immutable once produced; coordinates are
/// normalized image space (x and y in 0..1, y grows downward, z toward the
/// camera), which is what the upstream model emits.
#[derive(Debug, Clone)]
pub struct LandmarkSet {
    pub timestamp: f64,
    pub nose: Landmark,
    pub left_shoulder: Landmark,
    pub right_shoulder: Landmark,
    pub left_hip: Landmark,
    pub right_hip: Landmark,
}

impl LandmarkSet {
    /// Build a set from a full model output of `[x, y, z, visibility]` rows.
    /// Returns `None` when the output is too short to contain the hips. This
    /// is the entry point for a wired landmark backend.
    #[allow(dead_code)]
    pub fn from_raw(landmarks: &[[f64; 4]], timestamp: f64) -> Option<Self> {
        if landmarks.len() <= RIGHT_HIP {
            return None;
        }
        let pick = |idx: usize| {
            let lm = landmarks[idx];
            Landmark::new(lm[0], lm[1], lm[2], lm[3])
        };
        Some(Self {
            timestamp,
            nose: pick(NOSE),
            left_shoulder: pick(LEFT_SHOULDER),
            right_shoulder: pick(RIGHT_SHOULDER),
            left_hip: pick(LEFT_HIP),
            right_hip: pick(RIGHT_HIP),
        })
    }

    pub fn points(&self) -> [(&'static str, &Landmark); 5] {
        [
            ("nose", &self.nose),
            ("left_shoulder", &self.left_shoulder),
            ("right_shoulder", &self.right_shoulder),
            ("left_hip", &self.left_hip),
            ("right_hip", &self.right_hip),
        ]
    }
}

/// Boundary to the landmark estimation model. The model itself is an external
/// collaborator; implementations turn a captured frame into zero or one
/// landmark set. `Ok(None)` means "no detection this tick" and is not an
/// error.
pub trait PoseEstimator: Send {
    fn estimate(&mut self, frame: &DynamicImage, timestamp: f64) -> Result<Option<LandmarkSet>>;
}

/// Integration seam for a real landmark backend (ONNX runtime, a MediaPipe
/// sidecar, ...). Hosts embedding this binary wire their model here; without
/// one, every frame reports no detection.
pub struct PoseBridge;

impl PoseBridge {
    pub fn new() -> Result<Self> {
        tracing::info!("pose bridge initialized without an embedded model; use --synthetic for a demo source");
        Ok(Self)
    }
}

impl PoseEstimator for PoseBridge {
    fn estimate(&mut self, _frame: &DynamicImage, _timestamp: f64) -> Result<Option<LandmarkSet>> {
        Ok(None)
    }
}

/// Deterministic landmark generator for demos and tests. Produces an upright
/// sitter that periodically slides into a slouch, so the whole pipeline can
/// run without a camera or a model.
pub struct SyntheticPose {
    visibility: f64,
}

impl SyntheticPose {
    pub fn new() -> Self {
        Self { visibility: 0.95 }
    }

    /// Fraction of a full slouch at time `t`, in 0..1. Slouch episodes last a
    /// few seconds and repeat on a ~30 s cycle.
    fn slouch_phase(t: f64) -> f64 {
        let wave = (t * 0.2).sin();
        if wave > 0.6 {
            ((wave - 0.6) / 0.4).min(1.0)
        } else {
            0.0
        }
    }

    pub fn next(&mut self, timestamp: f64) -> LandmarkSet {
        let phase = Self::slouch_phase(timestamp);
        // Upright: shoulders ~0.35 above the hips in image space. Slouching
        // drops the shoulders, curls them toward the camera, and pushes the
        // nose forward along z.
        let shoulder_y = 0.40 + 0.08 * phase;
        let shoulder_z = -0.12 * phase;
        let nose_z = -0.10 - 0.25 * phase;
        let v = self.visibility;
        LandmarkSet {
            timestamp,
            nose: Landmark::new(0.50, shoulder_y - 0.15, nose_z, v),
            left_shoulder: Landmark::new(0.38, shoulder_y, shoulder_z, v),
            right_shoulder: Landmark::new(0.62, shoulder_y, shoulder_z, v),
            left_hip: Landmark::new(0.42, 0.75, 0.0, v),
            right_hip: Landmark::new(0.58, 0.75, 0.0, v),
        }
    }
}

impl PoseEstimator for SyntheticPose {
    fn estimate(&mut self, _frame: &DynamicImage, timestamp: f64) -> Result<Option<LandmarkSet>> {
        Ok(Some(self.next(timestamp)))
    }
}
