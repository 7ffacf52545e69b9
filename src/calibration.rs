// src/calibration.rs - Personalized thresholds from labeled samples
use crate::metrics::Metric;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Samples required per label before thresholds can be computed.
pub const MIN_SAMPLES_PER_LABEL: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostureLabel {
    Good,
    Bad,
}

/// The personalized decision boundary. A metric is out of posture when either
/// dimension exceeds its threshold. Replaced as a whole value on
/// recalibration so readers never see a half-updated pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub slouch: f64,
    pub forward_head: f64,
}

impl Thresholds {
    pub fn is_bad(&self, metric: &Metric) -> bool {
        metric.slouch > self.slouch || metric.forward_head > self.forward_head
    }
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("need at least 3 good and 3 bad samples (have {good} good, {bad} bad)")]
    InsufficientSamples { good: usize, bad: usize },
    #[error("bad-posture samples do not separate from good ones in the {dimension} dimension; recollect samples with a clearer slouch")]
    DegenerateSeparation { dimension: &'static str },
    #[error("no calibration found at {}; run with --calibrate first", .path.display())]
    Missing { path: PathBuf },
    #[error("calibration file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("calibration file is not valid: {0}")]
    Format(#[from] serde_json::Error),
    #[error("thresholds have not been computed yet")]
    NotComputed,
}

/// On-disk shape of a calibration run. Round-trips losslessly.
#[derive(Debug, Serialize, Deserialize)]
struct CalibrationFile {
    good_examples: Vec<Metric>,
    bad_examples: Vec<Metric>,
    thresholds: Thresholds,
}

pub struct CalibrationEngine {
    path: PathBuf,
    good: Vec<Metric>,
    bad: Vec<Metric>,
    thresholds: Option<Thresholds>,
}

impl CalibrationEngine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            good: Vec::new(),
            bad: Vec::new(),
            thresholds: None,
        }
    }

    /// Load a previously saved calibration. `Missing` when no file exists.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CalibrationError> {
        let path = path.into();
        if !path.exists() {
            return Err(CalibrationError::Missing { path });
        }
        let content = fs::read_to_string(&path)?;
        let file: CalibrationFile = serde_json::from_str(&content)?;
        Ok(Self {
            path,
            good: file.good_examples,
            bad: file.bad_examples,
            thresholds: Some(file.thresholds),
        })
    }

    pub fn add_sample(&mut self, metric: Metric, label: PostureLabel) {
        match label {
            PostureLabel::Good => self.good.push(metric),
            PostureLabel::Bad => self.bad.push(metric),
        }
    }

    pub fn sample_counts(&self) -> (usize, usize) {
        (self.good.len(), self.bad.len())
    }

    pub fn thresholds(&self) -> Option<Thresholds> {
        self.thresholds
    }

    /// Compute the midpoint boundary between the class means, per dimension.
    /// Fails without touching the live thresholds when the sample set is too
    /// small or the classes do not separate in the worse-is-larger direction.
    pub fn compute_thresholds(&mut self) -> Result<Thresholds, CalibrationError> {
        if self.good.len() < MIN_SAMPLES_PER_LABEL || self.bad.len() < MIN_SAMPLES_PER_LABEL {
            return Err(CalibrationError::InsufficientSamples {
                good: self.good.len(),
                bad: self.bad.len(),
            });
        }

        let slouch = Self::dimension_boundary("slouch", &self.good, &self.bad, |m| m.slouch)?;
        let forward_head =
            Self::dimension_boundary("forward_head", &self.good, &self.bad, |m| m.forward_head)?;

        let thresholds = Thresholds {
            slouch,
            forward_head,
        };
        self.thresholds = Some(thresholds);
        Ok(thresholds)
    }

    fn dimension_boundary(
        dimension: &'static str,
        good: &[Metric],
        bad: &[Metric],
        value: impl Fn(&Metric) -> f64,
    ) -> Result<f64, CalibrationError> {
        let good_mean = mean(good, &value);
        let bad_mean = mean(bad, &value);
        if bad_mean <= good_mean {
            return Err(CalibrationError::DegenerateSeparation { dimension });
        }

        // Overlapping distributions still calibrate, but flag them: a gap
        // under one pooled standard deviation means noisy frames will sit on
        // both sides of the boundary.
        let pooled_sd = ((variance(good, &value) + variance(bad, &value)) / 2.0).sqrt();
        if bad_mean - good_mean < pooled_sd {
            tracing::warn!(
                dimension,
                gap = bad_mean - good_mean,
                pooled_sd,
                "calibration classes overlap; expect a jittery boundary"
            );
        }

        Ok((good_mean + bad_mean) / 2.0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist thresholds and the raw sample set. Writes a temp file and
    /// renames it so a concurrent load never sees a half-written file.
    pub fn save(&self) -> Result<(), CalibrationError> {
        let thresholds = self.thresholds.ok_or(CalibrationError::NotComputed)?;
        let file = CalibrationFile {
            good_examples: self.good.clone(),
            bad_examples: self.bad.clone(),
            thresholds,
        };
        let content = serde_json::to_string_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self
            .path
            .with_file_name(format!(".calibration-{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn mean(metrics: &[Metric], value: &impl Fn(&Metric) -> f64) -> f64 {
    metrics.iter().map(value).sum::<f64>() / metrics.len() as f64
}

fn variance(metrics: &[Metric], value: &impl Fn(&Metric) -> f64) -> f64 {
    let m = mean(metrics, value);
    metrics.iter().map(|s| (value(s) - m).powi(2)).sum::<f64>() / metrics.len() as f64
}
