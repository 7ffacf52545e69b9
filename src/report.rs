// src/report.rs - Session event log and CSV export
use crate::metrics::Metric;
use crate::posture::{AlertKind, PostureState};
use anyhow::Result;
use chrono::Local;
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct SessionRecord {
    timestamp: f64,
    wall_clock: String,
    slouch: f64,
    forward_head: f64,
    state: &'static str,
    alert: Option<String>,
    sitting_secs: f64,
}

/// In-memory log of what the classifier saw and decided, exported as CSV
/// when the session ends. Off by default; enabled through the config.
pub struct SessionReport {
    output_dir: PathBuf,
    session_name: String,
    records: Vec<SessionRecord>,
}

impl SessionReport {
    pub fn new(output_dir: impl AsRef<Path>, session_name: Option<String>) -> Self {
        let session_name = session_name
            .unwrap_or_else(|| format!("session_{}", Local::now().format("%Y%m%d_%H%M%S")));
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            session_name,
            records: Vec::new(),
        }
    }

    pub fn record(
        &mut self,
        metric: &Metric,
        state: PostureState,
        alert: Option<AlertKind>,
        sitting_secs: f64,
    ) {
        self.records.push(SessionRecord {
            timestamp: metric.timestamp,
            wall_clock: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            slouch: metric.slouch,
            forward_head: metric.forward_head,
            state: state.label(),
            alert: alert.map(|k| format!("{k:?}")),
            sitting_secs,
        });
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn export_csv(&self) -> Result<PathBuf> {
        let csv_path = self
            .output_dir
            .join(&self.session_name)
            .join("posture_log.csv");

        if let Some(parent) = csv_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(&csv_path)?;
        let mut writer = Writer::from_writer(file);
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;

        Ok(csv_path)
    }
}
