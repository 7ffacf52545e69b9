// src/config.rs - Runtime configuration and platform paths
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

static PROJECT_DIRS: Lazy<Option<directories::ProjectDirs>> =
    Lazy::new(|| directories::ProjectDirs::from("com", "sitstraight", "SitStraight"));

/// Runtime configuration, read from `config.json`. Every field carries a
/// default so a partial file merges with the defaults instead of failing,
/// matching how earlier releases treated missing keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Owned by the external launcher (login item registration); carried here
    /// so the file round-trips.
    pub auto_start_enabled: bool,
    /// When off, the activity gate always reports active.
    pub monitor_detection_enabled: bool,
    /// Upper bound on a single spoken alert, seconds.
    pub alert_duration_seconds: f64,
    pub camera_index: u32,
    /// Continuous sitting time before a stand-up reminder, seconds.
    pub sitting_duration_threshold: f64,
    /// How long bad posture must persist before it is flagged, seconds.
    pub bad_posture_duration_threshold: f64,
    /// Minimum silence between same-kind announcements, seconds.
    pub announcement_interval: f64,
    /// User-idle time that pauses the pipeline, seconds.
    pub idle_pause_threshold: f64,
    /// Export a CSV of posture events when the session ends.
    pub export_session_log: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auto_start_enabled: false,
            monitor_detection_enabled: false,
            alert_duration_seconds: 5.0,
            camera_index: 0,
            sitting_duration_threshold: 1200.0,
            bad_posture_duration_threshold: 60.0,
            announcement_interval: 5.0,
            idle_pause_threshold: 120.0,
            export_session_log: false,
        }
    }
}

impl AppConfig {
    /// Load from `path`, falling back to defaults when the file is absent or
    /// unreadable. Config problems are never fatal; calibration is the only
    /// state this program refuses to guess.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Self::default();
        }
        match fs::read_to_string(path).map_err(|e| e.to_string()).and_then(|content| {
            serde_json::from_str::<Self>(&content).map_err(|e| e.to_string())
        }) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "config unreadable, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self).expect("config serializes");
        fs::write(path, content)
    }

    /// Human-readable dump for `--show-config`.
    pub fn show(&self) {
        println!("SitStraight configuration");
        println!("  camera index:            {}", self.camera_index);
        println!(
            "  sitting threshold:       {:.0} s ({:.0} min)",
            self.sitting_duration_threshold,
            self.sitting_duration_threshold / 60.0
        );
        println!(
            "  bad posture threshold:   {:.0} s",
            self.bad_posture_duration_threshold
        );
        println!("  announcement interval:   {:.0} s", self.announcement_interval);
        println!("  alert duration:          {:.1} s", self.alert_duration_seconds);
        println!(
            "  idle pause:              {} (threshold {:.0} s)",
            if self.monitor_detection_enabled { "enabled" } else { "disabled" },
            self.idle_pause_threshold
        );
        println!(
            "  auto start:              {}",
            if self.auto_start_enabled { "enabled" } else { "disabled" }
        );
        println!(
            "  session log export:      {}",
            if self.export_session_log { "enabled" } else { "disabled" }
        );
    }
}

pub fn config_file_path() -> PathBuf {
    PROJECT_DIRS
        .as_ref()
        .map(|dirs| dirs.config_dir().join("config.json"))
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

pub fn calibration_file_path() -> PathBuf {
    PROJECT_DIRS
        .as_ref()
        .map(|dirs| dirs.config_dir().join("calibration.json"))
        .unwrap_or_else(|| PathBuf::from("calibration.json"))
}

pub fn session_data_dir() -> PathBuf {
    PROJECT_DIRS
        .as_ref()
        .map(|dirs| dirs.data_dir().join("sessions"))
        .unwrap_or_else(|| PathBuf::from("sessions"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("sitstraight-cfg-{}.json", Uuid::new_v4()));
        let config = AppConfig::load(&path);
        assert_eq!(config.camera_index, 0);
        assert_eq!(config.sitting_duration_threshold, 1200.0);
    }

    #[test]
    fn partial_file_merges_with_defaults() {
        let path = std::env::temp_dir().join(format!("sitstraight-cfg-{}.json", Uuid::new_v4()));
        fs::write(&path, r#"{ "camera_index": 2, "announcement_interval": 9 }"#).unwrap();

        let config = AppConfig::load(&path);
        assert_eq!(config.camera_index, 2);
        assert_eq!(config.announcement_interval, 9.0);
        assert_eq!(config.bad_posture_duration_threshold, 60.0);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn save_then_load_round_trips() {
        let path = std::env::temp_dir().join(format!("sitstraight-cfg-{}.json", Uuid::new_v4()));
        let mut config = AppConfig::default();
        config.monitor_detection_enabled = true;
        config.idle_pause_threshold = 300.0;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path);
        assert!(loaded.monitor_detection_enabled);
        assert_eq!(loaded.idle_pause_threshold, 300.0);

        fs::remove_file(&path).unwrap();
    }
}
