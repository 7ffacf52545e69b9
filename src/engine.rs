// src/engine.rs - Pipeline wiring for normal and calibration modes
use crate::activity::{self, ActivityGate, SystemActivityProbe};
use crate::calibration::{CalibrationEngine, CalibrationError, PostureLabel};
use crate::camera::{CameraError, CameraSource};
use crate::config::{self, AppConfig};
use crate::metrics::{Metric, MetricExtractor};
use crate::pose::{LandmarkSet, PoseBridge, PoseEstimator, SyntheticPose};
use crate::posture::{PostureStateMachine, PostureTuning};
use crate::report::SessionReport;
use crate::voice::{AlertScheduler, Speaker, SystemSpeaker, VoiceQueue};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

/// Pacing for the landmark producer, roughly 15 Hz.
const FRAME_INTERVAL: Duration = Duration::from_millis(66);

/// What feeds the pipeline with landmark sets.
enum FrameSource {
    Camera {
        camera: CameraSource,
        estimator: Box<dyn PoseEstimator>,
    },
    Synthetic(SyntheticPose),
}

impl FrameSource {
    fn open(config: &AppConfig, synthetic: bool) -> Result<Self> {
        if synthetic {
            tracing::info!("using synthetic landmark source");
            return Ok(FrameSource::Synthetic(SyntheticPose::new()));
        }
        let camera = CameraSource::open(config.camera_index)?;
        let estimator: Box<dyn PoseEstimator> = Box::new(PoseBridge::new()?);
        Ok(FrameSource::Camera { camera, estimator })
    }

    fn next(&mut self, timestamp: f64) -> Result<Option<LandmarkSet>> {
        match self {
            FrameSource::Camera { camera, estimator } => {
                let frame = match camera.read_frame() {
                    Ok(frame) => frame,
                    Err(CameraError::Capture(reason)) => {
                        // A dropped frame is "no frame this tick", not an error.
                        tracing::debug!(%reason, "frame capture failed");
                        return Ok(None);
                    }
                    Err(err) => return Err(err.into()),
                };
                estimator.estimate(&frame, timestamp)
            }
            FrameSource::Synthetic(source) => Ok(Some(source.next(timestamp))),
        }
    }
}

/// Blocking producer loop. Owns the camera for its whole lifetime, so the
/// device is released on every exit path, including errors.
fn spawn_frame_producer(
    config: &AppConfig,
    synthetic: bool,
    tx: mpsc::Sender<LandmarkSet>,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<Result<()>> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || {
        let mut source = FrameSource::open(&config, synthetic)?;
        let started = Instant::now();
        while !stop.load(Ordering::Relaxed) {
            let timestamp = started.elapsed().as_secs_f64();
            match source.next(timestamp)? {
                Some(set) => {
                    if tx.blocking_send(set).is_err() {
                        break;
                    }
                }
                None => {}
            }
            std::thread::sleep(FRAME_INTERVAL);
        }
        Ok(())
    })
}

/// Continuous classification. Refuses to start without a saved calibration.
pub async fn run_normal(config: AppConfig, synthetic: bool) -> Result<()> {
    let calibration = CalibrationEngine::load(config::calibration_file_path())?;
    let thresholds = calibration
        .thresholds()
        .ok_or(CalibrationError::NotComputed)?;
    tracing::info!(
        slouch = thresholds.slouch,
        forward_head = thresholds.forward_head,
        "loaded calibration"
    );

    let queue = VoiceQueue::new();
    let speaker: Arc<dyn Speaker> = Arc::new(SystemSpeaker::new(config.alert_duration_seconds));
    let consumer = tokio::spawn(
        AlertScheduler::new(queue.clone(), speaker, config.announcement_interval).run(),
    );

    let (frame_tx, mut frame_rx) = mpsc::channel(8);
    let stop = Arc::new(AtomicBool::new(false));
    let producer = spawn_frame_producer(&config, synthetic, frame_tx, Arc::clone(&stop));

    // The watch sender either moves into the poller or stays alive here so
    // the channel never reports closed mid-run.
    let (activity_tx, mut activity_rx) = watch::channel(true);
    let mut _kept_tx = None;
    let _poller = if config.monitor_detection_enabled {
        Some(activity::spawn_poller(
            Box::new(SystemActivityProbe::new()),
            ActivityGate::new(config.idle_pause_threshold, true),
            activity_tx,
            activity::POLL_INTERVAL,
        ))
    } else {
        _kept_tx = Some(activity_tx);
        None
    };

    let mut machine = PostureStateMachine::new(thresholds, PostureTuning::from(&config));
    let mut extractor = MetricExtractor::new();
    let mut report = config
        .export_session_log
        .then(|| SessionReport::new(config::session_data_dir(), None));
    let mut active = true;
    let mut activity_alive = true;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tracing::info!("posture monitoring started");
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("shutdown requested");
                break;
            }
            changed = activity_rx.changed(), if activity_alive => {
                match changed {
                    Ok(()) => {
                        let now_active = *activity_rx.borrow_and_update();
                        if now_active != active {
                            active = now_active;
                            if active {
                                machine.resume();
                                tracing::info!("pipeline resumed");
                            } else {
                                machine.pause();
                                tracing::info!("pipeline paused");
                            }
                        }
                    }
                    Err(_) => activity_alive = false,
                }
            }
            received = frame_rx.recv() => {
                let Some(set) = received else { break };
                if !active {
                    continue;
                }
                let Ok(metric) = extractor.extract(&set) else { continue };
                let alerts = machine.observe(&metric);
                if let Some(report) = report.as_mut() {
                    report.record(
                        &metric,
                        machine.state(),
                        alerts.first().map(|a| a.kind),
                        machine.sitting_secs(),
                    );
                }
                for alert in alerts {
                    queue.enqueue(alert);
                }
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    queue.close();
    drop(frame_rx);
    let _ = consumer.await;

    if let Some(report) = report.take() {
        if !report.is_empty() {
            match report.export_csv() {
                Ok(path) => tracing::info!(path = %path.display(), "session log exported"),
                Err(err) => tracing::warn!(%err, "session log export failed"),
            }
        }
    }

    producer.await.context("frame producer panicked")??;
    Ok(())
}

/// Interactive sample collection. Labels the most recent measurable frame.
pub async fn run_calibration(config: AppConfig, synthetic: bool) -> Result<()> {
    let calibration_path = config::calibration_file_path();
    let mut calibration = match CalibrationEngine::load(&calibration_path) {
        Ok(engine) => {
            let (good, bad) = engine.sample_counts();
            println!("Resuming existing calibration ({good} good / {bad} bad samples).");
            engine
        }
        Err(CalibrationError::Missing { .. }) => CalibrationEngine::new(&calibration_path),
        Err(err) => return Err(err.into()),
    };

    let (frame_tx, mut frame_rx) = mpsc::channel(8);
    let stop = Arc::new(AtomicBool::new(false));
    let producer = spawn_frame_producer(&config, synthetic, frame_tx, Arc::clone(&stop));

    println!("Calibration mode. Sit in front of the camera and type:");
    println!("  g  label the current posture as good");
    println!("  b  label the current posture as bad");
    println!("  c  compute thresholds");
    println!("  s  save calibration");
    println!("  q  quit");

    let mut extractor = MetricExtractor::new();
    let mut latest: Option<Metric> = None;
    let mut unsaved = false;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            received = frame_rx.recv() => {
                let Some(set) = received else { break };
                if let Ok(metric) = extractor.extract(&set) {
                    latest = Some(metric);
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "g" | "b" => {
                        let label = if line.trim() == "g" {
                            PostureLabel::Good
                        } else {
                            PostureLabel::Bad
                        };
                        match latest {
                            Some(metric) => {
                                calibration.add_sample(metric, label);
                                unsaved = true;
                                let (good, bad) = calibration.sample_counts();
                                println!(
                                    "labeled {:?} (slouch {:.3}, forward head {:.3}); {good} good / {bad} bad",
                                    label, metric.slouch, metric.forward_head
                                );
                            }
                            None => println!("no measurable frame yet, adjust the camera"),
                        }
                    }
                    "c" => match calibration.compute_thresholds() {
                        Ok(t) => {
                            unsaved = true;
                            println!(
                                "thresholds: slouch {:.3}, forward head {:.3}",
                                t.slouch, t.forward_head
                            );
                        }
                        Err(err) => println!("{err}"),
                    },
                    "s" => match calibration.save() {
                        Ok(()) => {
                            unsaved = false;
                            println!("calibration saved to {}", calibration.path().display());
                        }
                        Err(err) => println!("{err}"),
                    },
                    "q" => break,
                    "" => {}
                    other => println!("unknown command {other:?}"),
                }
            }
        }
    }

    stop.store(true, Ordering::Relaxed);

    // Quitting must not lose a computed run.
    if unsaved && calibration.thresholds().is_some() {
        match calibration.save() {
            Ok(()) => println!("calibration saved to {}", calibration.path().display()),
            Err(err) => tracing::warn!(%err, "could not save calibration at exit"),
        }
    } else if unsaved {
        println!("samples were collected but thresholds were never computed; nothing saved");
    }

    drop(frame_rx);
    producer.await.context("frame producer panicked")??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Thresholds;
    use crate::posture::AlertKind;
    use crate::voice::AudioError;
    use std::sync::Mutex;

    struct RecordingSpeaker {
        calls: Mutex<Vec<AlertKind>>,
    }

    impl RecordingSpeaker {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl Speaker for RecordingSpeaker {
        fn play_alert(&self, kind: AlertKind, _message: &str) -> Result<(), AudioError> {
            self.calls.lock().unwrap().push(kind);
            Ok(())
        }
    }

    /// 150 in-threshold metrics followed by 50 out-of-threshold frames that
    /// span more than the bad-posture hold must produce exactly one spoken
    /// SitStraight and no StandUp.
    #[tokio::test]
    async fn fixed_sequence_speaks_exactly_one_sit_straight() {
        let thresholds = Thresholds {
            slouch: -0.9,
            forward_head: 0.5,
        };
        let tuning = PostureTuning {
            bad_posture_duration_threshold: 2.0,
            announcement_interval: 60.0,
            sitting_duration_threshold: 10_000.0,
        };
        let mut machine = PostureStateMachine::new(thresholds, tuning);

        let queue = VoiceQueue::new();
        let speaker = RecordingSpeaker::new();
        let consumer = tokio::spawn(AlertScheduler::new(queue.clone(), speaker.clone(), 60.0).run());

        for i in 0..200 {
            let timestamp = i as f64 * 0.1;
            let metric = if i < 150 {
                Metric {
                    slouch: -1.0,
                    forward_head: 0.2,
                    timestamp,
                }
            } else {
                Metric {
                    slouch: -0.6,
                    forward_head: 0.2,
                    timestamp,
                }
            };
            for alert in machine.observe(&metric) {
                queue.enqueue(alert);
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            speaker.calls.lock().unwrap().clone(),
            vec![AlertKind::SitStraight]
        );

        queue.close();
        consumer.await.unwrap();
    }

    /// The synthetic source drives the full extract/classify path and its
    /// slouch episodes cross a calibration-shaped boundary.
    #[test]
    fn synthetic_source_produces_classifiable_metrics() {
        let mut source = SyntheticPose::new();
        let mut extractor = MetricExtractor::new();
        let thresholds = Thresholds {
            slouch: -0.95,
            forward_head: 0.6,
        };

        let mut good = 0;
        let mut bad = 0;
        for i in 0..600 {
            let set = source.next(i as f64 * 0.1);
            let metric = extractor.extract(&set).expect("synthetic frames measure");
            if thresholds.is_bad(&metric) {
                bad += 1;
            } else {
                good += 1;
            }
        }
        assert!(good > 0 && bad > 0, "good={good} bad={bad}");
    }
}
