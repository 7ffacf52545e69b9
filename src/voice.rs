// src/voice.rs - Serialized alert playback
use crate::posture::{Alert, AlertKind};
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Error)]
#[error("speech playback failed: {0}")]
pub struct AudioError(String);

/// The audio collaborator. Synchronous from the consumer's point of view;
/// the call returns once the utterance finished (or failed).
pub trait Speaker: Send + Sync {
    fn play_alert(&self, kind: AlertKind, message: &str) -> Result<(), AudioError>;
}

pub fn message_for(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::SitStraight => "Please sit up straight!",
        AlertKind::StandUp => "You have been sitting for a while. Time to stand up and stretch.",
    }
}

/// Speaks through the OS speech command, trying the usual engines in order.
/// A fresh engine process is spawned per utterance; some speech engines go
/// quiet when a long-lived instance is reused, and a short-lived child also
/// gives us a clean place to enforce the alert duration cap.
pub struct SystemSpeaker {
    max_duration: Duration,
}

impl SystemSpeaker {
    pub fn new(alert_duration_seconds: f64) -> Self {
        Self {
            max_duration: Duration::from_secs_f64(alert_duration_seconds.max(1.0)),
        }
    }

    /// Ok(true) spoke, Ok(false) engine not installed, Err real failure.
    fn speak_with(
        &self,
        program: &str,
        pre_args: &[&str],
        message: &str,
    ) -> Result<bool, AudioError> {
        let mut child = match Command::new(program).args(pre_args).arg(message).spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(AudioError(format!("{program}: {err}"))),
        };

        let deadline = std::time::Instant::now() + self.max_duration + Duration::from_secs(2);
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(true),
                Ok(Some(status)) => {
                    return Err(AudioError(format!("{program} exited with {status}")))
                }
                Ok(None) => {
                    if std::time::Instant::now() >= deadline {
                        // Ran past the alert duration cap; cut it off but
                        // count it as spoken.
                        let _ = child.kill();
                        let _ = child.wait();
                        return Ok(true);
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(err) => return Err(AudioError(format!("{program}: {err}"))),
            }
        }
    }
}

impl Speaker for SystemSpeaker {
    fn play_alert(&self, _kind: AlertKind, message: &str) -> Result<(), AudioError> {
        let engines: [(&str, &[&str]); 3] =
            [("say", &[]), ("espeak", &[]), ("spd-say", &["--wait"])];
        for (program, pre_args) in engines {
            if self.speak_with(program, pre_args, message)? {
                return Ok(());
            }
        }
        Err(AudioError("no speech engine available".to_string()))
    }
}

struct QueueInner {
    pending: VecDeque<Alert>,
    closed: bool,
    coalesced: u64,
}

struct QueueShared {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

/// Producer-facing handle to the alert queue. Cloning shares the queue.
#[derive(Clone)]
pub struct VoiceQueue {
    shared: Arc<QueueShared>,
}

impl VoiceQueue {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(QueueShared {
                inner: Mutex::new(QueueInner {
                    pending: VecDeque::new(),
                    closed: false,
                    coalesced: 0,
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Non-blocking. Returns false when the alert was coalesced into an
    /// already-pending alert of the same kind, or the queue is closed.
    pub fn enqueue(&self, alert: Alert) -> bool {
        let mut inner = self.shared.inner.lock().unwrap();
        if inner.closed {
            return false;
        }
        if inner.pending.iter().any(|a| a.kind == alert.kind) {
            inner.coalesced += 1;
            tracing::debug!(kind = ?alert.kind, "coalesced duplicate alert");
            return false;
        }
        inner.pending.push_back(alert);
        drop(inner);
        self.shared.notify.notify_one();
        true
    }

    /// Stop the consumer. Pending alerts are discarded, not drained; by the
    /// time we shut down they are stale.
    pub fn close(&self) {
        let dropped = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.closed = true;
            let n = inner.pending.len();
            inner.pending.clear();
            n
        };
        if dropped > 0 {
            tracing::info!(dropped, "discarded pending alerts at shutdown");
        }
        self.shared.notify.notify_one();
    }

    #[allow(dead_code)]
    pub fn pending(&self) -> usize {
        self.shared.inner.lock().unwrap().pending.len()
    }

    #[allow(dead_code)]
    pub fn coalesced(&self) -> u64 {
        self.shared.inner.lock().unwrap().coalesced
    }
}

enum Step {
    Play(Alert),
    Wait(Option<Duration>),
    Exit,
}

/// Single consumer draining the queue in arrival order, except that an alert
/// kind still inside its silence gap yields to a later different-kind alert.
pub struct AlertScheduler {
    queue: VoiceQueue,
    speaker: Arc<dyn Speaker>,
    min_gap: Duration,
    last_attempt: HashMap<AlertKind, Instant>,
}

impl AlertScheduler {
    pub fn new(queue: VoiceQueue, speaker: Arc<dyn Speaker>, announcement_interval: f64) -> Self {
        Self {
            queue,
            speaker,
            min_gap: Duration::from_secs_f64(announcement_interval.max(0.0)),
            last_attempt: HashMap::new(),
        }
    }

    fn gap_remaining(&self, kind: AlertKind, now: Instant) -> Option<Duration> {
        let last = self.last_attempt.get(&kind)?;
        let elapsed = now.duration_since(*last);
        (elapsed < self.min_gap).then(|| self.min_gap - elapsed)
    }

    fn next_step(&self) -> Step {
        let mut inner = self.queue.shared.inner.lock().unwrap();
        if inner.closed {
            return Step::Exit;
        }
        let now = Instant::now();
        let mut earliest: Option<Duration> = None;
        let mut eligible = None;
        for (idx, alert) in inner.pending.iter().enumerate() {
            match self.gap_remaining(alert.kind, now) {
                None => {
                    eligible = Some(idx);
                    break;
                }
                Some(wait) => earliest = Some(earliest.map_or(wait, |e| e.min(wait))),
            }
        }
        match eligible {
            Some(idx) => Step::Play(inner.pending.remove(idx).expect("index in bounds")),
            None => Step::Wait(earliest),
        }
    }

    pub async fn run(mut self) {
        loop {
            match self.next_step() {
                Step::Exit => return,
                Step::Play(alert) => {
                    let speaker = Arc::clone(&self.speaker);
                    let kind = alert.kind;
                    let message = message_for(kind);
                    tracing::debug!(?kind, "playing alert");
                    match tokio::task::spawn_blocking(move || speaker.play_alert(kind, message))
                        .await
                    {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            tracing::warn!(%err, ?kind, "alert playback failed, dropping alert")
                        }
                        Err(err) => tracing::warn!(%err, ?kind, "alert playback task died"),
                    }
                    self.last_attempt.insert(kind, Instant::now());
                }
                Step::Wait(wait) => {
                    let notified = self.queue.shared.notify.notified();
                    match wait {
                        Some(d) => {
                            tokio::select! {
                                _ = notified => {}
                                _ = tokio::time::sleep(d) => {}
                            }
                        }
                        None => notified.await,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSpeaker {
        calls: Mutex<Vec<AlertKind>>,
    }

    impl RecordingSpeaker {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<AlertKind> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Speaker for RecordingSpeaker {
        fn play_alert(&self, kind: AlertKind, _message: &str) -> Result<(), AudioError> {
            self.calls.lock().unwrap().push(kind);
            Ok(())
        }
    }

    struct FailingSpeaker;

    impl Speaker for FailingSpeaker {
        fn play_alert(&self, _kind: AlertKind, _message: &str) -> Result<(), AudioError> {
            Err(AudioError("engine gone".to_string()))
        }
    }

    fn alert(kind: AlertKind, at: f64) -> Alert {
        Alert {
            kind,
            queued_at: at,
        }
    }

    #[test]
    fn duplicate_kind_is_coalesced_while_unplayed() {
        let queue = VoiceQueue::new();
        assert!(queue.enqueue(alert(AlertKind::SitStraight, 0.0)));
        assert!(!queue.enqueue(alert(AlertKind::SitStraight, 0.1)));
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.coalesced(), 1);

        assert!(queue.enqueue(alert(AlertKind::StandUp, 0.2)));
        assert_eq!(queue.pending(), 2);
    }

    #[test]
    fn closed_queue_rejects_and_discards() {
        let queue = VoiceQueue::new();
        queue.enqueue(alert(AlertKind::SitStraight, 0.0));
        queue.close();
        assert_eq!(queue.pending(), 0);
        assert!(!queue.enqueue(alert(AlertKind::StandUp, 0.1)));
    }

    #[tokio::test]
    async fn back_to_back_duplicates_play_once() {
        let queue = VoiceQueue::new();
        let speaker = RecordingSpeaker::new();
        queue.enqueue(alert(AlertKind::SitStraight, 0.0));
        queue.enqueue(alert(AlertKind::SitStraight, 0.0));

        let scheduler = AlertScheduler::new(queue.clone(), speaker.clone(), 60.0);
        let consumer = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(speaker.calls(), vec![AlertKind::SitStraight]);
        queue.close();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn different_kind_skips_the_silence_gap() {
        let queue = VoiceQueue::new();
        let speaker = RecordingSpeaker::new();
        let scheduler = AlertScheduler::new(queue.clone(), speaker.clone(), 60.0);
        let consumer = tokio::spawn(scheduler.run());

        queue.enqueue(alert(AlertKind::SitStraight, 0.0));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(speaker.calls(), vec![AlertKind::SitStraight]);

        // SitStraight is now inside its gap; StandUp is not and overtakes it.
        queue.enqueue(alert(AlertKind::SitStraight, 1.0));
        queue.enqueue(alert(AlertKind::StandUp, 1.1));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(
            speaker.calls(),
            vec![AlertKind::SitStraight, AlertKind::StandUp]
        );
        assert_eq!(queue.pending(), 1);

        queue.close();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn playback_failure_drops_the_alert_and_continues() {
        let queue = VoiceQueue::new();
        let scheduler = AlertScheduler::new(queue.clone(), Arc::new(FailingSpeaker), 0.0);
        let consumer = tokio::spawn(scheduler.run());

        queue.enqueue(alert(AlertKind::SitStraight, 0.0));
        queue.enqueue(alert(AlertKind::StandUp, 0.1));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(queue.pending(), 0);
        queue.close();
        consumer.await.unwrap();
    }
}
