// src/posture.rs - Debounced posture classification and sitting timer
use crate::calibration::Thresholds;
use crate::config::AppConfig;
use crate::metrics::Metric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKind {
    SitStraight,
    StandUp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub queued_at: f64,
}

/// Classification state. Flagging bad posture is debounced through
/// `BadPending`; recovery is not, a single good frame clears everything.
/// The asymmetry keeps transient occlusions from alerting while still
/// rewarding immediate correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PostureState {
    Unknown,
    GoodConfirmed,
    BadPending { since: f64 },
    BadConfirmed { last_announced: f64 },
}

impl PostureState {
    pub fn label(&self) -> &'static str {
        match self {
            PostureState::Unknown => "unknown",
            PostureState::GoodConfirmed => "good",
            PostureState::BadPending { .. } => "bad-pending",
            PostureState::BadConfirmed { .. } => "bad-confirmed",
        }
    }
}

/// Timing knobs, lifted out of the runtime config.
#[derive(Debug, Clone, Copy)]
pub struct PostureTuning {
    pub bad_posture_duration_threshold: f64,
    pub announcement_interval: f64,
    pub sitting_duration_threshold: f64,
}

impl From<&AppConfig> for PostureTuning {
    fn from(config: &AppConfig) -> Self {
        Self {
            bad_posture_duration_threshold: config.bad_posture_duration_threshold,
            announcement_interval: config.announcement_interval,
            sitting_duration_threshold: config.sitting_duration_threshold,
        }
    }
}

/// Time spent sitting, independent of posture quality. Accumulates only
/// between consecutive active frames, so pausing the pipeline freezes it
/// without erasing it.
#[derive(Debug, Clone, Copy)]
struct SittingSession {
    cumulative_secs: f64,
    last_tick: Option<f64>,
}

pub struct PostureStateMachine {
    thresholds: Thresholds,
    tuning: PostureTuning,
    state: PostureState,
    session: SittingSession,
}

impl PostureStateMachine {
    pub fn new(thresholds: Thresholds, tuning: PostureTuning) -> Self {
        Self {
            thresholds,
            tuning,
            state: PostureState::Unknown,
            session: SittingSession {
                cumulative_secs: 0.0,
                last_tick: None,
            },
        }
    }

    pub fn state(&self) -> PostureState {
        self.state
    }

    pub fn sitting_secs(&self) -> f64 {
        self.session.cumulative_secs
    }

    /// Swap in freshly calibrated thresholds. The pair is replaced as one
    /// value; there is no observable intermediate.
    #[allow(dead_code)]
    pub fn set_thresholds(&mut self, thresholds: Thresholds) {
        self.thresholds = thresholds;
    }

    /// Feed one metric. Returns the alerts this frame triggered (at most one
    /// posture alert and one stand-up reminder).
    pub fn observe(&mut self, metric: &Metric) -> Vec<Alert> {
        let now = metric.timestamp;
        let mut alerts = Vec::new();

        if let Some(last) = self.session.last_tick {
            self.session.cumulative_secs += (now - last).max(0.0);
        }
        self.session.last_tick = Some(now);
        if self.session.cumulative_secs >= self.tuning.sitting_duration_threshold {
            // One alert per crossing; the timer restarts from zero.
            self.session.cumulative_secs = 0.0;
            alerts.push(Alert {
                kind: AlertKind::StandUp,
                queued_at: now,
            });
            tracing::info!(threshold = self.tuning.sitting_duration_threshold, "sitting timer elapsed");
        }

        if self.thresholds.is_bad(metric) {
            match self.state {
                PostureState::Unknown | PostureState::GoodConfirmed => {
                    self.state = PostureState::BadPending { since: now };
                }
                PostureState::BadPending { since } => {
                    if now - since >= self.tuning.bad_posture_duration_threshold {
                        self.state = PostureState::BadConfirmed { last_announced: now };
                        alerts.push(Alert {
                            kind: AlertKind::SitStraight,
                            queued_at: now,
                        });
                        tracing::info!(held_for = now - since, "bad posture confirmed");
                    }
                }
                PostureState::BadConfirmed { last_announced } => {
                    if now - last_announced >= self.tuning.announcement_interval {
                        self.state = PostureState::BadConfirmed { last_announced: now };
                        alerts.push(Alert {
                            kind: AlertKind::SitStraight,
                            queued_at: now,
                        });
                    }
                }
            }
        } else if !matches!(self.state, PostureState::GoodConfirmed) {
            // Recovery is immediate, also out of Unknown.
            if matches!(self.state, PostureState::BadConfirmed { .. }) {
                tracing::info!("posture recovered");
            }
            self.state = PostureState::GoodConfirmed;
        }

        alerts
    }

    /// Pipeline went inactive: freeze the sitting timer. The next observed
    /// frame starts a fresh accumulation interval.
    pub fn pause(&mut self) {
        self.session.last_tick = None;
    }

    /// Pipeline reactivated: drop any stale bad-posture progress so an old
    /// pending timer cannot fire into the resumed session.
    pub fn resume(&mut self) {
        self.state = PostureState::Unknown;
        self.session.last_tick = None;
    }

    /// Explicit "stood up" signal from a front end: the sitting timer starts
    /// over.
    #[allow(dead_code)]
    pub fn stood_up(&mut self) {
        self.session.cumulative_secs = 0.0;
        self.session.last_tick = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BAD_HOLD: f64 = 10.0;
    const ANNOUNCE: f64 = 5.0;
    const SITTING: f64 = 1200.0;

    fn machine() -> PostureStateMachine {
        PostureStateMachine::new(
            Thresholds {
                slouch: -0.9,
                forward_head: 0.5,
            },
            PostureTuning {
                bad_posture_duration_threshold: BAD_HOLD,
                announcement_interval: ANNOUNCE,
                sitting_duration_threshold: SITTING,
            },
        )
    }

    fn good(t: f64) -> Metric {
        Metric {
            slouch: -1.0,
            forward_head: 0.2,
            timestamp: t,
        }
    }

    fn bad(t: f64) -> Metric {
        Metric {
            slouch: -0.7,
            forward_head: 0.2,
            timestamp: t,
        }
    }

    #[test]
    fn good_frames_never_leave_good_or_unknown() {
        let mut m = machine();
        for i in 0..100 {
            let alerts = m.observe(&good(i as f64 * 0.1));
            assert!(alerts.is_empty());
            assert!(matches!(
                m.state(),
                PostureState::GoodConfirmed | PostureState::Unknown
            ));
        }
    }

    #[test]
    fn bad_posture_alerts_once_at_the_confirmation_boundary() {
        let mut m = machine();
        m.observe(&good(0.0));

        let mut alerts = Vec::new();
        // 10 Hz of bad frames across the hold threshold but inside the
        // announcement interval window after confirmation.
        let frames = (BAD_HOLD / 0.1) as usize + 5;
        for i in 0..frames {
            alerts.extend(m.observe(&bad(1.0 + i as f64 * 0.1)));
        }
        let sit_straight: Vec<_> = alerts
            .iter()
            .filter(|a| a.kind == AlertKind::SitStraight)
            .collect();
        assert_eq!(sit_straight.len(), 1);
        assert!(matches!(m.state(), PostureState::BadConfirmed { .. }));
    }

    #[test]
    fn confirmed_bad_reannounces_after_the_interval() {
        let mut m = machine();
        let mut t = 0.0;
        let mut count = 0;
        // Run well past confirmation plus two announcement intervals.
        while t < BAD_HOLD + 2.0 * ANNOUNCE + 1.0 {
            count += m
                .observe(&bad(t))
                .iter()
                .filter(|a| a.kind == AlertKind::SitStraight)
                .count();
            t += 0.1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn recovery_is_not_debounced() {
        let mut m = machine();
        let mut t = 0.0;
        while !matches!(m.state(), PostureState::BadConfirmed { .. }) {
            m.observe(&bad(t));
            t += 0.1;
        }
        m.observe(&good(t + 0.1));
        assert_eq!(m.state(), PostureState::GoodConfirmed);

        // The bad timer restarted: confirming again takes a full hold period.
        let alerts = m.observe(&bad(t + 0.2));
        assert!(alerts.is_empty());
        assert!(matches!(m.state(), PostureState::BadPending { .. }));
    }

    #[test]
    fn sitting_timer_alerts_once_per_crossing_and_resets() {
        let mut m = machine();
        let mut alerts = Vec::new();
        let mut t = 0.0;
        while t < SITTING * 2.0 + 20.0 {
            alerts.extend(
                m.observe(&good(t))
                    .into_iter()
                    .filter(|a| a.kind == AlertKind::StandUp),
            );
            t += 1.0;
        }
        assert_eq!(alerts.len(), 2);
        assert!(m.sitting_secs() < SITTING);
    }

    #[test]
    fn pause_freezes_sitting_progress_and_resume_resets_state() {
        let mut m = machine();
        for i in 0..=100 {
            m.observe(&good(i as f64));
        }
        let before = m.sitting_secs();
        assert!(before > 99.0);

        m.pause();
        m.resume();
        assert_eq!(m.state(), PostureState::Unknown);
        assert_eq!(m.sitting_secs(), before);

        // A long wall-clock gap across the pause does not count as sitting.
        m.observe(&good(5000.0));
        assert_eq!(m.sitting_secs(), before);
    }

    #[test]
    fn stood_up_resets_the_session() {
        let mut m = machine();
        for i in 0..=50 {
            m.observe(&good(i as f64));
        }
        assert!(m.sitting_secs() > 0.0);
        m.stood_up();
        assert_eq!(m.sitting_secs(), 0.0);
    }
}
