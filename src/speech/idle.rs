//! Idle and expressive face animation
//!
//! Each character face runs three free-running behaviours: blinking,
//! breathing and occasional brow movement. A laugh can be layered on top.
//! The layer yields the mouth to the lip-sync sampler while its character
//! speaks and is restarted (not paused) whenever the speaking flag flips.

use std::f32::consts::PI;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;

use super::morph::{expression_weights, Morph, MorphWeights};
use super::types::ExpressionId;
use crate::config::IdleConfig;

/// Laugh build-up ends here
const LAUGH_BUILD_END: Duration = Duration::from_millis(800);
/// Oscillating laughter ends here, fade-out follows
const LAUGH_PEAK_END: Duration = Duration::from_millis(2000);

/// Standard ease-in-out quad
fn ease_in_out(t: f32) -> f32 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

fn progress(elapsed: Duration, total: Duration) -> f32 {
    if total.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f32() / total.as_secs_f32()).min(1.0)
}

/// Intensities of one laugh frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaughPose {
    pub smile: f32,
    pub jaw: f32,
    pub eye_squint: f32,
    pub cheek: f32,
    pub brow: f32,
}

impl LaughPose {
    /// Pose `elapsed` into a laugh lasting `duration`
    pub fn at(elapsed: Duration, duration: Duration) -> LaughPose {
        if elapsed < LAUGH_BUILD_END {
            let t = progress(elapsed, LAUGH_BUILD_END);
            LaughPose {
                smile: t * 0.6,
                jaw: t * 0.2,
                eye_squint: t * 0.3,
                cheek: t * 0.4,
                brow: t * 0.2,
            }
        } else if elapsed < LAUGH_PEAK_END {
            let ms = (elapsed - LAUGH_BUILD_END).as_secs_f32() * 1000.0;
            let oscillation = (ms * 0.02).sin() * 0.3 + 0.7;
            let jaw = (ms * 0.025).sin() * 0.4 + 0.6;
            LaughPose {
                smile: oscillation,
                jaw,
                eye_squint: oscillation * 0.8,
                cheek: oscillation * 0.9,
                brow: 0.4,
            }
        } else {
            let fade_len = duration.saturating_sub(LAUGH_PEAK_END);
            let fade = 1.0 - progress(elapsed - LAUGH_PEAK_END, fade_len);
            LaughPose {
                smile: fade * 0.5,
                jaw: fade * 0.1,
                eye_squint: fade * 0.4,
                cheek: fade * 0.5,
                brow: fade * 0.2,
            }
        }
    }

    /// Write the pose over the expression morphs
    pub fn apply(&self, weights: &mut MorphWeights) {
        weights.reset_expression();
        weights.apply(&[
            (Morph::MouthSmileL, self.smile),
            (Morph::MouthSmileR, self.smile),
            (Morph::JawOpen, self.jaw),
            (Morph::EyeSquintL, self.eye_squint),
            (Morph::EyeSquintR, self.eye_squint),
            (Morph::CheekSquintL, self.cheek),
            (Morph::CheekSquintR, self.cheek),
            (Morph::BrowInnerUp, self.brow),
            (Morph::MouthDimpleL, self.smile * 0.5),
            (Morph::MouthDimpleR, self.smile * 0.5),
        ]);
    }
}

#[derive(Debug, Clone)]
struct TimedBehaviour {
    /// When the behaviour last fired or was re-armed
    last: Instant,
    next_delay: Duration,
    /// Start of the running sweep, if any
    active: Option<Instant>,
}

impl TimedBehaviour {
    fn new(now: Instant, next_delay: Duration) -> Self {
        Self {
            last: now,
            next_delay,
            active: None,
        }
    }

    fn due(&self, now: Instant) -> bool {
        self.active.is_none() && now.saturating_duration_since(self.last) > self.next_delay
    }
}

/// Per-face idle animator
#[derive(Debug)]
pub struct IdleAnimator {
    config: IdleConfig,
    rng: StdRng,
    speaking: bool,
    expression: ExpressionId,
    blink: TimedBehaviour,
    brow: TimedBehaviour,
    breathing_phase: f32,
    last_update: Option<Instant>,
    settle_until: Option<Instant>,
    laugh_started: Option<Instant>,
    restarts: u32,
    blink_value: f32,
    brow_value: f32,
}

impl IdleAnimator {
    pub fn new(config: IdleConfig, mut rng: StdRng, expression: ExpressionId, now: Instant) -> Self {
        let blink_delay = config.blink_delay_idle.sample(&mut rng);
        let brow_delay = config.brow_delay.sample(&mut rng);
        Self {
            config,
            rng,
            speaking: false,
            expression,
            blink: TimedBehaviour::new(now, blink_delay),
            brow: TimedBehaviour::new(now, brow_delay),
            breathing_phase: 0.0,
            last_update: None,
            settle_until: None,
            laugh_started: None,
            restarts: 0,
            blink_value: 0.0,
            brow_value: 0.0,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    pub fn expression(&self) -> ExpressionId {
        self.expression
    }

    pub fn is_laughing(&self) -> bool {
        self.laugh_started.is_some()
    }

    /// Number of times the layer was restarted by a speaking flip
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn last_blink_at(&self) -> Instant {
        self.blink.last
    }

    pub fn next_blink_delay(&self) -> Duration {
        self.blink.next_delay
    }

    pub fn last_brow_at(&self) -> Instant {
        self.brow.last
    }

    pub fn next_brow_delay(&self) -> Duration {
        self.brow.next_delay
    }

    pub fn is_blinking(&self) -> bool {
        self.blink.active.is_some()
    }

    pub fn is_moving_brow(&self) -> bool {
        self.brow.active.is_some()
    }

    pub fn is_settling(&self, now: Instant) -> bool {
        self.settle_until.is_some_and(|until| now < until)
    }

    /// Follow the face's speaking flag; a flip restarts the whole layer
    pub fn set_speaking(&mut self, speaking: bool, now: Instant) {
        if speaking == self.speaking {
            return;
        }
        self.speaking = speaking;
        self.restart(now);
        if !speaking {
            self.blink.next_delay = Duration::from_millis(self.config.post_speech_blink_ms);
        }
        log::debug!(
            "Idle layer restarted (speaking: {}, next blink in {:?})",
            speaking,
            self.blink.next_delay
        );
    }

    pub fn set_expression(&mut self, expression: ExpressionId) {
        self.expression = expression;
    }

    /// Start a laugh. Returns false when one is already running.
    pub fn trigger_laugh(&mut self, now: Instant) -> bool {
        if self.laugh_started.is_some() {
            return false;
        }
        log::debug!("Laugh started");
        self.laugh_started = Some(now);
        self.brow.active = None;
        self.brow_value = 0.0;
        true
    }

    fn restart(&mut self, now: Instant) {
        self.restarts += 1;
        self.settle_until = Some(now + Duration::from_millis(self.config.settle_delay_ms));
        let blink_range = if self.speaking {
            self.config.blink_delay_speaking
        } else {
            self.config.blink_delay_idle
        };
        self.blink = TimedBehaviour::new(now, blink_range.sample(&mut self.rng));
        self.brow = TimedBehaviour::new(now, self.config.brow_delay.sample(&mut self.rng));
        self.blink_value = 0.0;
        self.brow_value = 0.0;
    }

    fn end_blink(&mut self, now: Instant) {
        let range = if self.speaking {
            self.config.blink_delay_speaking
        } else {
            self.config.blink_delay_idle
        };
        self.blink.active = None;
        self.blink.last = now;
        self.blink.next_delay = range.sample(&mut self.rng);
        self.blink_value = 0.0;
    }

    fn end_brow(&mut self, now: Instant) {
        if self.brow.active.take().is_some() {
            self.brow.last = now;
            self.brow.next_delay = self.config.brow_delay.sample(&mut self.rng);
        }
        self.brow_value = 0.0;
    }

    /// Step all behaviours to `now`
    pub fn advance(&mut self, now: Instant) {
        let dt = self
            .last_update
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();
        self.last_update = Some(now);

        if let Some(started) = self.laugh_started {
            let duration = Duration::from_millis(self.config.laugh_duration_ms);
            if now.saturating_duration_since(started) >= duration {
                log::debug!("Laugh finished, restoring {}", self.expression);
                self.laugh_started = None;
            }
        }

        if !self.config.enabled {
            return;
        }

        if !self.is_laughing() {
            self.breathing_phase = (self.breathing_phase + self.config.breathing_rate * dt.as_secs_f32())
                % (2.0 * PI);
        }

        if self.is_settling(now) {
            return;
        }
        self.settle_until = None;

        // Blinking carries on during speech
        if self.blink.due(now) {
            self.blink.active = Some(now);
        }
        if let Some(start) = self.blink.active {
            let blink_len = Duration::from_millis(self.config.blink_duration_ms);
            let p = progress(now.saturating_duration_since(start), blink_len);
            if p >= 1.0 {
                self.end_blink(now);
            } else {
                self.blink_value = (ease_in_out(p) * PI).sin();
            }
        }

        let brow_allowed = !self.speaking && !self.is_laughing() && self.expression.is_neutral();
        if brow_allowed && self.brow.due(now) {
            self.brow.active = Some(now);
        }
        if let Some(start) = self.brow.active {
            let brow_len = Duration::from_millis(self.config.brow_duration_ms);
            let p = progress(now.saturating_duration_since(start), brow_len);
            if p >= 1.0 || !brow_allowed {
                self.end_brow(now);
            } else {
                self.brow_value = (p * PI).sin() * self.config.brow_amplitude;
            }
        }
    }

    /// Current eyelid closure (0 open, 1 closed)
    pub fn blink_value(&self) -> f32 {
        self.blink_value
    }

    /// Current breathing offset, `None` while laughing
    pub fn breathing_value(&self) -> Option<f32> {
        if self.is_laughing() || !self.config.enabled {
            return None;
        }
        Some((self.breathing_phase.sin() * self.config.breathing_amplitude).max(0.0))
    }

    pub fn brow_value(&self) -> f32 {
        self.brow_value
    }

    /// Laugh pose at `now`, if a laugh is running
    pub fn laugh_pose(&self, now: Instant) -> Option<LaughPose> {
        self.laugh_started.map(|started| {
            LaughPose::at(
                now.saturating_duration_since(started),
                Duration::from_millis(self.config.laugh_duration_ms),
            )
        })
    }

    /// Compose the non-mouth face: expression (or laugh) plus idle motion
    pub fn compose(&self, now: Instant, weights: &mut MorphWeights) {
        match self.laugh_pose(now) {
            Some(pose) => pose.apply(weights),
            None => {
                weights.reset_expression();
                weights.apply(expression_weights(self.expression));
            }
        }

        weights.set(Morph::EyeBlinkL, self.blink_value);
        weights.set(Morph::EyeBlinkR, self.blink_value);

        if let Some(breath) = self.breathing_value() {
            for nose in [Morph::NoseSneerL, Morph::NoseSneerR] {
                weights.set(nose, weights.get(nose).max(breath));
            }
        }

        if self.brow.active.is_some() {
            weights.set(Morph::BrowInnerUp, self.brow_value);
        }
    }
}
