//! Reactive secondary character
//!
//! A bystander that pulses and tints itself according to who is talking and
//! drifts through an ambient loop when the stage is quiet. It only reads the
//! presentation board; its own state is the smoothing history.

use std::time::Instant;

use super::presentation::PresentationBoard;
use super::types::{CharacterId, REFERENCE_FPS};

const REACTIVE_ROTATION: f32 = 1.5;
const IDLE_ROTATION: f32 = 0.8;
/// Rotation per reference frame around x, y and z
const ROTATION_STEP: [f32; 3] = [0.008, 0.012, 0.005];

/// Who, if anyone, is speaking this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpeakerSignal {
    pub anyone_speaking: bool,
    pub current_speaker: Option<CharacterId>,
}

impl SpeakerSignal {
    pub fn from_board(board: &PresentationBoard) -> Self {
        let current_speaker = board.speaker();
        Self {
            anyone_speaking: current_speaker.is_some(),
            current_speaker,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverMode {
    Reactive(Option<CharacterId>),
    Ambient,
}

/// Frame output handed to the renderer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverFrame {
    pub mode: ObserverMode,
    /// Pulse strength, roughly 0..255
    pub frequency: f32,
    pub color: [f32; 3],
    pub rotation: [f32; 3],
}

/// Pulse frequency a speaker drives the observer at
pub fn base_frequency(speaker: Option<CharacterId>) -> f32 {
    match speaker {
        Some(CharacterId::Claude) => 60.0,
        Some(CharacterId::Gpt) => 80.0,
        Some(CharacterId::Grok) => 100.0,
        None => 70.0,
    }
}

fn reactive_color(speaker: Option<CharacterId>, intensity: f32) -> [f32; 3] {
    match speaker {
        Some(CharacterId::Claude) => [0.8 + intensity * 0.2, 0.4 + intensity * 0.4, 0.2 + intensity * 0.6],
        Some(CharacterId::Gpt) => [0.2 + intensity * 0.4, 0.8 + intensity * 0.2, 0.6 + intensity * 0.4],
        Some(CharacterId::Grok) => [0.9 + intensity * 0.1, 0.7 + intensity * 0.3, 0.2 + intensity * 0.6],
        None => [0.5 + intensity * 0.5, 0.8 + intensity * 0.2, 0.6 + intensity * 0.4],
    }
}

/// Unsmoothed target for time `t` seconds
fn target(signal: SpeakerSignal, t: f32) -> (ObserverMode, f32, [f32; 3]) {
    if signal.anyone_speaking {
        let frequency = base_frequency(signal.current_speaker) + (t * 4.0).sin() * 30.0;
        let color = reactive_color(signal.current_speaker, frequency / 255.0);
        (ObserverMode::Reactive(signal.current_speaker), frequency, color)
    } else {
        let frequency = 20.0 + (t * 0.5).sin() * 15.0;
        let color = [
            0.3 + (t * 0.2).sin() * 0.1,
            0.8 + (t * 0.3).sin() * 0.1,
            1.0 + (t * 0.4).sin() * 0.05,
        ];
        (ObserverMode::Ambient, frequency, color)
    }
}

/// Share of the remaining distance covered after `frames` reference frames
fn blend_factor(smoothing: f32, frames: f32) -> f32 {
    1.0 - (1.0 - smoothing).powf(frames)
}

#[derive(Debug, Clone)]
pub struct ReactiveObserver {
    smoothing: f32,
    epoch: Instant,
    last: Option<Instant>,
    frame: ObserverFrame,
}

impl ReactiveObserver {
    pub fn new(smoothing: f32, now: Instant) -> Self {
        Self {
            smoothing: smoothing.clamp(0.0, 1.0),
            epoch: now,
            last: None,
            frame: ObserverFrame {
                mode: ObserverMode::Ambient,
                frequency: 0.0,
                color: [0.0; 3],
                rotation: [0.0; 3],
            },
        }
    }

    pub fn frame(&self) -> &ObserverFrame {
        &self.frame
    }

    pub fn advance(&mut self, signal: SpeakerSignal, now: Instant) -> &ObserverFrame {
        let t = now.saturating_duration_since(self.epoch).as_secs_f32();
        let (mode, frequency, color) = target(signal, t);

        // Frames elapsed at the reference rate; the first frame snaps
        let (blend, frames) = match self.last {
            None => (1.0, 1.0),
            Some(last) => {
                let frames = now.saturating_duration_since(last).as_secs_f32() * REFERENCE_FPS;
                (blend_factor(self.smoothing, frames), frames)
            }
        };
        self.last = Some(now);

        let f = &mut self.frame;
        f.mode = mode;
        f.frequency += (frequency - f.frequency) * blend;
        for (current, goal) in f.color.iter_mut().zip(color) {
            *current += (goal - *current) * blend;
        }
        let speed = match mode {
            ObserverMode::Reactive(_) => REACTIVE_ROTATION,
            ObserverMode::Ambient => IDLE_ROTATION,
        };
        for (angle, step) in f.rotation.iter_mut().zip(ROTATION_STEP) {
            *angle = (*angle + step * speed * frames) % std::f32::consts::TAU;
        }
        &self.frame
    }
}
