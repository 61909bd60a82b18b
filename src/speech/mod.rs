//! Speech presentation
//!
//! Turns inbound speech events into what a renderer draws each frame:
//! which character is talking, their mouth and face morphs, the subtitle
//! being typed out, and the bystander's reaction.
//!
//! # Architecture
//!
//! - [`event`] validates payloads into queue items
//! - [`queue`] plays items one at a time through an [`AudioDevice`]
//! - [`presentation`] projects playback events into per-character state
//! - [`lipsync`], [`idle`], [`subtitle`] and [`observer`] read that state
//! - [`stage`] owns all of the above and runs them once per frame
//!
//! Everything is driven by `advance(now)`; nothing here spawns threads or
//! sleeps.
//!
//! [`AudioDevice`]: crate::sound::AudioDevice

pub mod event;
pub mod idle;
pub mod lipsync;
pub mod morph;
pub mod notice;
pub mod observer;
pub mod presentation;
pub mod queue;
pub mod stage;
pub mod subtitle;
pub mod types;
pub mod viseme;

pub use event::{IngressError, IngressResult, RawSpeechEvent, SpeechIngress, SpeechItem};
pub use idle::{IdleAnimator, LaughPose};
pub use lipsync::{LipSyncSampler, MouthFrame};
pub use morph::{Morph, MorphDictionary, MorphTargets, MorphWeights};
pub use notice::{Notice, NoticeBoard, NoticeLevel};
pub use observer::{ObserverFrame, ObserverMode, ReactiveObserver, SpeakerSignal};
pub use presentation::{CharacterPresentationState, PresentationBoard};
pub use queue::{
    EndReason, PlaybackEvent, PlaybackFailure, PlaybackSerializer, PlaybackTimings, SerializerPhase,
    SessionInfo,
};
pub use stage::{Stage, StageDiagnostics, StageStats};
pub use subtitle::{SubtitleTypewriter, SubtitleView};
pub use types::{CharacterId, ExpressionId};
pub use viseme::{VisemeCue, VisemeSymbol, VisemeTimeline};
