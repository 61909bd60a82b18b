//! Stage: the per-frame composition root
//!
//! Owns the playback serializer and every consumer of its lifecycle events.
//! The host calls [`Stage::advance`] once per rendered frame; speech arrives
//! through [`Stage::ingest`] or [`Stage::handle_message`].

use std::collections::BTreeMap;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::event::{IngressResult, RawSpeechEvent, SpeechIngress};
use super::idle::IdleAnimator;
use super::lipsync::LipSyncSampler;
use super::morph::{apply_to_targets, MorphTargets, MorphWeights, MOUTH_MORPHS};
use super::notice::{NoticeBoard, NoticeLevel};
use super::observer::{ObserverFrame, ReactiveObserver, SpeakerSignal};
use super::presentation::{CharacterPresentationState, PresentationBoard};
use super::queue::{EndReason, PlaybackEvent, PlaybackSerializer, SerializerPhase};
use super::subtitle::{SubtitleTypewriter, SubtitleView};
use super::types::{CharacterId, ExpressionId};
use super::viseme::VisemeSymbol;
use crate::config::StageConfig;
use crate::sound::device::AudioDevice;
use crate::sound::resources::TransientAudioRegistry;
use crate::transport::protocol::{InboundKind, InboundMessage};

/// Running totals, for status displays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    pub ingested: u64,
    pub rejected: u64,
    pub started: u64,
    pub completed: u64,
    pub skipped: u64,
    pub cleared: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// Snapshot for status lines and debugging
#[derive(Debug, Clone, PartialEq)]
pub struct StageDiagnostics {
    pub phase: SerializerPhase,
    pub queue_len: usize,
    pub current_speaker: Option<CharacterId>,
    pub audio_unlock_required: bool,
    pub live_blobs: usize,
    pub laughing: Vec<CharacterId>,
    pub stats: StageStats,
}

pub struct Stage<D: AudioDevice> {
    ingress: SpeechIngress,
    serializer: PlaybackSerializer<D>,
    board: PresentationBoard,
    lipsync: LipSyncSampler,
    idle: BTreeMap<CharacterId, IdleAnimator>,
    subtitle: SubtitleTypewriter,
    observer: ReactiveObserver,
    notices: NoticeBoard,
    faces: BTreeMap<CharacterId, MorphWeights>,
    mouth_symbol: Option<VisemeSymbol>,
    audio_unlock_required: bool,
    stats: StageStats,
}

impl<D: AudioDevice> Stage<D> {
    pub fn new(config: &StageConfig, device: D, now: Instant) -> Self {
        Self::with_registry(config, device, TransientAudioRegistry::new(), now)
    }

    /// Build a stage whose inline audio is tracked by `registry`
    pub fn with_registry(
        config: &StageConfig,
        device: D,
        registry: TransientAudioRegistry,
        now: Instant,
    ) -> Self {
        let characters = &config.characters;
        let board = PresentationBoard::new(|c| characters.expression_for(c));

        let idle = CharacterId::ALL
            .iter()
            .enumerate()
            .map(|(index, &c)| {
                let rng = match config.seed {
                    Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
                    None => StdRng::from_entropy(),
                };
                let animator = IdleAnimator::new(config.idle.clone(), rng, characters.expression_for(c), now);
                (c, animator)
            })
            .collect();

        let mut stage = Self {
            ingress: SpeechIngress::new(registry),
            serializer: PlaybackSerializer::new(device, config.playback.timings()),
            board,
            lipsync: LipSyncSampler::new(config.lipsync.fallback_timeline),
            idle,
            subtitle: SubtitleTypewriter::new(config.subtitle.active().clone(), config.subtitle.enabled),
            observer: ReactiveObserver::new(config.observer.smoothing, now),
            notices: NoticeBoard::default(),
            faces: BTreeMap::new(),
            mouth_symbol: None,
            audio_unlock_required: false,
            stats: StageStats::default(),
        };
        stage.compose_faces(now);
        stage
    }

    /// Validate a speech payload and queue it. Rejected payloads never reach
    /// the queue.
    pub fn ingest(&mut self, raw: RawSpeechEvent, now: Instant) -> IngressResult<u64> {
        match self.ingress.normalize(raw) {
            Ok(item) => {
                let id = item.id;
                log::info!("Accepted item #{} for {}: {:?}", id, item.character, item.text);
                self.stats.ingested += 1;
                self.serializer.enqueue(item, now);
                self.process_events(now);
                Ok(id)
            }
            Err(err) => {
                log::warn!("Dropped speech event: {}", err);
                self.stats.rejected += 1;
                self.notices
                    .post(NoticeLevel::Warning, format!("Dropped speech event: {}", err), now);
                Err(err)
            }
        }
    }

    /// Route one inbound transport message. Returns the queued item id, if any.
    pub fn handle_message(&mut self, message: InboundMessage, now: Instant) -> Option<u64> {
        match message.kind {
            InboundKind::NewMessage => match message.data.message {
                Some(raw) => self.ingest(raw, now).ok(),
                None => {
                    log::debug!("new_message without payload ignored");
                    None
                }
            },
            InboundKind::Error => {
                let text = message
                    .data
                    .error
                    .unwrap_or_else(|| "server reported an error".to_string());
                log::warn!("Server error: {}", text);
                self.notices.post(NoticeLevel::Error, text, now);
                None
            }
            other => {
                log::debug!("Ignoring {:?} message", other);
                None
            }
        }
    }

    /// Stop the current item; the next one starts after the skip gap
    pub fn skip(&mut self, now: Instant) -> bool {
        let skipped = self.serializer.skip(now);
        self.process_events(now);
        skipped
    }

    /// Stop the current item and drop everything queued
    pub fn clear(&mut self, now: Instant) -> usize {
        let dropped = self.serializer.clear();
        self.process_events(now);
        dropped
    }

    pub fn trigger_laugh(&mut self, character: CharacterId, now: Instant) -> bool {
        self.idle
            .get_mut(&character)
            .is_some_and(|animator| animator.trigger_laugh(now))
    }

    /// Acknowledge the user gesture that lets audio start again
    pub fn unlock_audio(&mut self, now: Instant) {
        if self.audio_unlock_required {
            log::info!("Audio unlocked by user gesture");
            self.audio_unlock_required = false;
            self.notices.post(NoticeLevel::Info, "Audio enabled", now);
        }
    }

    /// Post a message to the notice board on behalf of the host
    pub fn notify(&mut self, level: NoticeLevel, message: impl Into<String>, now: Instant) {
        self.notices.post(level, message, now);
    }

    /// Run one frame
    pub fn advance(&mut self, now: Instant) {
        self.serializer.advance(now);
        self.process_events(now);

        for animator in self.idle.values_mut() {
            animator.advance(now);
        }
        self.subtitle.advance(now);
        self.observer.advance(SpeakerSignal::from_board(&self.board), now);
        self.compose_faces(now);
    }

    fn process_events(&mut self, now: Instant) {
        for event in self.serializer.drain_events() {
            self.board.project(&event);
            match &event {
                PlaybackEvent::Started(info) => {
                    self.stats.started += 1;
                    self.lipsync.start(info);
                    self.subtitle.begin(info, info.started_at);
                    for (&character, animator) in self.idle.iter_mut() {
                        if character == info.character {
                            animator.set_expression(info.expression);
                        }
                        animator.set_speaking(character == info.character, now);
                    }
                }
                PlaybackEvent::Ended {
                    item_id,
                    character,
                    reason,
                } => {
                    match reason {
                        EndReason::Completed => self.stats.completed += 1,
                        EndReason::Skipped => self.stats.skipped += 1,
                        EndReason::Cleared => self.stats.cleared += 1,
                    }
                    self.lipsync.stop(*item_id);
                    self.mouth_symbol = None;
                    if let Some(animator) = self.idle.get_mut(character) {
                        animator.set_speaking(false, now);
                    }
                    if self.board.speaker().is_none() {
                        self.subtitle.end(now);
                    }
                }
                PlaybackEvent::Failed {
                    item_id,
                    character,
                    error,
                } => {
                    self.stats.failed += 1;
                    if error.is_blocked() {
                        self.audio_unlock_required = true;
                        self.notices.post(
                            NoticeLevel::Warning,
                            "Audio playback is blocked; interact with the page to enable sound",
                            now,
                        );
                    } else {
                        self.notices.post(
                            NoticeLevel::Error,
                            format!("{} could not speak (item #{}): {}", character.display_name(), item_id, error),
                            now,
                        );
                    }
                }
                PlaybackEvent::Cancelled { item_id, character } => {
                    self.stats.cancelled += 1;
                    log::debug!("Item #{} for {} cancelled before playing", item_id, character);
                }
            }
        }
    }

    /// Rebuild every face from scratch: idle layer first, then the mouth
    fn compose_faces(&mut self, now: Instant) {
        let mouth = self.lipsync.sample(now);
        self.mouth_symbol = mouth.as_ref().and_then(|m| m.symbol);

        for (&character, animator) in &self.idle {
            let mut weights = MorphWeights::new();
            animator.compose(now, &mut weights);
            match &mouth {
                Some(frame) if frame.character == character && !animator.is_laughing() => {
                    for morph in MOUTH_MORPHS {
                        weights.set(morph, frame.weights.get(morph));
                    }
                }
                _ if !animator.is_laughing() => weights.reset_mouth(),
                _ => {}
            }
            self.faces.insert(character, weights);
        }
    }

    pub fn presentation(&self) -> &PresentationBoard {
        &self.board
    }

    pub fn character_state(&self, character: CharacterId) -> Option<&CharacterPresentationState> {
        self.board.get(character)
    }

    pub fn expression(&self, character: CharacterId) -> Option<ExpressionId> {
        self.idle.get(&character).map(IdleAnimator::expression)
    }

    pub fn subtitle(&self) -> Option<SubtitleView> {
        self.subtitle.view()
    }

    pub fn observer(&self) -> &ObserverFrame {
        self.observer.frame()
    }

    pub fn queue_len(&self) -> usize {
        self.serializer.queue_len()
    }

    pub fn current_speaker(&self) -> Option<CharacterId> {
        self.serializer.current_speaker()
    }

    pub fn phase(&self) -> SerializerPhase {
        self.serializer.phase()
    }

    pub fn is_drained(&self) -> bool {
        self.serializer.is_drained()
    }

    pub fn audio_unlock_required(&self) -> bool {
        self.audio_unlock_required
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn registry(&self) -> &TransientAudioRegistry {
        self.ingress.registry()
    }

    pub fn device(&self) -> &D {
        self.serializer.device()
    }

    pub fn device_mut(&mut self) -> &mut D {
        self.serializer.device_mut()
    }

    pub fn idle(&self, character: CharacterId) -> Option<&IdleAnimator> {
        self.idle.get(&character)
    }

    /// Viseme currently on the speaker's mouth
    pub fn mouth_symbol(&self) -> Option<VisemeSymbol> {
        self.mouth_symbol
    }

    /// Morph weights composed on the last frame
    pub fn face(&self, character: CharacterId) -> Option<&MorphWeights> {
        self.faces.get(&character)
    }

    /// Write a character's face into a mesh's morph targets. Returns how many
    /// morphs the mesh resolved.
    pub fn apply_face<T: MorphTargets + ?Sized>(&self, character: CharacterId, targets: &mut T) -> usize {
        self.faces
            .get(&character)
            .map_or(0, |weights| apply_to_targets(weights, targets))
    }

    pub fn diagnostics(&self) -> StageDiagnostics {
        StageDiagnostics {
            phase: self.serializer.phase(),
            queue_len: self.serializer.queue_len(),
            current_speaker: self.serializer.current_speaker(),
            audio_unlock_required: self.audio_unlock_required,
            live_blobs: self.ingress.registry().live_count(),
            laughing: self
                .idle
                .iter()
                .filter(|(_, a)| a.is_laughing())
                .map(|(&c, _)| c)
                .collect(),
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::device::LoadError;
    use crate::sound::null::{LoadScript, NullAudioDevice, NullDeviceControl};
    use crate::speech::event::{RawLipSync, RawLipSyncMetadata, RawMouthCue};
    use crate::speech::morph::{Morph, MorphDictionary};
    use crate::transport::protocol::InboundData;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn config() -> StageConfig {
        StageConfig {
            seed: Some(7),
            ..StageConfig::default()
        }
    }

    fn stage(t0: Instant) -> (Stage<NullAudioDevice>, NullDeviceControl) {
        let device = NullAudioDevice::new();
        let control = device.control();
        (Stage::new(&config(), device, t0), control)
    }

    fn speech(character: &str, text: &str, seconds: f64) -> RawSpeechEvent {
        RawSpeechEvent {
            character_id: Some(character.to_string()),
            text: text.to_string(),
            audio_url: Some(format!("https://cdn.example/{}.mp3", character)),
            facial_expression: Some("smile".to_string()),
            duration: Some(seconds),
            ..Default::default()
        }
    }

    #[test]
    fn test_start_drives_every_consumer() {
        let t0 = Instant::now();
        let (mut stage, _control) = stage(t0);
        let mut raw = speech("claude", "hello there", 2.0);
        raw.lip_sync = Some(RawLipSync {
            metadata: RawLipSyncMetadata { duration: Some(2.0) },
            mouth_cues: vec![RawMouthCue {
                start: 0.0,
                end: 1.0,
                value: "A".to_string(),
            }],
        });
        stage.ingest(raw, t0).unwrap();

        assert_eq!(stage.current_speaker(), Some(CharacterId::Claude));
        assert!(stage.character_state(CharacterId::Claude).unwrap().is_speaking);
        assert_eq!(stage.expression(CharacterId::Claude), Some(ExpressionId::Smile));

        stage.advance(t0 + ms(500));
        assert_eq!(stage.mouth_symbol(), Some(VisemeSymbol::A));
        let face = stage.face(CharacterId::Claude).unwrap();
        assert_eq!(face.get(Morph::JawOpen), 0.3);
        assert_eq!(face.get(Morph::MouthSmileL), 0.7);
        assert!(stage.face(CharacterId::Gpt).unwrap().mouth_is_closed());
        assert!(stage.subtitle().is_some());
    }

    #[test]
    fn test_end_closes_mouth_and_clears_subtitle() {
        let t0 = Instant::now();
        let (mut stage, _control) = stage(t0);
        stage.ingest(speech("grok", "short", 1.0), t0).unwrap();
        stage.advance(t0 + ms(300));
        stage.advance(t0 + ms(1000));

        assert_eq!(stage.current_speaker(), None);
        assert!(stage.presentation().speaker().is_none());
        assert!(stage.face(CharacterId::Grok).unwrap().mouth_is_closed());
        assert!(stage.subtitle().is_none());
        assert_eq!(stage.expression(CharacterId::Grok), Some(ExpressionId::Smile));
        assert_eq!(stage.diagnostics().stats.completed, 1);
    }

    #[test]
    fn test_rejected_payload_posts_notice() {
        let t0 = Instant::now();
        let (mut stage, control) = stage(t0);
        let err = stage.ingest(speech("bard", "hi", 1.0), t0).unwrap_err();
        assert_eq!(err, crate::speech::event::IngressError::UnknownCharacter("bard".into()));
        assert_eq!(stage.queue_len(), 0);
        assert!(control.loads().is_empty());
        assert_eq!(stage.notices().len(), 1);
        assert_eq!(stage.diagnostics().stats.rejected, 1);
    }

    #[test]
    fn test_blocked_play_requires_unlock() {
        let t0 = Instant::now();
        let (mut stage, control) = stage(t0);
        control.push_script(LoadScript::Blocked);
        stage.ingest(speech("gpt", "hi", 1.0), t0).unwrap();
        stage.advance(t0 + ms(100));
        stage.advance(t0 + ms(200));
        assert!(stage.audio_unlock_required());
        assert!(stage.notices().latest().unwrap().message.contains("blocked"));

        stage.unlock_audio(t0 + ms(300));
        assert!(!stage.audio_unlock_required());
    }

    #[test]
    fn test_load_failure_notice_and_recovery() {
        let t0 = Instant::now();
        let (mut stage, control) = stage(t0);
        control.push_script(LoadScript::Fail(LoadError::Decode("bad header".into())));
        stage.ingest(speech("claude", "broken", 1.0), t0).unwrap();
        stage.ingest(speech("gpt", "works", 1.0), t0).unwrap();
        stage.advance(t0 + ms(10));
        assert!(stage.notices().latest().unwrap().message.contains("bad header"));
        assert!(!stage.audio_unlock_required());

        stage.advance(t0 + ms(1010));
        assert_eq!(stage.current_speaker(), Some(CharacterId::Gpt));
    }

    #[test]
    fn test_laugh_suppresses_lipsync() {
        let t0 = Instant::now();
        let (mut stage, _control) = stage(t0);
        stage.ingest(speech("claude", "ha", 2.0), t0).unwrap();
        assert!(stage.trigger_laugh(CharacterId::Claude, t0));
        stage.advance(t0 + ms(1100));
        let face = stage.face(CharacterId::Claude).unwrap();
        assert!(face.get(Morph::MouthSmileL) > 0.0);
        assert!(face.get(Morph::JawOpen) > 0.0);
        assert_eq!(stage.diagnostics().laughing, vec![CharacterId::Claude]);
    }

    #[test]
    fn test_skip_and_clear() {
        let t0 = Instant::now();
        let (mut stage, control) = stage(t0);
        for c in ["claude", "gpt", "grok"] {
            stage.ingest(speech(c, "line", 5.0), t0).unwrap();
        }
        assert!(stage.skip(t0 + ms(100)));
        assert_eq!(stage.current_speaker(), None);
        stage.advance(t0 + ms(300));
        assert_eq!(stage.current_speaker(), Some(CharacterId::Gpt));

        assert_eq!(stage.clear(t0 + ms(400)), 1);
        stage.advance(t0 + ms(5000));
        assert_eq!(stage.current_speaker(), None);
        assert_eq!(control.live_handles(), 0);
        let stats = stage.diagnostics().stats;
        assert_eq!((stats.skipped, stats.cleared), (1, 1));
    }

    #[test]
    fn test_handle_message_routes_payloads() {
        let t0 = Instant::now();
        let (mut stage, _control) = stage(t0);
        let message = InboundMessage {
            kind: InboundKind::NewMessage,
            session_id: Some("s".into()),
            data: InboundData {
                message: Some(speech("gpt", "hey", 1.0)),
                error: None,
            },
            timestamp: None,
        };
        assert_eq!(stage.handle_message(message, t0), Some(1));

        let error = InboundMessage {
            kind: InboundKind::Error,
            session_id: None,
            data: InboundData {
                message: None,
                error: Some("backend down".into()),
            },
            timestamp: None,
        };
        assert_eq!(stage.handle_message(error, t0), None);
        assert_eq!(stage.notices().latest().unwrap().message, "backend down");
    }

    #[test]
    fn test_apply_face_to_partial_mesh() {
        let t0 = Instant::now();
        let (mut stage, _control) = stage(t0);
        stage.ingest(speech("claude", "x", 2.0), t0).unwrap();
        stage.advance(t0 + ms(200));
        let mut mesh = MorphDictionary::from_names(["jawOpen", "mouthSmile_L", "notAMorph"]);
        assert_eq!(stage.apply_face(CharacterId::Claude, &mut mesh), 2);
        assert_eq!(mesh.influence("jawOpen"), Some(0.3));
    }

    #[test]
    fn test_device_rejection_is_not_blocked() {
        let t0 = Instant::now();
        let (mut stage, control) = stage(t0);
        control.push_script(LoadScript::RejectPlay { times: 5 });
        stage.ingest(speech("grok", "x", 1.0), t0).unwrap();
        stage.advance(t0 + ms(100));
        stage.advance(t0 + ms(200));
        assert!(!stage.audio_unlock_required());
        assert_eq!(stage.diagnostics().stats.failed, 1);
    }
}
