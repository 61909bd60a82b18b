//! Playback serializer
//!
//! A FIFO of [`SpeechItem`]s played through a single [`AudioDevice`], never
//! more than one at a time. The serializer holds no timers of its own; the
//! caller drives it with [`PlaybackSerializer::advance`] once per frame and
//! drains the resulting [`PlaybackEvent`]s.

use std::collections::VecDeque;
use std::mem;
use std::time::{Duration, Instant};

use super::event::SpeechItem;
use super::types::{CharacterId, ExpressionId};
use super::viseme::VisemeTimeline;
use crate::sound::device::{
    AudioDevice, AudioHandle, LoadError, LoadStatus, LoadTicket, LoadedAudio, PlaybackError,
};

/// Upper bound on chained transitions in one frame
const MAX_STEPS_PER_ADVANCE: usize = 8;

/// Delays governing queue transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackTimings {
    /// Pause after a clip ends naturally
    pub inter_item_gap: Duration,
    /// Pause after a clip fails to load or start
    pub failure_backoff: Duration,
    /// Pause after an explicit skip
    pub skip_gap: Duration,
    /// Longest a load may stay pending
    pub load_timeout: Duration,
    /// Pause before retrying a rejected play
    pub play_retry_delay: Duration,
    /// Extra play attempts after the first rejection
    pub play_retries: u32,
}

impl Default for PlaybackTimings {
    fn default() -> Self {
        Self {
            inter_item_gap: Duration::from_millis(500),
            failure_backoff: Duration::from_millis(1000),
            skip_gap: Duration::from_millis(200),
            load_timeout: Duration::from_millis(10_000),
            play_retry_delay: Duration::from_millis(100),
            play_retries: 1,
        }
    }
}

/// Coarse serializer state for status displays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializerPhase {
    Idle,
    Loading,
    Playing,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Completed,
    Skipped,
    Cleared,
}

/// Why an item was discarded without playing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackFailure {
    #[error("load failed: {0}")]
    Load(#[from] LoadError),
    #[error("could not start: {0}")]
    Start(#[from] PlaybackError),
}

impl PlaybackFailure {
    /// True when the platform wants a user gesture before playing audio
    pub fn is_blocked(&self) -> bool {
        matches!(self, PlaybackFailure::Start(e) if e.is_blocked())
    }
}

/// Snapshot of a session published when it starts
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub item_id: u64,
    pub character: CharacterId,
    pub text: String,
    pub expression: ExpressionId,
    pub timeline: Option<VisemeTimeline>,
    /// Explicit, probed or decoded duration, whichever was known first
    pub duration: Option<Duration>,
    pub started_at: Instant,
}

/// Lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started(SessionInfo),
    Ended {
        item_id: u64,
        character: CharacterId,
        reason: EndReason,
    },
    Failed {
        item_id: u64,
        character: CharacterId,
        error: PlaybackFailure,
    },
    /// An item still loading was abandoned by skip or clear
    Cancelled { item_id: u64, character: CharacterId },
}

/// The active session: the only item allowed to be audible
#[derive(Debug)]
pub struct PlaybackSession {
    item: SpeechItem,
    handle: AudioHandle,
    started_at: Instant,
    duration: Option<Duration>,
}

impl PlaybackSession {
    pub fn item(&self) -> &SpeechItem {
        &self.item
    }

    pub fn character(&self) -> CharacterId {
        self.item.character
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            item_id: self.item.id,
            character: self.item.character,
            text: self.item.text.clone(),
            expression: self.item.expression,
            timeline: self.item.timeline.clone(),
            duration: self.duration,
            started_at: self.started_at,
        }
    }
}

#[derive(Debug)]
enum LoadPhase {
    Resolving(LoadTicket),
    RetryPlay {
        loaded: LoadedAudio,
        at: Instant,
        attempts: u32,
    },
}

#[derive(Debug)]
struct LoadingItem {
    item: SpeechItem,
    phase: LoadPhase,
    deadline: Instant,
}

#[derive(Debug)]
enum SerializerState {
    Idle { resume_at: Option<Instant> },
    Loading(LoadingItem),
    Playing(PlaybackSession),
}

/// Single-consumer playback queue
pub struct PlaybackSerializer<D: AudioDevice> {
    device: D,
    queue: VecDeque<SpeechItem>,
    state: SerializerState,
    timings: PlaybackTimings,
    events: Vec<PlaybackEvent>,
}

impl<D: AudioDevice> PlaybackSerializer<D> {
    pub fn new(device: D, timings: PlaybackTimings) -> Self {
        log::debug!("Playback serializer using '{}' device", device.name());
        Self {
            device,
            queue: VecDeque::new(),
            state: SerializerState::Idle { resume_at: None },
            timings,
            events: Vec::new(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn timings(&self) -> &PlaybackTimings {
        &self.timings
    }

    /// Items waiting behind the current one
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn phase(&self) -> SerializerPhase {
        match self.state {
            SerializerState::Idle { .. } => SerializerPhase::Idle,
            SerializerState::Loading(_) => SerializerPhase::Loading,
            SerializerState::Playing(_) => SerializerPhase::Playing,
        }
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        match &self.state {
            SerializerState::Playing(session) => Some(session),
            _ => None,
        }
    }

    /// Character whose audio is currently audible
    pub fn current_speaker(&self) -> Option<CharacterId> {
        self.session().map(PlaybackSession::character)
    }

    /// True when nothing is playing, loading or waiting
    pub fn is_drained(&self) -> bool {
        self.queue.is_empty() && matches!(self.state, SerializerState::Idle { .. })
    }

    /// Append an item. Order of arrival is order of presentation.
    pub fn enqueue(&mut self, item: SpeechItem, now: Instant) {
        log::debug!(
            "Queued item #{} for {} ({} waiting)",
            item.id,
            item.character,
            self.queue.len() + 1
        );
        self.queue.push_back(item);
        if matches!(self.state, SerializerState::Idle { .. }) {
            self.advance(now);
        }
    }

    /// Take the events produced since the last call
    pub fn drain_events(&mut self) -> Vec<PlaybackEvent> {
        mem::take(&mut self.events)
    }

    /// Drive the state machine to `now`
    pub fn advance(&mut self, now: Instant) {
        for _ in 0..MAX_STEPS_PER_ADVANCE {
            if !self.step(now) {
                break;
            }
        }
    }

    /// One transition. Returns true when another may follow immediately.
    fn step(&mut self, now: Instant) -> bool {
        match mem::replace(&mut self.state, SerializerState::Idle { resume_at: None }) {
            SerializerState::Idle { resume_at } => {
                let ready = resume_at.map_or(true, |at| now >= at);
                if !ready || self.queue.is_empty() {
                    self.state = SerializerState::Idle { resume_at };
                    return false;
                }
                let Some(item) = self.queue.pop_front() else {
                    return false;
                };
                log::debug!("Loading item #{} for {}", item.id, item.character);
                let ticket = self.device.begin_load(&item.source);
                self.state = SerializerState::Loading(LoadingItem {
                    item,
                    phase: LoadPhase::Resolving(ticket),
                    deadline: now + self.timings.load_timeout,
                });
                true
            }
            SerializerState::Loading(loading) => self.step_loading(loading, now),
            SerializerState::Playing(session) => {
                let reached_duration = session
                    .duration
                    .is_some_and(|duration| session.elapsed(now) >= duration);
                if reached_duration || self.device.is_finished(session.handle) {
                    self.finish(
                        session,
                        EndReason::Completed,
                        Some(now + self.timings.inter_item_gap),
                    );
                    return true;
                }
                self.state = SerializerState::Playing(session);
                false
            }
        }
    }

    fn step_loading(&mut self, loading: LoadingItem, now: Instant) -> bool {
        let LoadingItem {
            item,
            phase,
            deadline,
        } = loading;

        match phase {
            LoadPhase::Resolving(ticket) => match self.device.poll_load(ticket) {
                LoadStatus::Pending if now >= deadline => {
                    self.device.cancel_load(ticket);
                    self.fail(item, LoadError::Timeout.into(), now);
                    false
                }
                LoadStatus::Pending => {
                    self.state = SerializerState::Loading(LoadingItem {
                        item,
                        phase: LoadPhase::Resolving(ticket),
                        deadline,
                    });
                    false
                }
                LoadStatus::Failed(err) => {
                    self.fail(item, err.into(), now);
                    false
                }
                LoadStatus::Ready(loaded) => self.start(item, loaded, 0, deadline, now),
            },
            LoadPhase::RetryPlay {
                loaded,
                at,
                attempts,
            } => {
                if now < at {
                    self.state = SerializerState::Loading(LoadingItem {
                        item,
                        phase: LoadPhase::RetryPlay {
                            loaded,
                            at,
                            attempts,
                        },
                        deadline,
                    });
                    return false;
                }
                self.start(item, loaded, attempts, deadline, now)
            }
        }
    }

    fn start(
        &mut self,
        item: SpeechItem,
        loaded: LoadedAudio,
        attempts: u32,
        deadline: Instant,
        now: Instant,
    ) -> bool {
        match self.device.play(loaded.handle) {
            Ok(()) => {
                let session = PlaybackSession {
                    duration: item.duration.or(loaded.duration),
                    handle: loaded.handle,
                    started_at: now,
                    item,
                };
                log::info!(
                    "Playing item #{} for {} ({})",
                    session.item.id,
                    session.item.character,
                    session
                        .duration
                        .map_or_else(|| "unknown length".to_string(), |d| format!("{:.2}s", d.as_secs_f32()))
                );
                self.events.push(PlaybackEvent::Started(session.info()));
                self.state = SerializerState::Playing(session);
                false
            }
            Err(err) if attempts < self.timings.play_retries => {
                log::warn!(
                    "Play of item #{} rejected ({}), retrying in {:?}",
                    item.id,
                    err,
                    self.timings.play_retry_delay
                );
                self.state = SerializerState::Loading(LoadingItem {
                    item,
                    phase: LoadPhase::RetryPlay {
                        loaded,
                        at: now + self.timings.play_retry_delay,
                        attempts: attempts + 1,
                    },
                    deadline,
                });
                false
            }
            Err(err) => {
                self.device.release(loaded.handle);
                self.fail(item, err.into(), now);
                false
            }
        }
    }

    fn fail(&mut self, item: SpeechItem, error: PlaybackFailure, now: Instant) {
        log::warn!("Discarding item #{} for {}: {}", item.id, item.character, error);
        self.events.push(PlaybackEvent::Failed {
            item_id: item.id,
            character: item.character,
            error,
        });
        self.state = SerializerState::Idle {
            resume_at: Some(now + self.timings.failure_backoff),
        };
        // item dropped here, releasing its blob
    }

    fn finish(&mut self, session: PlaybackSession, reason: EndReason, resume_at: Option<Instant>) {
        self.device.stop(session.handle);
        self.device.release(session.handle);
        log::info!(
            "Item #{} for {} ended ({:?})",
            session.item.id,
            session.item.character,
            reason
        );
        self.events.push(PlaybackEvent::Ended {
            item_id: session.item.id,
            character: session.item.character,
            reason,
        });
        self.state = SerializerState::Idle { resume_at };
    }

    /// Abandon whatever is loading or playing. Returns true if anything was.
    fn abort_active(&mut self, reason: EndReason, resume_at: Option<Instant>) -> bool {
        match mem::replace(&mut self.state, SerializerState::Idle { resume_at }) {
            SerializerState::Playing(session) => {
                self.finish(session, reason, resume_at);
                true
            }
            SerializerState::Loading(loading) => {
                match loading.phase {
                    LoadPhase::Resolving(ticket) => self.device.cancel_load(ticket),
                    LoadPhase::RetryPlay { loaded, .. } => self.device.release(loaded.handle),
                }
                log::info!(
                    "Abandoned loading item #{} for {}",
                    loading.item.id,
                    loading.item.character
                );
                self.events.push(PlaybackEvent::Cancelled {
                    item_id: loading.item.id,
                    character: loading.item.character,
                });
                true
            }
            idle @ SerializerState::Idle { .. } => {
                self.state = idle;
                false
            }
        }
    }

    /// Stop the active item and move on after the skip gap
    pub fn skip(&mut self, now: Instant) -> bool {
        let skipped = self.abort_active(EndReason::Skipped, Some(now + self.timings.skip_gap));
        if !skipped {
            log::debug!("Skip requested with nothing playing");
        }
        skipped
    }

    /// Stop the active item and discard everything queued behind it
    pub fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.abort_active(EndReason::Cleared, None);
        self.queue.clear();
        self.state = SerializerState::Idle { resume_at: None };
        log::info!("Playback cleared ({} queued items discarded)", dropped);
        dropped
    }
}

impl<D: AudioDevice> Drop for PlaybackSerializer<D> {
    fn drop(&mut self) {
        match mem::replace(&mut self.state, SerializerState::Idle { resume_at: None }) {
            SerializerState::Playing(session) => {
                self.device.stop(session.handle);
                self.device.release(session.handle);
            }
            SerializerState::Loading(loading) => match loading.phase {
                LoadPhase::Resolving(ticket) => self.device.cancel_load(ticket),
                LoadPhase::RetryPlay { loaded, .. } => self.device.release(loaded.handle),
            },
            SerializerState::Idle { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sound::device::AudioSource;
    use crate::sound::null::{LoadScript, NullAudioDevice, NullDeviceControl};

    fn item(id: u64, character: CharacterId, secs: u64) -> SpeechItem {
        SpeechItem {
            id,
            character,
            text: format!("line {}", id),
            source: AudioSource::Url(format!("clip-{}", id)),
            timeline: None,
            expression: ExpressionId::Neutral,
            duration: Some(Duration::from_secs(secs)),
        }
    }

    fn serializer() -> (PlaybackSerializer<NullAudioDevice>, NullDeviceControl, Instant) {
        let device = NullAudioDevice::new();
        let control = device.control();
        (
            PlaybackSerializer::new(device, PlaybackTimings::default()),
            control,
            Instant::now(),
        )
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_enqueue_starts_immediately_when_idle() {
        let (mut s, control, t0) = serializer();
        s.enqueue(item(1, CharacterId::Claude, 2), t0);
        assert_eq!(s.phase(), SerializerPhase::Playing);
        assert_eq!(s.current_speaker(), Some(CharacterId::Claude));
        assert_eq!(control.started(), vec!["clip-1".to_string()]);
        let events = s.drain_events();
        assert!(matches!(events.as_slice(), [PlaybackEvent::Started(info)] if info.item_id == 1));
    }

    #[test]
    fn test_natural_end_then_gap() {
        let (mut s, control, t0) = serializer();
        s.enqueue(item(1, CharacterId::Claude, 1), t0);
        s.enqueue(item(2, CharacterId::Gpt, 1), t0);
        assert_eq!(s.queue_len(), 1);

        s.advance(t0 + ms(999));
        assert_eq!(s.current_speaker(), Some(CharacterId::Claude));

        s.advance(t0 + ms(1000));
        assert_eq!(s.phase(), SerializerPhase::Idle);
        assert_eq!(s.current_speaker(), None);
        assert_eq!(control.live_handles(), 0);

        s.advance(t0 + ms(1499));
        assert_eq!(s.phase(), SerializerPhase::Idle);

        s.advance(t0 + ms(1500));
        assert_eq!(s.current_speaker(), Some(CharacterId::Gpt));
        assert_eq!(control.overlap_violations(), 0);
    }

    #[test]
    fn test_device_completion_ends_session_early() {
        let (mut s, control, t0) = serializer();
        s.enqueue(item(1, CharacterId::Grok, 10), t0);
        control.finish_playing();
        s.advance(t0 + ms(16));
        assert_eq!(s.phase(), SerializerPhase::Idle);
        let events = s.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            PlaybackEvent::Ended { reason: EndReason::Completed, .. }
        )));
    }

    #[test]
    fn test_unknown_duration_uses_device_length() {
        let (mut s, _control, t0) = serializer();
        let mut it = item(1, CharacterId::Claude, 0);
        it.duration = None;
        s.enqueue(it, t0);
        assert_eq!(
            s.session().and_then(PlaybackSession::duration),
            Some(crate::sound::null::DEFAULT_CLIP_DURATION)
        );
    }

    #[test]
    fn test_load_failure_backs_off_then_continues() {
        let (mut s, control, t0) = serializer();
        control.push_script(LoadScript::Fail(LoadError::Decode("bad".into())));
        s.enqueue(item(1, CharacterId::Claude, 1), t0);
        s.enqueue(item(2, CharacterId::Gpt, 1), t0);

        assert_eq!(s.phase(), SerializerPhase::Idle);
        let events = s.drain_events();
        assert!(matches!(
            events.as_slice(),
            [PlaybackEvent::Failed { item_id: 1, error: PlaybackFailure::Load(_), .. }]
        ));

        s.advance(t0 + ms(999));
        assert_eq!(s.current_speaker(), None);
        s.advance(t0 + ms(1000));
        assert_eq!(s.current_speaker(), Some(CharacterId::Gpt));
    }

    #[test]
    fn test_load_timeout() {
        let (mut s, control, t0) = serializer();
        control.push_script(LoadScript::Never);
        s.enqueue(item(1, CharacterId::Claude, 1), t0);
        assert_eq!(s.phase(), SerializerPhase::Loading);

        s.advance(t0 + ms(9_999));
        assert_eq!(s.phase(), SerializerPhase::Loading);
        s.advance(t0 + ms(10_000));
        assert_eq!(s.phase(), SerializerPhase::Idle);
        assert_eq!(control.cancelled_loads(), 1);
        let events = s.drain_events();
        assert!(matches!(
            events.as_slice(),
            [PlaybackEvent::Failed { error: PlaybackFailure::Load(LoadError::Timeout), .. }]
        ));
    }

    #[test]
    fn test_play_retry_succeeds() {
        let (mut s, control, t0) = serializer();
        control.push_script(LoadScript::RejectPlay { times: 1 });
        s.enqueue(item(1, CharacterId::Claude, 1), t0);
        assert_eq!(s.phase(), SerializerPhase::Loading);
        s.advance(t0 + ms(100));
        assert_eq!(s.current_speaker(), Some(CharacterId::Claude));
    }

    #[test]
    fn test_blocked_play_is_discarded() {
        let (mut s, control, t0) = serializer();
        control.push_script(LoadScript::Blocked);
        s.enqueue(item(1, CharacterId::Claude, 1), t0);
        s.advance(t0 + ms(100));
        assert_eq!(s.phase(), SerializerPhase::Idle);
        assert_eq!(control.live_handles(), 0);
        let events = s.drain_events();
        match events.as_slice() {
            [PlaybackEvent::Failed { error, .. }] => assert!(error.is_blocked()),
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[test]
    fn test_skip_moves_on_after_gap() {
        let (mut s, control, t0) = serializer();
        s.enqueue(item(1, CharacterId::Claude, 5), t0);
        s.enqueue(item(2, CharacterId::Gpt, 5), t0);

        assert!(s.skip(t0 + ms(50)));
        assert_eq!(s.current_speaker(), None);
        assert_eq!(control.stopped_count(), 1);
        assert_eq!(control.live_handles(), 0);

        s.advance(t0 + ms(249));
        assert_eq!(s.current_speaker(), None);
        s.advance(t0 + ms(250));
        assert_eq!(s.current_speaker(), Some(CharacterId::Gpt));
    }

    #[test]
    fn test_skip_when_idle_is_noop() {
        let (mut s, _control, t0) = serializer();
        assert!(!s.skip(t0));
        assert!(s.drain_events().is_empty());
    }

    #[test]
    fn test_clear_discards_queue() {
        let (mut s, control, t0) = serializer();
        for id in 1..=3 {
            s.enqueue(item(id, CharacterId::Claude, 1), t0);
        }
        assert_eq!(s.clear(), 2);
        assert!(s.is_drained());
        s.advance(t0 + ms(5_000));
        assert_eq!(control.started().len(), 1);
        assert_eq!(control.live_handles(), 0);
    }

    #[test]
    fn test_clear_cancels_inflight_load() {
        let (mut s, control, t0) = serializer();
        control.push_script(LoadScript::Never);
        s.enqueue(item(1, CharacterId::Claude, 1), t0);
        s.clear();
        assert_eq!(control.pending_loads(), 0);
        let events = s.drain_events();
        assert!(matches!(events.as_slice(), [PlaybackEvent::Cancelled { item_id: 1, .. }]));
    }

    #[test]
    fn test_duplicates_queue_independently() {
        let (mut s, control, t0) = serializer();
        s.enqueue(item(1, CharacterId::Grok, 1), t0);
        s.enqueue(item(2, CharacterId::Grok, 1), t0);
        s.advance(t0 + ms(1000));
        s.advance(t0 + ms(1500));
        assert_eq!(control.started(), vec!["clip-1".to_string(), "clip-2".to_string()]);
    }

    #[test]
    fn test_drop_releases_device_handles() {
        let (mut s, control, t0) = serializer();
        s.enqueue(item(1, CharacterId::Claude, 1), t0);
        assert_eq!(control.live_handles(), 1);
        drop(s);
        assert_eq!(control.live_handles(), 0);
    }
}
