//! Null (silent) audio device
//!
//! Produces no sound but behaves like a real device: loads resolve through
//! tickets, handles must be released, and only one clip may play at a time.
//! Load outcomes can be scripted through a [`NullDeviceControl`], which is
//! how the pipeline tests simulate slow, broken or blocked audio.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::device::{
    AudioDevice, AudioHandle, AudioSource, LoadError, LoadStatus, LoadTicket, LoadedAudio,
    PlaybackError, SoundResult,
};
use super::probe;

/// Length reported for clips whose duration cannot be probed
pub const DEFAULT_CLIP_DURATION: Duration = Duration::from_secs(3);

/// Scripted outcome for one load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadScript {
    /// Ready on first poll. `None` probes inline WAV bytes or falls back to
    /// [`DEFAULT_CLIP_DURATION`].
    Ready { duration: Option<Duration> },
    /// Ready after the given number of pending polls
    Delayed { polls: u32, duration: Option<Duration> },
    /// Fails on first poll
    Fail(LoadError),
    /// Never resolves
    Never,
    /// Loads, then every play attempt is blocked by policy
    Blocked,
    /// Loads, then the first `times` play attempts fail with a device error
    RejectPlay { times: u32 },
}

#[derive(Debug)]
struct PendingLoad {
    script: LoadScript,
    polls: u32,
    probed: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayPolicy {
    Allow,
    Block,
    Reject(u32),
}

#[derive(Debug)]
struct NullState {
    next_id: u64,
    default_script: LoadScript,
    script: VecDeque<LoadScript>,
    pending: HashMap<u64, PendingLoad>,
    policies: HashMap<u64, PlayPolicy>,
    handle_sources: HashMap<u64, String>,
    live: HashSet<u64>,
    playing: HashSet<u64>,
    finished: HashSet<u64>,
    loads: Vec<String>,
    started: Vec<String>,
    stopped: Vec<AudioHandle>,
    cancelled: usize,
    overlap_violations: usize,
    volume: f32,
}

impl Default for NullState {
    fn default() -> Self {
        Self {
            next_id: 0,
            default_script: LoadScript::Ready { duration: None },
            script: VecDeque::new(),
            pending: HashMap::new(),
            policies: HashMap::new(),
            handle_sources: HashMap::new(),
            live: HashSet::new(),
            playing: HashSet::new(),
            finished: HashSet::new(),
            loads: Vec::new(),
            started: Vec::new(),
            stopped: Vec::new(),
            cancelled: 0,
            overlap_violations: 0,
            volume: 1.0,
        }
    }
}

impl NullState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Silent device
#[derive(Debug, Clone, Default)]
pub struct NullAudioDevice {
    state: Arc<Mutex<NullState>>,
}

impl NullAudioDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for scripting and inspecting this device from outside
    pub fn control(&self) -> NullDeviceControl {
        NullDeviceControl {
            state: Arc::clone(&self.state),
        }
    }
}

impl AudioDevice for NullAudioDevice {
    fn name(&self) -> &'static str {
        "null"
    }

    fn begin_load(&mut self, source: &AudioSource) -> LoadTicket {
        let mut state = self.state.lock();
        let id = state.next_id();
        let script = match state.script.pop_front() {
            Some(script) => script,
            None => state.default_script.clone(),
        };
        let probed = match source {
            AudioSource::Blob(blob) => probe::probe_wav(&blob.bytes()).ok().map(|i| i.duration()),
            AudioSource::Url(_) => None,
        };
        let description = source.describe();
        log::debug!("null device: load #{} from {} ({:?})", id, description, script);
        state.loads.push(description.clone());
        state.handle_sources.insert(id, description);
        state.pending.insert(
            id,
            PendingLoad {
                script,
                polls: 0,
                probed,
            },
        );
        LoadTicket(id)
    }

    fn poll_load(&mut self, ticket: LoadTicket) -> LoadStatus {
        let mut state = self.state.lock();
        let (script, polled, probed) = match state.pending.get_mut(&ticket.0) {
            Some(pending) => {
                pending.polls += 1;
                (pending.script.clone(), pending.polls, pending.probed)
            }
            None => {
                return LoadStatus::Failed(LoadError::Io(format!(
                    "unknown load ticket {}",
                    ticket.0
                )));
            }
        };

        let (duration, policy) = match script {
            LoadScript::Never => return LoadStatus::Pending,
            LoadScript::Delayed { polls, .. } if polled <= polls => {
                return LoadStatus::Pending;
            }
            LoadScript::Fail(err) => {
                state.pending.remove(&ticket.0);
                state.handle_sources.remove(&ticket.0);
                return LoadStatus::Failed(err);
            }
            LoadScript::Ready { duration } | LoadScript::Delayed { duration, .. } => {
                (duration, PlayPolicy::Allow)
            }
            LoadScript::Blocked => (None, PlayPolicy::Block),
            LoadScript::RejectPlay { times } => (None, PlayPolicy::Reject(times)),
        };

        state.pending.remove(&ticket.0);
        // The handle reuses the ticket id so sources stay attributable
        let id = ticket.0;
        state.live.insert(id);
        state.policies.insert(id, policy);
        LoadStatus::Ready(LoadedAudio {
            handle: AudioHandle(id),
            duration: Some(duration.or(probed).unwrap_or(DEFAULT_CLIP_DURATION)),
        })
    }

    fn cancel_load(&mut self, ticket: LoadTicket) {
        let mut state = self.state.lock();
        if state.pending.remove(&ticket.0).is_some() {
            state.handle_sources.remove(&ticket.0);
            state.cancelled += 1;
            log::debug!("null device: cancelled load #{}", ticket.0);
        }
    }

    fn play(&mut self, handle: AudioHandle) -> SoundResult<()> {
        let mut state = self.state.lock();
        if !state.live.contains(&handle.0) {
            return Err(PlaybackError::Device(format!("handle {} not loaded", handle.0)));
        }
        match state.policies.get(&handle.0).copied() {
            Some(PlayPolicy::Block) => {
                return Err(PlaybackError::Blocked("no user gesture yet".to_string()));
            }
            Some(PlayPolicy::Reject(remaining)) if remaining > 0 => {
                state.policies.insert(handle.0, PlayPolicy::Reject(remaining - 1));
                return Err(PlaybackError::Device("output busy".to_string()));
            }
            _ => {}
        }

        if state.playing.iter().any(|&other| other != handle.0) {
            log::error!("null device: handle {} started while another clip is playing", handle.0);
            state.overlap_violations += 1;
        }
        state.playing.insert(handle.0);
        let source = state
            .handle_sources
            .get(&handle.0)
            .cloned()
            .unwrap_or_default();
        state.started.push(source);
        Ok(())
    }

    fn stop(&mut self, handle: AudioHandle) {
        let mut state = self.state.lock();
        if state.playing.remove(&handle.0) {
            state.stopped.push(handle);
        }
    }

    fn is_finished(&mut self, handle: AudioHandle) -> bool {
        self.state.lock().finished.contains(&handle.0)
    }

    fn release(&mut self, handle: AudioHandle) {
        let mut state = self.state.lock();
        state.playing.remove(&handle.0);
        state.finished.remove(&handle.0);
        state.policies.remove(&handle.0);
        state.handle_sources.remove(&handle.0);
        state.live.remove(&handle.0);
    }

    fn set_volume(&mut self, volume: f32) {
        self.state.lock().volume = volume.clamp(0.0, 1.0);
    }
}

/// External view of a [`NullAudioDevice`]
#[derive(Debug, Clone)]
pub struct NullDeviceControl {
    state: Arc<Mutex<NullState>>,
}

impl NullDeviceControl {
    /// Queue the outcome of the next load
    pub fn push_script(&self, script: LoadScript) {
        self.state.lock().script.push_back(script);
    }

    /// Outcome used once the script queue is empty
    pub fn set_default_script(&self, script: LoadScript) {
        self.state.lock().default_script = script;
    }

    /// Mark every playing clip as having reached its end
    pub fn finish_playing(&self) {
        let mut state = self.state.lock();
        let playing: Vec<u64> = state.playing.iter().copied().collect();
        state.finished.extend(playing);
    }

    /// Sources in the order loads were requested
    pub fn loads(&self) -> Vec<String> {
        self.state.lock().loads.clone()
    }

    /// Sources in the order playback started
    pub fn started(&self) -> Vec<String> {
        self.state.lock().started.clone()
    }

    pub fn stopped_count(&self) -> usize {
        self.state.lock().stopped.len()
    }

    pub fn playing_count(&self) -> usize {
        self.state.lock().playing.len()
    }

    /// Loaded clips not yet released
    pub fn live_handles(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Loads still in flight
    pub fn pending_loads(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn cancelled_loads(&self) -> usize {
        self.state.lock().cancelled
    }

    /// Times a clip started while another was still audible
    pub fn overlap_violations(&self) -> usize {
        self.state.lock().overlap_violations
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }
}
