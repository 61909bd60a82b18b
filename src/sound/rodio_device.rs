//! Rodio-backed audio output
//!
//! The output stream lives on a dedicated thread since rodio's OutputStream
//! is not Send. Loads run on short-lived worker threads that fetch and
//! validate the clip, then report back through a channel the device drains
//! on every poll.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use rodio::{OutputStream, Sink, Source};

use super::device::{
    AudioDevice, AudioHandle, AudioSource, LoadError, LoadStatus, LoadTicket, LoadedAudio,
    PlaybackError, SoundResult,
};
use super::probe;

/// How long to wait for the audio thread to answer a query
const REPLY_TIMEOUT: Duration = Duration::from_millis(250);

/// Commands sent to the audio thread
enum AudioCommand {
    /// Start a clip: (handle, bytes, reply)
    Play(u64, Arc<[u8]>, Sender<SoundResult<()>>),
    Stop(u64),
    /// Check if a clip drained (responds via channel)
    IsFinished(u64, Sender<bool>),
    SetVolume(f32),
    Shutdown,
}

/// What a loader thread needs to resolve a clip
enum LoadRequest {
    Url(String),
    Bytes(Arc<[u8]>),
}

struct LoadOutcome {
    id: u64,
    result: Result<(Arc<[u8]>, Option<Duration>), LoadError>,
}

/// Audio thread main function
fn audio_thread_main(rx: Receiver<AudioCommand>, ready: Sender<Result<(), String>>) {
    let (_stream, stream_handle) = match OutputStream::try_default() {
        Ok(s) => s,
        Err(e) => {
            log::error!("audio thread: failed to open output - {}", e);
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    log::info!("audio thread: output stream opened");

    let mut sinks: HashMap<u64, Sink> = HashMap::new();
    let mut volume = 1.0f32;

    while let Ok(cmd) = rx.recv() {
        match cmd {
            AudioCommand::Play(id, bytes, reply) => {
                let result = Sink::try_new(&stream_handle)
                    .map_err(|e| PlaybackError::Device(e.to_string()))
                    .and_then(|sink| {
                        let source = rodio::Decoder::new(Cursor::new(bytes))
                            .map_err(|e| PlaybackError::Device(e.to_string()))?;
                        sink.set_volume(volume);
                        sink.append(source);
                        Ok(sink)
                    })
                    .map(|sink| {
                        sinks.insert(id, sink);
                    });
                let _ = reply.send(result);
            }
            AudioCommand::Stop(id) => {
                if let Some(sink) = sinks.remove(&id) {
                    sink.stop();
                }
            }
            AudioCommand::IsFinished(id, reply) => {
                let finished = sinks.get(&id).map_or(true, |sink| sink.empty());
                if finished {
                    sinks.remove(&id);
                }
                let _ = reply.send(finished);
            }
            AudioCommand::SetVolume(v) => {
                volume = v.clamp(0.0, 1.0);
                for sink in sinks.values() {
                    sink.set_volume(volume);
                }
            }
            AudioCommand::Shutdown => break,
        }
    }

    for (_, sink) in sinks.drain() {
        sink.stop();
    }
    log::info!("audio thread: exited");
}

/// Fetch the clip bytes behind a URL or path
fn fetch(url: &str) -> Result<Vec<u8>, LoadError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        let response = reqwest::blocking::get(url)
            .and_then(|r| r.error_for_status())
            .map_err(|e| LoadError::Fetch(e.to_string()))?;
        let bytes = response.bytes().map_err(|e| LoadError::Fetch(e.to_string()))?;
        return Ok(bytes.to_vec());
    }

    let path = url.strip_prefix("file://").unwrap_or(url);
    std::fs::read(Path::new(path)).map_err(|e| LoadError::Io(format!("{}: {}", path, e)))
}

/// Fetch and validate a clip, working out its length when possible
fn resolve(request: LoadRequest) -> Result<(Arc<[u8]>, Option<Duration>), LoadError> {
    let bytes: Arc<[u8]> = match request {
        LoadRequest::Bytes(bytes) => bytes,
        LoadRequest::Url(url) => Arc::from(fetch(&url)?),
    };

    let decoder = rodio::Decoder::new(Cursor::new(Arc::clone(&bytes)))
        .map_err(|e| LoadError::Decode(e.to_string()))?;
    let duration = decoder
        .total_duration()
        .or_else(|| probe::probe_wav(&bytes).ok().map(|info| info.duration()));
    Ok((bytes, duration))
}

/// Real audio output
pub struct RodioAudioDevice {
    commands: Sender<AudioCommand>,
    outcomes_tx: Sender<LoadOutcome>,
    outcomes_rx: Receiver<LoadOutcome>,
    thread: Option<JoinHandle<()>>,
    next_id: u64,
    pending: HashSet<u64>,
    cancelled: HashSet<u64>,
    completed: HashMap<u64, Result<(Arc<[u8]>, Option<Duration>), LoadError>>,
    clips: HashMap<u64, Arc<[u8]>>,
    volume: f32,
}

impl RodioAudioDevice {
    /// Open the default output device
    pub fn open(volume: f32) -> Result<Self, LoadError> {
        let (tx, rx) = channel::unbounded();
        let (ready_tx, ready_rx) = channel::bounded(1);
        let thread = thread::Builder::new()
            .name("avatar-audio".to_string())
            .spawn(move || audio_thread_main(rx, ready_tx))
            .map_err(|e| LoadError::Io(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::error!("rodio output unavailable: {}", e);
                let _ = thread.join();
                return Err(LoadError::DeviceUnavailable);
            }
            Err(_) => return Err(LoadError::DeviceUnavailable),
        }

        let (outcomes_tx, outcomes_rx) = channel::unbounded();
        let volume = volume.clamp(0.0, 1.0);
        let _ = tx.send(AudioCommand::SetVolume(volume));
        Ok(Self {
            commands: tx,
            outcomes_tx,
            outcomes_rx,
            thread: Some(thread),
            next_id: 0,
            pending: HashSet::new(),
            cancelled: HashSet::new(),
            completed: HashMap::new(),
            clips: HashMap::new(),
            volume,
        })
    }

    fn drain_outcomes(&mut self) {
        while let Ok(outcome) = self.outcomes_rx.try_recv() {
            self.pending.remove(&outcome.id);
            if self.cancelled.remove(&outcome.id) {
                log::debug!("rodio: discarding cancelled load #{}", outcome.id);
                continue;
            }
            self.completed.insert(outcome.id, outcome.result);
        }
    }
}

impl AudioDevice for RodioAudioDevice {
    fn name(&self) -> &'static str {
        "rodio"
    }

    fn begin_load(&mut self, source: &AudioSource) -> LoadTicket {
        self.next_id += 1;
        let id = self.next_id;
        let request = match source {
            AudioSource::Url(url) => LoadRequest::Url(url.clone()),
            AudioSource::Blob(blob) => LoadRequest::Bytes(blob.bytes()),
        };
        let outcomes = self.outcomes_tx.clone();
        self.pending.insert(id);
        let spawned = thread::Builder::new()
            .name(format!("avatar-load-{}", id))
            .spawn(move || {
                let result = resolve(request);
                let _ = outcomes.send(LoadOutcome { id, result });
            });
        if let Err(e) = spawned {
            self.pending.remove(&id);
            self.completed.insert(id, Err(LoadError::Io(e.to_string())));
        }
        log::debug!("rodio: load #{} from {}", id, source.describe());
        LoadTicket(id)
    }

    fn poll_load(&mut self, ticket: LoadTicket) -> LoadStatus {
        self.drain_outcomes();
        match self.completed.remove(&ticket.0) {
            Some(Ok((bytes, duration))) => {
                self.clips.insert(ticket.0, bytes);
                LoadStatus::Ready(LoadedAudio {
                    handle: AudioHandle(ticket.0),
                    duration,
                })
            }
            Some(Err(e)) => LoadStatus::Failed(e),
            None if self.pending.contains(&ticket.0) => LoadStatus::Pending,
            None => LoadStatus::Failed(LoadError::Io(format!("unknown load ticket {}", ticket.0))),
        }
    }

    fn cancel_load(&mut self, ticket: LoadTicket) {
        self.drain_outcomes();
        if self.pending.contains(&ticket.0) {
            self.cancelled.insert(ticket.0);
        }
        self.completed.remove(&ticket.0);
    }

    fn play(&mut self, handle: AudioHandle) -> SoundResult<()> {
        let bytes = self
            .clips
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| PlaybackError::Device(format!("handle {} not loaded", handle.0)))?;
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.commands
            .send(AudioCommand::Play(handle.0, bytes, reply_tx))
            .map_err(|_| PlaybackError::Device("audio thread gone".to_string()))?;
        reply_rx
            .recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| PlaybackError::Device("audio thread did not answer".to_string()))?
    }

    fn stop(&mut self, handle: AudioHandle) {
        let _ = self.commands.send(AudioCommand::Stop(handle.0));
    }

    fn is_finished(&mut self, handle: AudioHandle) -> bool {
        let (reply_tx, reply_rx) = channel::bounded(1);
        if self
            .commands
            .send(AudioCommand::IsFinished(handle.0, reply_tx))
            .is_err()
        {
            return true;
        }
        reply_rx.recv_timeout(REPLY_TIMEOUT).unwrap_or(false)
    }

    fn release(&mut self, handle: AudioHandle) {
        self.clips.remove(&handle.0);
        let _ = self.commands.send(AudioCommand::Stop(handle.0));
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
        let _ = self.commands.send(AudioCommand::SetVolume(self.volume));
    }
}

impl Drop for RodioAudioDevice {
    fn drop(&mut self) {
        let _ = self.commands.send(AudioCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
