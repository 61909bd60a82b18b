//! Audio output device abstraction
//!
//! The playback serializer owns exactly one device and is its only caller.
//! Loading is two-phase: [`AudioDevice::begin_load`] hands back a ticket that
//! is polled once per frame until the clip is ready or has failed.

use std::time::Duration;

use super::resources::BlobHandle;

/// Errors raised while resolving a clip into something playable
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("audio did not become ready in time")]
    Timeout,
    #[error("decode error: {0}")]
    Decode(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("unsupported audio: {0}")]
    Unsupported(String),
    #[error("audio device unavailable")]
    DeviceUnavailable,
}

/// Errors raised when starting playback of a loaded clip
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    /// Platform refused autonomous playback (needs a user gesture)
    #[error("playback blocked: {0}")]
    Blocked(String),
    #[error("device error: {0}")]
    Device(String),
}

impl PlaybackError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, PlaybackError::Blocked(_))
    }
}

/// Result type for sound operations
pub type SoundResult<T> = Result<T, PlaybackError>;

/// Where a clip's bytes come from
#[derive(Debug)]
pub enum AudioSource {
    /// Fetchable reference
    Url(String),
    /// Inline bytes, tracked until the owning item retires
    Blob(BlobHandle),
}

impl AudioSource {
    pub fn describe(&self) -> String {
        match self {
            AudioSource::Url(url) => url.clone(),
            AudioSource::Blob(blob) => format!("blob#{} ({} bytes)", blob.id(), blob.len()),
        }
    }
}

/// Pending load issued by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadTicket(pub u64);

/// A loaded, playable clip owned by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioHandle(pub u64);

/// Clip that finished loading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedAudio {
    pub handle: AudioHandle,
    /// Decoded length, when the device could determine it
    pub duration: Option<Duration>,
}

/// Progress of a load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Pending,
    Ready(LoadedAudio),
    Failed(LoadError),
}

/// Singleton audio output.
///
/// Every handle returned through [`LoadStatus::Ready`] must eventually be
/// passed to [`release`](AudioDevice::release).
pub trait AudioDevice {
    /// Device name for logs
    fn name(&self) -> &'static str;

    /// Start resolving a clip
    fn begin_load(&mut self, source: &AudioSource) -> LoadTicket;

    /// Check on a load started with `begin_load`
    fn poll_load(&mut self, ticket: LoadTicket) -> LoadStatus;

    /// Abandon a load. A clip that resolves later is discarded by the device.
    fn cancel_load(&mut self, ticket: LoadTicket);

    /// Start playback of a loaded clip
    fn play(&mut self, handle: AudioHandle) -> SoundResult<()>;

    /// Stop playback immediately
    fn stop(&mut self, handle: AudioHandle);

    /// True once the clip has played to its end
    fn is_finished(&mut self, handle: AudioHandle) -> bool;

    /// Free the decoded clip
    fn release(&mut self, handle: AudioHandle);

    /// Output volume (0.0 - 1.0)
    fn set_volume(&mut self, _volume: f32) {}
}

impl<D: AudioDevice + ?Sized> AudioDevice for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn begin_load(&mut self, source: &AudioSource) -> LoadTicket {
        (**self).begin_load(source)
    }

    fn poll_load(&mut self, ticket: LoadTicket) -> LoadStatus {
        (**self).poll_load(ticket)
    }

    fn cancel_load(&mut self, ticket: LoadTicket) {
        (**self).cancel_load(ticket)
    }

    fn play(&mut self, handle: AudioHandle) -> SoundResult<()> {
        (**self).play(handle)
    }

    fn stop(&mut self, handle: AudioHandle) {
        (**self).stop(handle)
    }

    fn is_finished(&mut self, handle: AudioHandle) -> bool {
        (**self).is_finished(handle)
    }

    fn release(&mut self, handle: AudioHandle) {
        (**self).release(handle)
    }

    fn set_volume(&mut self, volume: f32) {
        (**self).set_volume(volume)
    }
}
