//! Audio output for speech playback
//!
//! # Architecture
//!
//! - `AudioDevice` trait: two-phase load, then play/stop/release by handle
//! - `TransientAudioRegistry` tracks decoded inline audio so leaks show up
//! - `probe` reads WAV headers for clip durations
//! - `null` is a silent, scriptable device used by tests and `--sound none`
//! - `rodio_device` plays through rodio on a dedicated audio thread
//!   (feature `rodio-output`)

pub mod device;
pub mod null;
pub mod probe;
pub mod resources;
#[cfg(feature = "rodio-output")]
pub mod rodio_device;

pub use device::{
    AudioDevice, AudioHandle, AudioSource, LoadError, LoadStatus, LoadTicket, LoadedAudio, PlaybackError,
    SoundResult,
};
pub use null::{LoadScript, NullAudioDevice, NullDeviceControl};
pub use probe::{probe_wav, ProbeError, WavInfo};
pub use resources::{BlobHandle, TransientAudioRegistry};
#[cfg(feature = "rodio-output")]
pub use rodio_device::RodioAudioDevice;
