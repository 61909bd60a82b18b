//! WAV header probing
//!
//! Reads just enough of a RIFF WAVE header to work out how long the clip is.
//! Used at ingress when inline audio arrives without an explicit duration.

use std::io::{Cursor, Read, Seek, SeekFrom};
use std::time::Duration;

// WAV format constants (little-endian IDs)
const RIFF_ID: u32 = 0x46464952; // "RIFF"
const WAVE_ID: u32 = 0x45564157; // "WAVE"
const FMT_ID: u32 = 0x20746d66; // "fmt "
const DATA_ID: u32 = 0x61746164; // "data"

const WAVE_FORMAT_PCM: u16 = 1;
const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("not a RIFF/WAVE stream")]
    NotWav,
    #[error("truncated header: {0}")]
    Truncated(String),
    #[error("unsupported WAV encoding: {0}")]
    Unsupported(String),
    #[error("no {0} chunk")]
    MissingChunk(&'static str),
}

type ProbeResult<T> = Result<T, ProbeError>;

/// Format summary of a WAV stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavInfo {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Size of the sample data in bytes
    pub data_len: u32,
}

impl WavInfo {
    /// Playback length derived from the data chunk size
    pub fn duration(&self) -> Duration {
        let frame_bytes = u64::from(self.bits_per_sample / 8) * u64::from(self.channels);
        if frame_bytes == 0 || self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = u64::from(self.data_len) / frame_bytes;
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }
}

fn read_le_u16(cursor: &mut Cursor<&[u8]>) -> ProbeResult<u16> {
    let mut buf = [0u8; 2];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| ProbeError::Truncated(format!("u16: {}", e)))?;
    Ok(u16::from_le_bytes(buf))
}

fn read_le_u32(cursor: &mut Cursor<&[u8]>) -> ProbeResult<u32> {
    let mut buf = [0u8; 4];
    cursor
        .read_exact(&mut buf)
        .map_err(|e| ProbeError::Truncated(format!("u32: {}", e)))?;
    Ok(u32::from_le_bytes(buf))
}

/// Byte count as a RIFF size, pinned at `u32::MAX`
fn saturating_len(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Quick magic check without parsing
pub fn looks_like_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

/// Parse the header of an in-memory WAV stream
pub fn probe_wav(bytes: &[u8]) -> ProbeResult<WavInfo> {
    let mut cursor = Cursor::new(bytes);

    let id = read_le_u32(&mut cursor)?;
    let _size = read_le_u32(&mut cursor)?;
    let format = read_le_u32(&mut cursor)?;
    if id != RIFF_ID || format != WAVE_ID {
        return Err(ProbeError::NotWav);
    }

    let mut fmt: Option<(u16, u32, u16)> = None;
    while (cursor.position() as usize) < bytes.len() {
        let chunk_id = read_le_u32(&mut cursor)?;
        let chunk_size = read_le_u32(&mut cursor)?;

        match chunk_id {
            FMT_ID => {
                if chunk_size < 16 {
                    return Err(ProbeError::Truncated("format chunk".to_string()));
                }
                let encoding = read_le_u16(&mut cursor)?;
                let channels = read_le_u16(&mut cursor)?;
                let sample_rate = read_le_u32(&mut cursor)?;
                let _byte_rate = read_le_u32(&mut cursor)?;
                let _block_align = read_le_u16(&mut cursor)?;
                let bits = read_le_u16(&mut cursor)?;
                if chunk_size > 16 {
                    skip(&mut cursor, u64::from(chunk_size - 16))?;
                }

                if encoding != WAVE_FORMAT_PCM && encoding != WAVE_FORMAT_IEEE_FLOAT {
                    return Err(ProbeError::Unsupported(format!("format tag {}", encoding)));
                }
                if channels == 0 || bits == 0 || bits % 8 != 0 {
                    return Err(ProbeError::Unsupported(format!(
                        "{} channels at {} bits",
                        channels, bits
                    )));
                }
                fmt = Some((channels, sample_rate, bits));
            }
            DATA_ID => {
                let (channels, sample_rate, bits_per_sample) =
                    fmt.ok_or(ProbeError::MissingChunk("fmt"))?;
                // Streaming writers leave the size as a placeholder; trust the buffer.
                let available = saturating_len(bytes.len().saturating_sub(cursor.position() as usize));
                let data_len = if chunk_size == 0 || chunk_size == u32::MAX {
                    available
                } else {
                    chunk_size.min(available)
                };
                return Ok(WavInfo {
                    channels,
                    sample_rate,
                    bits_per_sample,
                    data_len,
                });
            }
            _ => {
                // Chunks are word aligned
                let padded = u64::from(chunk_size) + u64::from(chunk_size & 1);
                skip(&mut cursor, padded)?;
            }
        }
    }

    Err(ProbeError::MissingChunk("data"))
}

fn skip(cursor: &mut Cursor<&[u8]>, len: u64) -> ProbeResult<()> {
    let len = i64::try_from(len).map_err(|_| ProbeError::Truncated("chunk size".to_string()))?;
    cursor
        .seek(SeekFrom::Current(len))
        .map_err(|e| ProbeError::Truncated(format!("skip: {}", e)))?;
    Ok(())
}

/// Build a silent 16-bit mono PCM WAV of the given length
pub fn silent_wav(duration: Duration, sample_rate: u32) -> Vec<u8> {
    let frames = (duration.as_secs_f64() * f64::from(sample_rate)).round() as u32;
    let data_len = frames * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&WAVE_FORMAT_PCM.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(44 + data_len as usize, 0);
    out
}
