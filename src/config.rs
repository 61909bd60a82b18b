use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::speech::queue::PlaybackTimings;
use crate::speech::types::{CharacterId, ExpressionId};

/// Stage options that can be set via CLI or config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Frames per second of the presentation loop
    pub fps: u32,
    /// Seed for blink/brow timing; random when absent
    pub seed: Option<u64>,
    pub audio: AudioConfig,
    pub playback: PlaybackConfig,
    pub idle: IdleConfig,
    pub subtitle: SubtitleConfig,
    pub lipsync: LipSyncConfig,
    pub transport: TransportConfig,
    pub observer: ObserverConfig,
    pub characters: CharactersConfig,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            fps: 60,
            seed: None,
            audio: AudioConfig::default(),
            playback: PlaybackConfig::default(),
            idle: IdleConfig::default(),
            subtitle: SubtitleConfig::default(),
            lipsync: LipSyncConfig::default(),
            transport: TransportConfig::default(),
            observer: ObserverConfig::default(),
            characters: CharactersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundDriver {
    #[default]
    None,
    Rodio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub driver: SoundDriver,
    /// Output volume (0.0 - 1.0)
    pub volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            driver: SoundDriver::None,
            volume: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub inter_item_gap_ms: u64,
    pub failure_backoff_ms: u64,
    pub skip_gap_ms: u64,
    pub load_timeout_ms: u64,
    pub play_retry_delay_ms: u64,
    pub play_retries: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            inter_item_gap_ms: 500,
            failure_backoff_ms: 1000,
            skip_gap_ms: 200,
            load_timeout_ms: 10_000,
            play_retry_delay_ms: 100,
            play_retries: 1,
        }
    }
}

impl PlaybackConfig {
    pub fn timings(&self) -> PlaybackTimings {
        PlaybackTimings {
            inter_item_gap: Duration::from_millis(self.inter_item_gap_ms),
            failure_backoff: Duration::from_millis(self.failure_backoff_ms),
            skip_gap: Duration::from_millis(self.skip_gap_ms),
            load_timeout: Duration::from_millis(self.load_timeout_ms),
            play_retry_delay: Duration::from_millis(self.play_retry_delay_ms),
            play_retries: self.play_retries,
        }
    }
}

/// A fixed delay plus a uniformly random extra
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub base_ms: u64,
    pub jitter_ms: u64,
}

impl DelayRange {
    pub const fn new(base_ms: u64, jitter_ms: u64) -> Self {
        Self { base_ms, jitter_ms }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..=self.jitter_ms)
        };
        Duration::from_millis(self.base_ms + jitter)
    }

    pub fn min(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.base_ms + self.jitter_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    pub enabled: bool,
    pub blink_duration_ms: u64,
    pub blink_delay_idle: DelayRange,
    pub blink_delay_speaking: DelayRange,
    /// First blink after speech ends
    pub post_speech_blink_ms: u64,
    /// Breathing phase speed in radians per second
    pub breathing_rate: f32,
    pub breathing_amplitude: f32,
    pub brow_duration_ms: u64,
    pub brow_delay: DelayRange,
    pub brow_amplitude: f32,
    /// Quiet period after the speaking flag flips
    pub settle_delay_ms: u64,
    pub laugh_duration_ms: u64,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blink_duration_ms: 150,
            blink_delay_idle: DelayRange::new(2000, 4000),
            blink_delay_speaking: DelayRange::new(1500, 2500),
            post_speech_blink_ms: 1000,
            breathing_rate: 0.48,
            breathing_amplitude: 0.02,
            brow_duration_ms: 800,
            brow_delay: DelayRange::new(8000, 7000),
            brow_amplitude: 0.03,
            settle_delay_ms: 100,
            laugh_duration_ms: 3000,
        }
    }
}

/// Which typewriter preset to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleProfile {
    #[default]
    Desktop,
    Mobile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypewriterSettings {
    /// Share of the clip's duration spent revealing text
    pub reveal_fraction: f32,
    pub min_char_delay_ms: u64,
    /// Duration assumed when the clip length is unknown
    pub default_duration_ms: u64,
    /// Keep the finished line up this long after speech ends
    pub linger_ms: Option<u64>,
    /// Truncate displayed text to this many characters
    pub max_display_chars: Option<usize>,
}

impl Default for TypewriterSettings {
    fn default() -> Self {
        Self::desktop()
    }
}

impl TypewriterSettings {
    pub fn desktop() -> Self {
        Self {
            reveal_fraction: 0.8,
            min_char_delay_ms: 30,
            default_duration_ms: 3000,
            linger_ms: None,
            max_display_chars: None,
        }
    }

    pub fn mobile() -> Self {
        Self {
            reveal_fraction: 0.6,
            min_char_delay_ms: 20,
            default_duration_ms: 3000,
            linger_ms: Some(2000),
            max_display_chars: Some(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    pub enabled: bool,
    pub profile: SubtitleProfile,
    pub desktop: TypewriterSettings,
    pub mobile: TypewriterSettings,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            profile: SubtitleProfile::Desktop,
            desktop: TypewriterSettings::desktop(),
            mobile: TypewriterSettings::mobile(),
        }
    }
}

impl SubtitleConfig {
    /// Settings for the selected profile
    pub fn active(&self) -> &TypewriterSettings {
        match self.profile {
            SubtitleProfile::Desktop => &self.desktop,
            SubtitleProfile::Mobile => &self.mobile,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LipSyncConfig {
    /// Animate a stock mouth pattern for speech without a timeline
    pub fallback_timeline: bool,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            fallback_timeline: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub reconnect_delay_ms: u64,
    pub session_id: String,
    /// Periodically ask for a response from a random character
    pub auto_request_interval_ms: Option<u64>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 3000,
            session_id: "demo-session-123".to_string(),
            auto_request_interval_ms: None,
        }
    }
}

impl TransportConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Blend factor per 60 Hz frame toward the target colour
    pub smoothing: f32,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self { smoothing: 0.15 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharactersConfig {
    /// Expression worn before a character first speaks
    pub default_expressions: BTreeMap<CharacterId, ExpressionId>,
}

impl Default for CharactersConfig {
    fn default() -> Self {
        Self {
            default_expressions: CharacterId::ALL
                .iter()
                .map(|&c| (c, c.default_expression()))
                .collect(),
        }
    }
}

impl CharactersConfig {
    pub fn expression_for(&self, character: CharacterId) -> ExpressionId {
        self.default_expressions
            .get(&character)
            .copied()
            .unwrap_or_else(|| character.default_expression())
    }
}

impl StageConfig {
    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.fps == 0 || self.fps > 240 {
            anyhow::bail!("fps must be between 1 and 240 (got {})", self.fps);
        }
        if !(0.0..=1.0).contains(&self.audio.volume) {
            anyhow::bail!("volume must be between 0.0 and 1.0");
        }
        for (name, settings) in [("desktop", &self.subtitle.desktop), ("mobile", &self.subtitle.mobile)] {
            if !(settings.reveal_fraction > 0.0 && settings.reveal_fraction <= 1.0) {
                anyhow::bail!("subtitle.{}.reveal_fraction must be in (0, 1]", name);
            }
        }
        if self.playback.load_timeout_ms == 0 {
            anyhow::bail!("playback.load_timeout_ms must be positive");
        }
        if !(0.0..=1.0).contains(&self.observer.smoothing) {
            anyhow::bail!("observer.smoothing must be between 0.0 and 1.0");
        }
        if self.transport.session_id.trim().is_empty() {
            anyhow::bail!("transport.session_id must not be empty");
        }
        Ok(())
    }
}

/// Load configuration from a YAML file; no path means built-in defaults
pub fn load_config(path: Option<&Path>) -> Result<StageConfig> {
    let Some(path) = path else {
        return Ok(StageConfig::default());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: StageConfig = serde_yaml::from_str(&text)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Parse a volume value (0-100) to a float (0.0-1.0)
pub fn parse_volume(vol: i32) -> f32 {
    if vol < 0 {
        return 0.0;
    }
    if vol > 100 {
        return 1.0;
    }
    vol as f32 / 100.0
}

/// Parse a duration such as `500`, `500ms`, `1.5s`
pub fn parse_millis(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (number, scale) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1.0)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1000.0)
    } else {
        (s, 1.0)
    };

    let value: f64 = number.trim().parse().context("Invalid duration value")?;
    if !value.is_finite() || value < 0.0 {
        anyhow::bail!("Duration must be a non-negative number");
    }
    Ok(Duration::from_millis((value * scale).round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StageConfig::default();
        assert_eq!(config.fps, 60);
        assert_eq!(config.playback.timings(), PlaybackTimings::default());
        assert_eq!(config.subtitle.active().reveal_fraction, 0.8);
        assert_eq!(config.transport.session_id, "demo-session-123");
        assert_eq!(
            config.characters.expression_for(CharacterId::Grok),
            ExpressionId::Mischievous
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_path_is_default() {
        assert_eq!(load_config(None).unwrap(), StageConfig::default());
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "fps: 30\nplayback:\n  inter_item_gap_ms: 250\nsubtitle:\n  profile: mobile\ncharacters:\n  default_expressions:\n    claude: sad\n"
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.fps, 30);
        assert_eq!(config.playback.inter_item_gap_ms, 250);
        assert_eq!(config.playback.failure_backoff_ms, 1000);
        assert_eq!(config.subtitle.active().linger_ms, Some(2000));
        assert_eq!(config.characters.expression_for(CharacterId::Claude), ExpressionId::Sad);
        // Characters missing from the map keep their built-in default
        assert_eq!(config.characters.expression_for(CharacterId::Gpt), ExpressionId::Happy);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fps: 0").unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/stage.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_parse_volume() {
        assert_eq!(parse_volume(0), 0.0);
        assert_eq!(parse_volume(50), 0.5);
        assert_eq!(parse_volume(100), 1.0);
        assert_eq!(parse_volume(-10), 0.0);
        assert_eq!(parse_volume(150), 1.0);
    }

    #[test]
    fn test_parse_millis() {
        assert_eq!(parse_millis("500").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_millis("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_millis("1.5s").unwrap(), Duration::from_millis(1500));
        assert!(parse_millis("-1").is_err());
        assert!(parse_millis("soon").is_err());
    }

    #[test]
    fn test_delay_range_bounds() {
        let range = DelayRange::new(2000, 4000);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let d = range.sample(&mut rng);
            assert!(d >= range.min() && d <= range.max());
        }
        assert_eq!(DelayRange::new(100, 0).sample(&mut rng), Duration::from_millis(100));
    }
}
