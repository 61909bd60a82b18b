use std::path::PathBuf;

use crate::config::{parse_millis, parse_volume, SoundDriver, StageConfig, SubtitleProfile};
use crate::logging::LogLevel;
use anyhow::{Context, Result};
use clap::Parser;

/// Audio-driven avatar stage: plays queued character speech with lip-sync,
/// idle motion and typed subtitles
#[derive(Parser, Debug, Default)]
#[command(name = "avatar-stage")]
#[command(version)]
#[command(about = "Audio-driven avatar presentation pipeline", long_about = None)]
pub struct Cli {
    /// YAML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Replay inbound messages from a newline-delimited JSON file
    #[arg(short, long, value_name = "FILE")]
    pub transcript: Option<PathBuf>,

    /// Sound driver (none, rodio)
    #[arg(long, value_name = "DRIVER")]
    pub sound: Option<String>,

    /// Frames per second of the presentation loop
    #[arg(long, value_name = "FPS")]
    pub fps: Option<u32>,

    /// Use the mobile subtitle profile
    #[arg(short, long)]
    pub mobile: bool,

    /// Log level (nothing, user, error, warning, info, debug, all or 0-6)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Session to join after connecting
    #[arg(short, long, value_name = "ID")]
    pub session: Option<String>,

    /// Request a response from a random character this often (e.g. 8s)
    #[arg(long, value_name = "INTERVAL")]
    pub auto_request: Option<String>,

    /// Disable subtitles
    #[arg(long)]
    pub no_subtitles: bool,

    /// Output volume (0-100)
    #[arg(long, value_name = "VOLUME")]
    pub volume: Option<String>,

    /// Seed for idle animation timing
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,
}

impl Cli {
    /// Merge CLI arguments over values loaded from the config file
    pub fn merge_into_config(&self, mut config: StageConfig) -> Result<StageConfig> {
        if let Some(ref sound) = self.sound {
            config.audio.driver = Self::parse_sound_driver(sound)?;
        }

        if let Some(fps) = self.fps {
            config.fps = fps;
        }

        if self.mobile {
            config.subtitle.profile = SubtitleProfile::Mobile;
        }

        if let Some(ref session) = self.session {
            config.transport.session_id = session.clone();
        }

        if let Some(ref interval) = self.auto_request {
            let interval = parse_millis(interval).context("Invalid auto-request interval")?;
            if interval.is_zero() {
                anyhow::bail!("Auto-request interval must be greater than zero");
            }
            config.transport.auto_request_interval_ms = Some(interval.as_millis() as u64);
        }

        if self.no_subtitles {
            config.subtitle.enabled = false;
        }

        if let Some(ref vol) = self.volume {
            let int_vol: i32 = vol.parse().context("Invalid volume")?;
            config.audio.volume = parse_volume(int_vol);
        }

        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }

        config.validate()?;
        Ok(config)
    }

    /// Requested log level, warnings by default
    pub fn log_level(&self) -> Result<LogLevel> {
        match self.log_level {
            Some(ref level) => LogLevel::parse(level).with_context(|| {
                format!(
                    "Invalid log level: {}. Valid options: nothing, user, error, warning, info, debug, all",
                    level
                )
            }),
            None => Ok(LogLevel::default()),
        }
    }

    fn parse_sound_driver(s: &str) -> Result<SoundDriver> {
        match s.to_lowercase().as_str() {
            "rodio" => Ok(SoundDriver::Rodio),
            "none" | "nosound" => Ok(SoundDriver::None),
            _ => anyhow::bail!("Invalid sound driver: {}. Valid options: rodio, none", s),
        }
    }
}
