use std::sync::Once;

use log::LevelFilter;

static INIT: Once = Once::new();

/// Verbosity levels accepted by `--log-level`
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Nothing = 0,
    User = 1,
    Error = 2,
    #[default]
    Warning = 3,
    Info = 4,
    Debug = 5,
    All = 6,
}

impl LogLevel {
    /// Create a LogLevel from an integer
    pub fn from_i32(level: i32) -> Self {
        match level {
            0 => LogLevel::Nothing,
            1 => LogLevel::User,
            2 => LogLevel::Error,
            3 => LogLevel::Warning,
            4 => LogLevel::Info,
            5 => LogLevel::Debug,
            6 => LogLevel::All,
            _ => LogLevel::Info,
        }
    }

    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Parse a level name or number
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<i32>() {
            return Some(Self::from_i32(n));
        }
        match s.to_ascii_lowercase().as_str() {
            "nothing" | "off" => Some(LogLevel::Nothing),
            "user" => Some(LogLevel::User),
            "error" => Some(LogLevel::Error),
            "warning" | "warn" => Some(LogLevel::Warning),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "all" | "trace" => Some(LogLevel::All),
            _ => None,
        }
    }

    /// `User` shares the `error` filter
    pub fn filter(&self) -> LevelFilter {
        match self {
            LogLevel::Nothing => LevelFilter::Off,
            LogLevel::User | LogLevel::Error => LevelFilter::Error,
            LogLevel::Warning => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::All => LevelFilter::Trace,
        }
    }
}

/// Install the global logger. `RUST_LOG` overrides `level` when set. Later
/// calls only adjust the max level.
pub fn init(level: LogLevel) {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(level.filter()).format_timestamp_millis();
        if let Ok(spec) = std::env::var("RUST_LOG") {
            builder.parse_filters(&spec);
        }
        if let Err(e) = builder.try_init() {
            eprintln!("logger already installed: {}", e);
        }
    });
    log::set_max_level(level.filter());
}
