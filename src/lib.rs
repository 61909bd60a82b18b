// avatar-stage library
// Audio-driven avatar presentation: playback queue, lip-sync, idle motion,
// subtitles and the backend link.

pub mod cli;
pub mod config;
pub mod logging;
pub mod sound;
pub mod speech;
pub mod transport;

pub use cli::Cli;
pub use config::StageConfig;
pub use logging::LogLevel;
pub use speech::Stage;
