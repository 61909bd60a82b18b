use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use avatar_stage::cli::Cli;
use avatar_stage::config::{self, SoundDriver, StageConfig};
use avatar_stage::logging;
use avatar_stage::sound::{AudioDevice, NullAudioDevice};
use avatar_stage::speech::{CharacterId, NoticeLevel, Stage};
use avatar_stage::transport::{AutoRequester, LinkEvent, ReplayConnector, TransportLink};

/// Gap between transcript lines that carry no timestamp
const REPLAY_SPACING: Duration = Duration::from_millis(500);

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level()?);

    let config = config::load_config(cli.config.as_deref())?;
    let config = cli.merge_into_config(config)?;
    log::info!(
        "Starting at {} fps, sound driver {:?}, subtitles {:?}",
        config.fps,
        config.audio.driver,
        config.subtitle.profile
    );

    match config.audio.driver {
        SoundDriver::None => run(&config, cli.transcript.as_deref(), NullAudioDevice::new()),
        SoundDriver::Rodio => run_rodio(&config, cli.transcript.as_deref()),
    }
}

#[cfg(feature = "rodio-output")]
fn run_rodio(config: &StageConfig, transcript: Option<&Path>) -> Result<()> {
    let device = avatar_stage::sound::RodioAudioDevice::open(config.audio.volume)?;
    run(config, transcript, device)
}

#[cfg(not(feature = "rodio-output"))]
fn run_rodio(_config: &StageConfig, _transcript: Option<&Path>) -> Result<()> {
    anyhow::bail!("this build has no audio output; rebuild with --features rodio-output or use --sound none")
}

/// Console view of the stage: prints what changed since the last frame
#[derive(Default)]
struct ConsoleView {
    speaker: Option<CharacterId>,
    subtitle: Option<(u64, usize)>,
    notice_mark: u64,
}

impl ConsoleView {
    fn show<D: AudioDevice>(&mut self, stage: &Stage<D>) {
        let speaker = stage.current_speaker();
        if speaker != self.speaker {
            match speaker {
                Some(c) => println!("▶ {} is speaking ({} queued)", c.display_name(), stage.queue_len()),
                None => println!("■ quiet ({} queued)", stage.queue_len()),
            }
            self.speaker = speaker;
        }

        let view = stage.subtitle();
        let key = view.as_ref().map(|v| (v.item_id, v.revealed));
        if key != self.subtitle {
            if let Some(view) = view.as_ref().filter(|v| !v.is_typing()) {
                println!("  {}: {}", view.character.display_name(), view.text);
            }
            self.subtitle = key;
        }

        for notice in stage.notices().since(self.notice_mark) {
            println!("! {}", notice);
        }
        self.notice_mark = stage.notices().next_seq();
    }
}

fn run<D: AudioDevice>(config: &StageConfig, transcript: Option<&Path>, device: D) -> Result<()> {
    let start = Instant::now();
    let mut stage = Stage::new(config, device, start);
    stage.device_mut().set_volume(config.audio.volume);

    let mut link = match transcript {
        Some(path) => Some(TransportLink::new(
            ReplayConnector::from_path(path, REPLAY_SPACING)?,
            &config.transport,
            start,
        )),
        None => None,
    };
    let mut auto = config.transport.auto_request_interval_ms.map(|ms| {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        AutoRequester::new(Duration::from_millis(ms), rng, start)
    });

    let frame = Duration::from_secs_f64(1.0 / f64::from(config.fps));
    let mut view = ConsoleView::default();

    loop {
        let now = Instant::now();

        if let Some(link) = link.as_mut() {
            for event in link.poll(now) {
                match event {
                    LinkEvent::Message(message) => {
                        stage.handle_message(message, now);
                    }
                    LinkEvent::Connected => log::info!("Link up, session {}", link.session_id()),
                    LinkEvent::Disconnected { reason } => {
                        stage.notify(NoticeLevel::Warning, format!("Connection lost: {}", reason), now);
                    }
                }
            }
            if let Some(character) = auto.as_mut().and_then(|a| a.poll(link.is_connected(), now)) {
                // Dropped commands are logged by the link
                let _ = link.request_response(Some(character));
            }
        }

        stage.advance(now);
        view.show(&stage);

        let transcript_done = link.as_ref().map_or(true, |l| l.connector().is_exhausted());
        if transcript_done && auto.is_none() && stage.is_drained() {
            break;
        }
        thread::sleep(frame.saturating_sub(now.elapsed()));
    }

    let diagnostics = stage.diagnostics();
    log::info!("Finished after {:?}: {:?}", start.elapsed(), diagnostics.stats);
    println!(
        "{} spoken, {} failed, {} rejected",
        diagnostics.stats.completed, diagnostics.stats.failed, diagnostics.stats.rejected
    );
    Ok(())
}
