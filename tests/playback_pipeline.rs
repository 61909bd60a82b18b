use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use proptest::prelude::*;
use rstest::rstest;

use avatar_stage::config::StageConfig;
use avatar_stage::sound::probe::silent_wav;
use avatar_stage::sound::{LoadError, LoadScript, NullAudioDevice, NullDeviceControl};
use avatar_stage::speech::event::{RawLipSync, RawLipSyncMetadata, RawMouthCue, RawSpeechEvent};
use avatar_stage::speech::morph::Morph;
use avatar_stage::speech::viseme::VisemeSymbol;
use avatar_stage::speech::{CharacterId, Stage};

const FRAME: Duration = Duration::from_millis(16);

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn new_stage(t0: Instant) -> (Stage<NullAudioDevice>, NullDeviceControl) {
    let config = StageConfig {
        seed: Some(42),
        ..StageConfig::default()
    };
    let device = NullAudioDevice::new();
    let control = device.control();
    (Stage::new(&config, device, t0), control)
}

fn url_speech(character: &str, name: &str, seconds: f64) -> RawSpeechEvent {
    RawSpeechEvent {
        character_id: Some(character.to_string()),
        text: format!("line {}", name),
        audio_url: Some(url(name)),
        duration: Some(seconds),
        ..Default::default()
    }
}

fn url(name: &str) -> String {
    format!("https://cdn.example/{}.mp3", name)
}

fn inline_speech(character: &str, millis: u64) -> RawSpeechEvent {
    let wav = silent_wav(ms(millis), 16_000);
    RawSpeechEvent {
        character_id: Some(character.to_string()),
        text: "inline".to_string(),
        audio_base64: Some(STANDARD.encode(wav)),
        ..Default::default()
    }
}

/// Advance frame by frame from `from` to `until`, checking the single-speaker
/// rule on every frame
fn run(stage: &mut Stage<NullAudioDevice>, control: &NullDeviceControl, from: Instant, until: Instant) {
    let mut now = from;
    while now <= until {
        stage.advance(now);
        assert!(stage.presentation().speaking_count() <= 1);
        assert!(control.playing_count() <= 1);
        now += FRAME;
    }
}

#[test]
fn test_items_play_in_arrival_order() {
    let t0 = Instant::now();
    let (mut stage, control) = new_stage(t0);
    stage.ingest(url_speech("claude", "a", 1.0), t0).unwrap();
    stage.ingest(url_speech("gpt", "b", 1.0), t0).unwrap();
    stage.ingest(url_speech("grok", "c", 1.0), t0).unwrap();
    stage.ingest(url_speech("claude", "d", 1.0), t0).unwrap();

    run(&mut stage, &control, t0, t0 + Duration::from_secs(8));

    assert_eq!(control.started(), vec![url("a"), url("b"), url("c"), url("d")]);
    assert_eq!(control.overlap_violations(), 0);
    assert!(stage.is_drained());
    assert_eq!(stage.diagnostics().stats.completed, 4);
}

#[test]
fn test_failed_load_does_not_stall_queue() {
    let t0 = Instant::now();
    let (mut stage, control) = new_stage(t0);
    control.push_script(LoadScript::Fail(LoadError::Decode("truncated".into())));
    stage.ingest(url_speech("claude", "bad", 1.0), t0).unwrap();
    stage.ingest(url_speech("gpt", "good", 1.0), t0).unwrap();

    stage.advance(t0);
    assert_eq!(stage.current_speaker(), None);
    assert_eq!(stage.diagnostics().stats.failed, 1);

    // Next item goes out once the failure backoff has passed
    run(&mut stage, &control, t0 + FRAME, t0 + ms(1100));
    assert_eq!(stage.current_speaker(), Some(CharacterId::Gpt));
    assert_eq!(control.started(), vec![url("good")]);
    assert!(stage.notices().latest().unwrap().message.contains("Claude"));
}

#[test]
fn test_hung_load_times_out() {
    let t0 = Instant::now();
    let (mut stage, control) = new_stage(t0);
    control.push_script(LoadScript::Never);
    stage.ingest(url_speech("grok", "stuck", 1.0), t0).unwrap();
    stage.ingest(url_speech("gpt", "next", 1.0), t0).unwrap();

    run(&mut stage, &control, t0, t0 + ms(9_900));
    assert_eq!(stage.current_speaker(), None);

    run(&mut stage, &control, t0 + ms(10_000), t0 + ms(11_100));
    assert_eq!(stage.current_speaker(), Some(CharacterId::Gpt));
    assert_eq!(control.cancelled_loads(), 1);
}

#[test]
fn test_inline_audio_is_released_on_every_exit() {
    let t0 = Instant::now();
    let (mut stage, control) = new_stage(t0);
    let mut now = t0;

    for _ in 0..4 {
        // natural end
        stage.ingest(inline_speech("claude", 400), now).unwrap();
        // skipped
        stage.ingest(inline_speech("gpt", 400), now).unwrap();
        // cleared while queued
        stage.ingest(inline_speech("grok", 400), now).unwrap();
        assert!(stage.registry().live_count() >= 2);

        let end = now + ms(1_000);
        run(&mut stage, &control, now, end);
        now = end;
        assert_eq!(stage.current_speaker(), Some(CharacterId::Gpt));

        stage.skip(now);
        assert_eq!(stage.clear(now), 1);
        let end = now + ms(1_000);
        run(&mut stage, &control, now, end);
        now = end;

        assert_eq!(stage.registry().live_count(), 0);
        assert_eq!(control.live_handles(), 0);
        assert_eq!(control.pending_loads(), 0);
    }

    assert!(stage.is_drained());
    assert_eq!(stage.registry().allocated_total(), 12);
}

#[test]
fn test_inline_audio_duration_comes_from_the_wav_header() {
    let t0 = Instant::now();
    let (mut stage, control) = new_stage(t0);
    stage.ingest(inline_speech("gpt", 800), t0).unwrap();

    run(&mut stage, &control, t0, t0 + ms(750));
    assert_eq!(stage.current_speaker(), Some(CharacterId::Gpt));
    run(&mut stage, &control, t0 + ms(760), t0 + ms(850));
    assert_eq!(stage.current_speaker(), None);
}

#[test]
fn test_skip_under_load() {
    let t0 = Instant::now();
    let (mut stage, control) = new_stage(t0);
    for (c, name) in [("claude", "a"), ("gpt", "b"), ("grok", "c")] {
        stage.ingest(url_speech(c, name, 5.0), t0).unwrap();
    }
    run(&mut stage, &control, t0, t0 + ms(300));

    let skipped_at = t0 + ms(300);
    assert!(stage.skip(skipped_at));
    assert_eq!(stage.current_speaker(), None);
    assert_eq!(control.stopped_count(), 1);

    run(&mut stage, &control, skipped_at, skipped_at + ms(150));
    assert_eq!(stage.current_speaker(), None);
    assert!(stage.face(CharacterId::Claude).unwrap().mouth_is_closed());
    run(&mut stage, &control, skipped_at + ms(200), skipped_at + ms(250));
    assert_eq!(stage.current_speaker(), Some(CharacterId::Gpt));
    assert_eq!(stage.queue_len(), 1);
    assert_eq!(stage.diagnostics().stats.skipped, 1);
}

#[test]
fn test_clear_drops_everything_waiting() {
    let t0 = Instant::now();
    let (mut stage, control) = new_stage(t0);
    for (c, name) in [("claude", "a"), ("gpt", "b"), ("grok", "c")] {
        stage.ingest(url_speech(c, name, 1.0), t0).unwrap();
    }
    stage.advance(t0 + ms(100));

    assert_eq!(stage.clear(t0 + ms(100)), 2);
    assert_eq!(stage.queue_len(), 0);
    assert!(stage.subtitle().is_none());

    run(&mut stage, &control, t0 + ms(100), t0 + Duration::from_secs(6));
    assert_eq!(control.started(), vec![url("a")]);
    assert!(stage.is_drained());
}

#[test]
fn test_idle_layer_restarts_after_speech() {
    let t0 = Instant::now();
    let (mut stage, _control) = new_stage(t0);
    assert_eq!(stage.idle(CharacterId::Claude).unwrap().restarts(), 0);

    stage.ingest(url_speech("claude", "a", 1.0), t0).unwrap();
    stage.advance(t0);
    assert_eq!(stage.idle(CharacterId::Claude).unwrap().restarts(), 1);
    assert_eq!(stage.idle(CharacterId::Gpt).unwrap().restarts(), 0);

    let ended = t0 + ms(1_000);
    stage.advance(t0 + ms(500));
    stage.advance(ended);
    let idle = stage.idle(CharacterId::Claude).unwrap();
    assert_eq!(idle.restarts(), 2);
    assert!(!idle.is_speaking());
    assert_eq!(idle.last_blink_at(), ended);
    assert_eq!(idle.last_brow_at(), ended);
    assert_eq!(idle.next_blink_delay(), ms(1_000));

    stage.advance(ended + ms(1_010));
    assert!(stage.idle(CharacterId::Claude).unwrap().is_blinking());
}

#[test]
fn test_lip_sync_follows_the_timeline() {
    let t0 = Instant::now();
    let (mut stage, control) = new_stage(t0);
    let mut raw = url_speech("claude", "a", 1.0);
    raw.lip_sync = Some(RawLipSync {
        metadata: RawLipSyncMetadata { duration: Some(0.8) },
        mouth_cues: vec![
            RawMouthCue {
                start: 0.1,
                end: 0.3,
                value: "A".to_string(),
            },
            RawMouthCue {
                start: 0.4,
                end: 0.6,
                value: "B".to_string(),
            },
        ],
    });
    stage.ingest(raw, t0).unwrap();

    stage.advance(t0 + ms(200));
    assert_eq!(stage.mouth_symbol(), Some(VisemeSymbol::A));
    assert_eq!(stage.face(CharacterId::Claude).unwrap().get(Morph::JawOpen), 0.3);

    stage.advance(t0 + ms(350));
    assert_eq!(stage.mouth_symbol(), None);
    assert!(stage.face(CharacterId::Claude).unwrap().mouth_is_closed());

    stage.advance(t0 + ms(500));
    assert_eq!(stage.mouth_symbol(), Some(VisemeSymbol::B));
    assert_eq!(stage.face(CharacterId::Claude).unwrap().get(Morph::MouthPressL), 0.4);

    // Declared timeline is shorter than the audio: hold neutral
    stage.advance(t0 + ms(900));
    assert_eq!(stage.current_speaker(), Some(CharacterId::Claude));
    assert_eq!(stage.mouth_symbol(), None);

    run(&mut stage, &control, t0 + ms(1_000), t0 + ms(1_100));
    assert!(stage.face(CharacterId::Claude).unwrap().mouth_is_closed());
}

#[rstest]
#[case(100, 5.0, 400, 10)]
#[case(100, 5.0, 399, 9)]
#[case(10, 0.1, 90, 3)]
fn test_typewriter_scales_with_duration(
    #[case] len: usize,
    #[case] seconds: f64,
    #[case] at_ms: u64,
    #[case] revealed: usize,
) {
    let t0 = Instant::now();
    let (mut stage, _control) = new_stage(t0);
    let mut raw = url_speech("gpt", "a", seconds);
    raw.text = "x".repeat(len);
    stage.ingest(raw, t0).unwrap();

    stage.advance(t0 + ms(at_ms));
    let view = stage.subtitle().unwrap();
    assert_eq!(view.revealed, revealed);
    assert_eq!(view.total, len);
}

#[test]
fn test_typewriter_never_overruns() {
    let t0 = Instant::now();
    let (mut stage, _control) = new_stage(t0);
    let mut raw = url_speech("grok", "a", 3.0);
    raw.text = "short".to_string();
    stage.ingest(raw, t0).unwrap();

    stage.advance(t0 + ms(2_900));
    let view = stage.subtitle().unwrap();
    assert_eq!(view.revealed, 5);
    assert!(!view.is_typing());
}

#[rstest]
#[case::load_failure(LoadScript::Fail(LoadError::Decode("truncated".into())))]
#[case::load_timeout(LoadScript::Never)]
#[case::blocked_play(LoadScript::Blocked)]
#[case::rejected_play(LoadScript::RejectPlay { times: 5 })]
fn test_inline_audio_is_released_when_an_item_fails(#[case] script: LoadScript) {
    let t0 = Instant::now();
    let (mut stage, control) = new_stage(t0);
    control.push_script(script);
    stage.ingest(inline_speech("grok", 400), t0).unwrap();
    assert_eq!(stage.registry().live_count(), 1);

    run(&mut stage, &control, t0, t0 + ms(11_500));

    assert_eq!(stage.diagnostics().stats.failed, 1);
    assert!(control.started().is_empty());
    assert!(stage.is_drained());
    assert_eq!(stage.registry().live_count(), 0);
    assert_eq!(control.live_handles(), 0);
    assert_eq!(control.pending_loads(), 0);
}

#[test]
fn test_inline_audio_is_released_when_aborted_while_loading() {
    let t0 = Instant::now();
    let (mut stage, control) = new_stage(t0);

    // skip while the head item is still loading
    control.push_script(LoadScript::Never);
    stage.ingest(inline_speech("claude", 400), t0).unwrap();
    stage.ingest(inline_speech("gpt", 400), t0).unwrap();
    stage.advance(t0 + ms(100));
    assert!(stage.skip(t0 + ms(100)));
    assert_eq!(control.cancelled_loads(), 1);
    assert_eq!(stage.registry().live_count(), 1);

    run(&mut stage, &control, t0 + ms(100), t0 + ms(2_000));
    assert_eq!(control.started().len(), 1);
    assert_eq!(stage.registry().live_count(), 0);

    // clear while loading
    let later = t0 + ms(2_000);
    control.push_script(LoadScript::Never);
    stage.ingest(inline_speech("grok", 400), later).unwrap();
    stage.ingest(inline_speech("claude", 400), later).unwrap();
    stage.advance(later + ms(50));
    assert_eq!(stage.clear(later + ms(50)), 1);

    assert_eq!(control.cancelled_loads(), 2);
    assert_eq!(stage.diagnostics().stats.cancelled, 2);
    assert_eq!(stage.registry().live_count(), 0);
    assert_eq!(control.pending_loads(), 0);
    assert_eq!(control.live_handles(), 0);
    assert!(stage.is_drained());
}

#[test]
fn test_absurd_duration_does_not_take_down_the_stage() {
    let t0 = Instant::now();
    let (mut stage, control) = new_stage(t0);
    stage.ingest(url_speech("gpt", "huge", 1e20), t0).unwrap();
    stage.ingest(url_speech("claude", "max", f64::MAX), t0).unwrap();

    run(&mut stage, &control, t0, t0 + ms(100));
    assert_eq!(stage.current_speaker(), Some(CharacterId::Gpt));
    assert_eq!(stage.diagnostics().stats.rejected, 0);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Outcome {
    Plays,
    PlaysOnRetry,
    LoadFails,
    TimesOut,
    Blocked,
    Rejected,
}

impl Outcome {
    fn script(self) -> LoadScript {
        match self {
            Outcome::Plays => LoadScript::Ready { duration: None },
            Outcome::PlaysOnRetry => LoadScript::RejectPlay { times: 1 },
            Outcome::LoadFails => LoadScript::Fail(LoadError::Decode("bad".into())),
            Outcome::TimesOut => LoadScript::Never,
            Outcome::Blocked => LoadScript::Blocked,
            Outcome::Rejected => LoadScript::RejectPlay { times: 5 },
        }
    }

    fn plays(self) -> bool {
        matches!(self, Outcome::Plays | Outcome::PlaysOnRetry)
    }
}

fn outcome() -> impl Strategy<Value = Outcome> {
    prop::sample::select(vec![
        Outcome::Plays,
        Outcome::PlaysOnRetry,
        Outcome::LoadFails,
        Outcome::TimesOut,
        Outcome::Blocked,
        Outcome::Rejected,
    ])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_serializer_invariants(
        items in prop::collection::vec((0usize..3, 2u64..20, outcome(), any::<bool>()), 1..6)
    ) {
        let t0 = Instant::now();
        let (mut stage, control) = new_stage(t0);
        let names = ["claude", "gpt", "grok"];
        // Started sources in order: a URL, or the prefix the device gives a blob
        let mut expected = Vec::new();
        let mut blobs = 0;

        for (i, &(who, tenths, outcome, inline)) in items.iter().enumerate() {
            let name = format!("item{}", i);
            control.push_script(outcome.script());
            let raw = if inline {
                blobs += 1;
                inline_speech(names[who], tenths * 100)
            } else {
                url_speech(names[who], &name, tenths as f64 / 10.0)
            };
            if outcome.plays() {
                expected.push(if inline { format!("blob#{} (", blobs) } else { url(&name) });
            }
            stage.ingest(raw, t0).unwrap();
        }

        let mut now = t0;
        let until = t0 + Duration::from_secs(70);
        while now <= until {
            stage.advance(now);
            prop_assert!(stage.presentation().speaking_count() <= 1);
            prop_assert!(control.playing_count() <= 1);
            now += ms(100);
        }

        let started = control.started();
        prop_assert_eq!(started.len(), expected.len());
        for (source, want) in started.iter().zip(&expected) {
            prop_assert!(source.starts_with(want.as_str()), "{} vs {}", source, want);
        }
        prop_assert_eq!(control.overlap_violations(), 0);
        prop_assert!(stage.is_drained());
        prop_assert_eq!(control.live_handles(), 0);
        prop_assert_eq!(control.pending_loads(), 0);
        prop_assert_eq!(stage.registry().live_count(), 0);
        prop_assert_eq!(stage.registry().allocated_total(), blobs);
    }
}
