//! Lip-sync sampling
//!
//! Polled once per frame while a session plays. Each sample zeroes every
//! mouth morph and then applies the pose of the cue covering the elapsed
//! time, so poses never blend or linger.

use std::time::Instant;

use super::morph::{viseme_weights, MorphWeights};
use super::queue::SessionInfo;
use super::types::CharacterId;
use super::viseme::{VisemeSymbol, VisemeTimeline};

/// Mouth pose for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct MouthFrame {
    pub character: CharacterId,
    /// Active cue symbol, `None` in gaps and past the end
    pub symbol: Option<VisemeSymbol>,
    /// Mouth morphs only; everything else is zero
    pub weights: MorphWeights,
}

#[derive(Debug, Clone)]
struct ActiveTrack {
    item_id: u64,
    character: CharacterId,
    timeline: VisemeTimeline,
    started_at: Instant,
}

/// Samples the playing session's viseme timeline
#[derive(Debug, Clone, Default)]
pub struct LipSyncSampler {
    active: Option<ActiveTrack>,
    use_fallback: bool,
}

impl LipSyncSampler {
    pub fn new(use_fallback: bool) -> Self {
        Self {
            active: None,
            use_fallback,
        }
    }

    /// Follow a newly started session
    pub fn start(&mut self, session: &SessionInfo) {
        let timeline = match &session.timeline {
            Some(timeline) => timeline.clone(),
            None if self.use_fallback => VisemeTimeline::fallback(),
            None => {
                log::debug!("No timeline for item #{}, mouth stays closed", session.item_id);
                self.active = None;
                return;
            }
        };
        self.active = Some(ActiveTrack {
            item_id: session.item_id,
            character: session.character,
            timeline,
            started_at: session.started_at,
        });
    }

    /// Go inert. Returns the character whose mouth must be closed.
    pub fn stop(&mut self, item_id: u64) -> Option<CharacterId> {
        match &self.active {
            Some(track) if track.item_id == item_id => self.active.take().map(|t| t.character),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn character(&self) -> Option<CharacterId> {
        self.active.as_ref().map(|t| t.character)
    }

    /// Mouth pose at `now`, `None` when no session is being tracked
    pub fn sample(&self, now: Instant) -> Option<MouthFrame> {
        let track = self.active.as_ref()?;
        let elapsed = now.saturating_duration_since(track.started_at);
        let symbol = track.timeline.cue_at_elapsed(elapsed).map(|cue| cue.symbol);

        let mut weights = MorphWeights::new();
        weights.reset_mouth();
        if let Some(symbol) = symbol {
            weights.apply(viseme_weights(symbol));
        }
        log::trace!("lipsync {} @ {:?}: {:?}", track.character, elapsed, symbol);

        Some(MouthFrame {
            character: track.character,
            symbol,
            weights,
        })
    }
}
