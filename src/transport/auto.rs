//! Periodic "say something" requests

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::speech::types::CharacterId;

/// Fires every `interval`, picking a random character each time
#[derive(Debug)]
pub struct AutoRequester {
    interval: Duration,
    next_at: Instant,
    rng: StdRng,
    fired: u32,
}

impl AutoRequester {
    /// The first request goes out one interval after `now`
    pub fn new(interval: Duration, rng: StdRng, now: Instant) -> Self {
        Self {
            interval,
            next_at: now + interval,
            rng,
            fired: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn fired(&self) -> u32 {
        self.fired
    }

    /// Character to request from, if a request is due. Only ticks while
    /// `connected`; missed ticks are not made up.
    pub fn poll(&mut self, connected: bool, now: Instant) -> Option<CharacterId> {
        if now < self.next_at {
            return None;
        }
        self.next_at = now + self.interval;
        if !connected {
            return None;
        }
        self.fired += 1;
        CharacterId::ALL.choose(&mut self.rng).copied()
    }
}
