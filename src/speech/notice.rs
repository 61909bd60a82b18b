//! Short user-facing messages about recoverable failures

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

pub const DEFAULT_NOTICE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Monotonic, never reused
    pub seq: u64,
    pub level: NoticeLevel,
    pub message: String,
    pub at: Instant,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Bounded log of notices; the oldest are evicted first
#[derive(Debug, Clone)]
pub struct NoticeBoard {
    capacity: usize,
    next_seq: u64,
    notices: VecDeque<Notice>,
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new(DEFAULT_NOTICE_CAPACITY)
    }
}

impl NoticeBoard {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_seq: 0,
            notices: VecDeque::new(),
        }
    }

    pub fn post(&mut self, level: NoticeLevel, message: impl Into<String>, now: Instant) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.notices.len() == self.capacity {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice {
            seq,
            level,
            message: message.into(),
            at: now,
        });
        seq
    }

    pub fn len(&self) -> usize {
        self.notices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }

    pub fn latest(&self) -> Option<&Notice> {
        self.notices.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    /// Notices posted at or after `seq`, for readers that poll
    pub fn since(&self, seq: u64) -> impl Iterator<Item = &Notice> {
        self.notices.iter().filter(move |n| n.seq >= seq)
    }

    /// Sequence number the next notice will get
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn clear(&mut self) {
        self.notices.clear();
    }
}
