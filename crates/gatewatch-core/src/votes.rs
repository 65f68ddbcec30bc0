//! Bounded identity vote window.
//!
//! One window per process, shared by every face in the frame: faces are not
//! tracked, only their labels are counted.

use crate::matcher::Identity;
use std::collections::VecDeque;

pub const DEFAULT_WINDOW: usize = 7;

#[derive(Debug, Clone)]
pub struct IdentityVotes {
    window: VecDeque<Identity>,
    capacity: usize,
}

impl Default for IdentityVotes {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl IdentityVotes {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a candidate, evicting the oldest once full.
    pub fn push(&mut self, identity: Identity) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(identity);
    }

    /// Most frequent label in the window. Ties go to the label whose first
    /// appearance in the window is earliest.
    pub fn smoothed(&self) -> Option<&Identity> {
        let mut best: Option<(&Identity, usize)> = None;
        for (pos, candidate) in self.window.iter().enumerate() {
            if self.window.iter().take(pos).any(|seen| seen == candidate) {
                continue;
            }
            let count = self.window.iter().filter(|v| *v == candidate).count();
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((candidate, count));
            }
        }
        best.map(|(identity, _)| identity)
    }

    /// True once the window has filled for the first time.
    pub fn is_warm(&self) -> bool {
        self.window.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}
