//! In-memory detection history.
//!
//! Events are kept in insertion (chronological) order. Statistics are maintained
//! incrementally on append, eviction and clear, so `statistics()` is O(1) and always
//! agrees with the current contents.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;

use crate::alert::{AlertLevel, DetectionEvent};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub total: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub safe: usize,
}

impl HistoryStats {
    pub fn count(&self, level: AlertLevel) -> usize {
        match level {
            AlertLevel::High => self.high,
            AlertLevel::Medium => self.medium,
            AlertLevel::Low => self.low,
            AlertLevel::Safe => self.safe,
        }
    }

    fn slot(&mut self, level: AlertLevel) -> &mut usize {
        match level {
            AlertLevel::High => &mut self.high,
            AlertLevel::Medium => &mut self.medium,
            AlertLevel::Low => &mut self.low,
            AlertLevel::Safe => &mut self.safe,
        }
    }

    fn add(&mut self, level: AlertLevel) {
        self.total += 1;
        *self.slot(level) += 1;
    }

    fn remove(&mut self, level: AlertLevel) {
        self.total = self.total.saturating_sub(1);
        let slot = self.slot(level);
        *slot = slot.saturating_sub(1);
    }
}

/// Chronological log of detection events with optional FIFO cap.
#[derive(Debug, Default)]
pub struct HistoryStore {
    events: VecDeque<Arc<DetectionEvent>>,
    max_events: Option<usize>,
    stats: HistoryStats,
    evicted: u64,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that evicts its oldest event once `max_events` is reached.
    pub fn bounded(max_events: usize) -> Self {
        Self {
            max_events: Some(max_events.max(1)),
            ..Self::default()
        }
    }

    pub fn with_limit(max_events: Option<usize>) -> Self {
        match max_events {
            Some(max) => Self::bounded(max),
            None => Self::new(),
        }
    }

    pub fn append(&mut self, event: Arc<DetectionEvent>) {
        if let Some(max) = self.max_events {
            while self.events.len() >= max {
                if let Some(oldest) = self.events.pop_front() {
                    self.stats.remove(oldest.level());
                    self.evicted += 1;
                }
            }
        }
        self.stats.add(event.level());
        self.events.push_back(event);
    }

    /// Newest to oldest. Each call starts a fresh traversal.
    pub fn recent_first(&self) -> impl Iterator<Item = &Arc<DetectionEvent>> + '_ {
        self.events.iter().rev()
    }

    /// Oldest to newest.
    pub fn chronological(&self) -> impl Iterator<Item = &Arc<DetectionEvent>> + '_ {
        self.events.iter()
    }

    /// Owned chronological copy, for work done outside the history lock.
    pub fn snapshot(&self) -> Vec<Arc<DetectionEvent>> {
        self.events.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&Arc<DetectionEvent>> {
        self.events.back()
    }

    pub fn statistics(&self) -> HistoryStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events dropped by the FIFO cap since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.stats = HistoryStats::default();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
