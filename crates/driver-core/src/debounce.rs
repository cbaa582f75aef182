//! Duplicate suppression for switch and scene frames
//!
//! Tuya gangs send the same physical event several times in a burst. The
//! filter accepts the first occurrence of a key and rejects repeats until the
//! window has elapsed since the last *accepted* occurrence.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use zcl_frames::{DecodedEvent, EventKind};

/// Distinguishes on and off toggles; all scene presses share one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discriminant {
    State(bool),
    Scene,
}

/// Identity of a logical event for debouncing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub endpoint: u8,
    pub kind: EventKind,
    pub discriminant: Discriminant,
}

impl DebounceKey {
    #[must_use]
    pub fn switch(endpoint: u8, is_on: bool) -> Self {
        Self {
            endpoint,
            kind: EventKind::SwitchToggle,
            discriminant: Discriminant::State(is_on),
        }
    }

    #[must_use]
    pub fn scene(endpoint: u8) -> Self {
        Self {
            endpoint,
            kind: EventKind::SceneTrigger,
            discriminant: Discriminant::Scene,
        }
    }

    /// Key for an event, `None` for kinds that are never debounced
    #[must_use]
    pub fn for_event(event: &DecodedEvent) -> Option<Self> {
        match *event {
            DecodedEvent::SwitchToggle { endpoint, is_on } => Some(Self::switch(endpoint, is_on)),
            DecodedEvent::SceneTrigger { endpoint } => Some(Self::scene(endpoint)),
            _ => None,
        }
    }
}

impl std::fmt::Display for DebounceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.discriminant {
            Discriminant::State(on) => write!(f, "{}-{}-{}", self.endpoint, self.kind as u8, on),
            Discriminant::Scene => write!(f, "{}-{}-scene", self.endpoint, self.kind as u8),
        }
    }
}

/// Per-session debounce state
pub struct DebounceFilter {
    window: Duration,
    /// Last accepted timestamp per key
    accepted: DashMap<DebounceKey, Instant>,
}

impl DebounceFilter {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            accepted: DashMap::new(),
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Accept `key` at `now` and record it, or reject it as a duplicate
    ///
    /// A rejected event leaves the stored timestamp untouched, so a burst of
    /// duplicates does not push the window forward.
    pub fn should_accept(&self, key: DebounceKey, now: Instant) -> bool {
        match self.accepted.entry(key) {
            Entry::Occupied(mut last) => {
                if now.saturating_duration_since(*last.get()) >= self.window {
                    last.insert(now);
                    true
                } else {
                    tracing::debug!("Debouncing frame: {}", key);
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    /// Number of tracked keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    /// Drop all recorded timestamps (session teardown)
    pub fn clear(&self) {
        self.accepted.clear();
    }
}
