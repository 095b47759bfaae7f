use std::collections::VecDeque;

use serde::Serialize;
use tokio::time::Instant;
use tracing::trace;

use super::Since;
use crate::config::MonitorConfig;
use crate::messages::{CloseReason, ConnectionKind, ConnectivityEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Unknown,
    Connected,
    Disconnected,
}

impl From<ConnectionKind> for Connectivity {
    fn from(kind: ConnectionKind) -> Self {
        match kind {
            ConnectionKind::Connected => Connectivity::Connected,
            ConnectionKind::Disconnected => Connectivity::Disconnected,
        }
    }
}

/// The monitor's view of its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectivityState {
    pub current: Connectivity,
    /// Service timestamp of the last applied transition.
    pub last_transition_at_ms: Option<u64>,
}

/// One applied, de-duplicated connectivity change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub seq: u64,
    pub kind: ConnectionKind,
    pub observed_at_ms: u64,
    pub reason: Option<CloseReason>,
}

impl Transition {
    /// Checkpoint positioned right at this transition, so that waits anchored
    /// on it only see what came after.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.seq)
    }
}

/// Position in a monitor's transition sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checkpoint(pub(crate) u64);

struct Logged {
    transition: Transition,
    applied_at: Instant,
}

/// Current state plus the rolling log of recent transitions.
pub(crate) struct Tracker {
    state: ConnectivityState,
    recent: VecDeque<Logged>,
    /// Kind of the last applied event and when it (or a collapsed repeat of
    /// it) was last received.
    last_applied: Option<(ConnectionKind, Instant)>,
    last_seq: u64,
    /// Highest seq handed to any waiter.
    last_returned: u64,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        Tracker {
            state: ConnectivityState {
                current: Connectivity::Unknown,
                last_transition_at_ms: None,
            },
            recent: VecDeque::new(),
            last_applied: None,
            last_seq: 0,
            last_returned: 0,
        }
    }

    pub(crate) fn state(&self) -> ConnectivityState {
        self.state
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.last_seq)
    }

    pub(crate) fn recent(&self) -> Vec<Transition> {
        self.recent.iter().map(|l| l.transition.clone()).collect()
    }

    /// Apply an event, returning the transition it produced or `None` when it
    /// was a repeat.
    pub(crate) fn apply(
        &mut self,
        event: &ConnectivityEvent,
        now: Instant,
        config: &MonitorConfig,
    ) -> Option<Transition> {
        if let Some((kind, at)) = self.last_applied.as_mut() {
            let within_window = config
                .dedup_window
                .map_or(true, |window| now.duration_since(*at) <= window);
            if *kind == event.kind && within_window {
                *at = now;
                trace!(kind = %event.kind, "Collapsed repeated connectivity event");
                return None;
            }
        }

        let redelivered = self.recent.iter().any(|l| {
            l.transition.kind == event.kind && l.transition.observed_at_ms == event.observed_at_ms
        });
        if redelivered {
            trace!(kind = %event.kind, observed_at_ms = event.observed_at_ms, "Dropped redelivered event");
            return None;
        }

        self.last_seq += 1;
        let transition = Transition {
            seq: self.last_seq,
            kind: event.kind,
            observed_at_ms: event.observed_at_ms,
            reason: event.reason,
        };

        self.state = ConnectivityState {
            current: event.kind.into(),
            last_transition_at_ms: Some(event.observed_at_ms),
        };
        self.last_applied = Some((event.kind, now));
        self.recent.push_back(Logged {
            transition: transition.clone(),
            applied_at: now,
        });
        while self.recent.len() > config.recent_capacity.max(1) {
            self.recent.pop_front();
        }

        Some(transition)
    }

    /// Earliest logged transition of `kind` that satisfies `since`.
    pub(crate) fn find(
        &self,
        kind: ConnectionKind,
        since: Since,
        now: Instant,
        config: &MonitorConfig,
    ) -> Option<Transition> {
        let after = match since {
            Since::Now => return None,
            Since::Checkpoint(Checkpoint(seq)) => seq,
            Since::LastCheck => self.last_returned,
        };

        self.recent
            .iter()
            .filter(|l| l.transition.kind == kind && l.transition.seq > after)
            .find(|l| match since {
                Since::LastCheck => now.duration_since(l.applied_at) <= config.lookback,
                _ => true,
            })
            .map(|l| l.transition.clone())
    }

    pub(crate) fn mark_returned(&mut self, seq: u64) {
        self.last_returned = self.last_returned.max(seq);
    }
}
