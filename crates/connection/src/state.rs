//! Connection state shared between the message path and the liveness loop

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;

/// Supervisor state machine
///
/// `Disconnected → Connecting → Connected ⇄ Stale → Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionPhase {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    /// Connected, but nothing received within the staleness threshold
    Stale = 3,
}

impl ConnectionPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Stale,
            _ => Self::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Stale => "stale",
        }
    }
}

/// Connection state
///
/// Only the supervisor mutates it. `last_message` is written on every
/// inbound message and read by the liveness check, so it is a plain atomic
/// (milliseconds since `origin`).
#[derive(Debug)]
pub struct ConnectionState {
    connected: AtomicBool,
    phase: AtomicU8,
    origin: Instant,
    last_message_ms: AtomicU64,
    subscribed_topics: RwLock<BTreeSet<String>>,
    /// Topics whose last subscribe request failed
    pending_topics: RwLock<BTreeSet<String>>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            phase: AtomicU8::new(ConnectionPhase::Disconnected as u8),
            origin: Instant::now(),
            last_message_ms: AtomicU64::new(0),
            subscribed_topics: RwLock::new(BTreeSet::new()),
            pending_topics: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> ConnectionPhase {
        ConnectionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn set_phase(&self, phase: ConnectionPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn mark_connecting(&self) {
        self.set_phase(ConnectionPhase::Connecting);
    }

    /// Mark the link up and restart the staleness clock
    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::Release);
        self.set_phase(ConnectionPhase::Connected);
        self.record_message();
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
        self.set_phase(ConnectionPhase::Disconnected);
    }

    /// Record an inbound message
    pub fn record_message(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_message_ms.store(now, Ordering::Release);
    }

    /// Time since the last inbound message (or since the link came up)
    pub fn since_last_message(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as u64;
        let last = self.last_message_ms.load(Ordering::Acquire);
        Duration::from_millis(now.saturating_sub(last))
    }

    /// Replace the topic set
    ///
    /// Called before the subscribe requests go out.
    pub fn set_topics<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut guard = self
            .subscribed_topics
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard.clear();
        guard.extend(topics.into_iter().map(Into::into));
    }

    /// Topics in subscription order
    pub fn topics(&self) -> Vec<String> {
        self.subscribed_topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Forget every topic, acknowledged or not
    pub fn clear_topics(&self) {
        self.subscribed_topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.pending_topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Flag a topic for another subscribe attempt
    pub fn mark_pending(&self, topic: &str) {
        self.pending_topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_string());
    }

    pub fn mark_subscribed(&self, topic: &str) {
        self.pending_topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(topic);
    }

    /// Topics still waiting for a successful subscribe
    pub fn pending_topics(&self) -> Vec<String> {
        self.pending_topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
