//! Connection state machine
//!
//! # State Diagram
//!
//! ```text
//!                  open()
//!   DISCONNECTED ─────────→ CONNECTING ◄──────── timer ───────┐
//!        ▲                   │      │                         │
//!        │               success  failure                     │
//!        │                   ▼      ▼                         │
//!      close()          CONNECTED ──drop──→ RECONNECTING ─────┘
//!   (from any phase)                             │
//!                                      attempt + 1 ≥ max
//!                                                ▼
//!                                           ABANDONED ──open()──→ CONNECTING
//! ```
//!
//! **Key properties:**
//! - `attempt` resets to 0 exactly on `connecting → connected`
//! - the number of `reconnecting → connecting` transitions before
//!   `abandoned` never exceeds `max_attempts`
//! - `close()` always lands in `disconnected`, bypassing `abandoned`
//!
//! The machine is pure bookkeeping: it performs no I/O and never sleeps.
//! The connection manager drives it and owns the timers.

use crate::core::types::duration_ms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, SystemTime};
use thiserror::Error;

// ============================================================================
// Phase
// ============================================================================

/// Lifecycle phase of a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal after too many failed reconnects; only `open()` leaves it
    Abandoned,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Abandoned => "abandoned",
        }
    }

    /// Numeric encoding for the phase gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Reconnecting => 3,
            Self::Abandoned => 4,
        }
    }

    /// Whether `open()` is accepted from this phase
    pub fn can_open(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Abandoned)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Reconnect settings
// ============================================================================

/// Reconnect backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Connection attempts (initial plus reconnects) before giving up
    pub max_attempts: u32,
    /// Random spread applied to each delay, as a fraction (0.1 = ±5%)
    pub jitter: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_attempts: 10,
            jitter: 0.0,
        }
    }
}

impl ReconnectSettings {
    /// `min(max_delay, base_delay * 2^attempt)`, saturating
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }
}

// ============================================================================
// Stats and snapshots
// ============================================================================

/// Lifetime counters of one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub connect_attempts: u64,
    pub connects: u64,
    pub connect_failures: u64,
    /// Established connections lost without an explicit close
    pub disconnects: u64,
    /// `reconnecting → connecting` transitions
    pub reconnects: u64,
    pub abandoned: u64,
    pub events_received: u64,
    pub malformed_frames: u64,
    pub last_connected_at: Option<SystemTime>,
    pub last_disconnected_at: Option<SystemTime>,
}

/// Read-only view of the channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub phase: Phase,
    pub attempt: u32,
    pub topics: Vec<String>,
}

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event} while {from}")]
pub struct InvalidTransition {
    pub from: Phase,
    pub event: &'static str,
}

/// What to do after a failure while reconnecting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Wait(Duration),
    Abandon,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    phase: Phase,
    attempt: u32,
    topics: BTreeSet<String>,
    stats: ConnectionStats,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(String::as_str)
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut ConnectionStats {
        &mut self.stats
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            phase: self.phase,
            attempt: self.attempt,
            topics: self.topics.iter().cloned().collect(),
        }
    }

    fn invalid(&self, event: &'static str) -> InvalidTransition {
        InvalidTransition {
            from: self.phase,
            event,
        }
    }

    /// `disconnected | abandoned → connecting`
    pub fn open(&mut self) -> Result<(), InvalidTransition> {
        if !self.phase.can_open() {
            return Err(self.invalid("open"));
        }
        self.phase = Phase::Connecting;
        self.attempt = 0;
        self.stats.connect_attempts += 1;
        Ok(())
    }

    /// `connecting → connected`; returns every topic to declare
    pub fn connected(&mut self) -> Result<Vec<String>, InvalidTransition> {
        if self.phase != Phase::Connecting {
            return Err(self.invalid("connected"));
        }
        self.phase = Phase::Connected;
        self.attempt = 0;
        self.stats.connects += 1;
        self.stats.last_connected_at = Some(SystemTime::now());
        Ok(self.topics.iter().cloned().collect())
    }

    /// `connecting → reconnecting`
    pub fn connect_failed(&mut self) -> Result<(), InvalidTransition> {
        if self.phase != Phase::Connecting {
            return Err(self.invalid("connect_failed"));
        }
        self.phase = Phase::Reconnecting;
        self.stats.connect_failures += 1;
        Ok(())
    }

    /// `connected → reconnecting` (server close, error or stale link)
    pub fn connection_lost(&mut self) -> Result<(), InvalidTransition> {
        if self.phase != Phase::Connected {
            return Err(self.invalid("connection_lost"));
        }
        self.phase = Phase::Reconnecting;
        self.stats.disconnects += 1;
        self.stats.last_disconnected_at = Some(SystemTime::now());
        Ok(())
    }

    /// Decide the next step while `reconnecting`
    ///
    /// Abandons (and moves to `abandoned`) when the next attempt would reach
    /// `max_attempts`; otherwise returns the delay before it.
    pub fn next_reconnect(
        &mut self,
        settings: &ReconnectSettings,
    ) -> Result<ReconnectDecision, InvalidTransition> {
        if self.phase != Phase::Reconnecting {
            return Err(self.invalid("next_reconnect"));
        }
        if self.attempt.saturating_add(1) >= settings.max_attempts {
            self.phase = Phase::Abandoned;
            self.stats.abandoned += 1;
            return Ok(ReconnectDecision::Abandon);
        }
        Ok(ReconnectDecision::Wait(settings.delay(self.attempt)))
    }

    /// `reconnecting → connecting` once the delay elapsed; `attempt += 1`
    pub fn reconnect_timer_fired(&mut self) -> Result<(), InvalidTransition> {
        if self.phase != Phase::Reconnecting {
            return Err(self.invalid("reconnect_timer_fired"));
        }
        self.phase = Phase::Connecting;
        self.attempt += 1;
        self.stats.reconnects += 1;
        self.stats.connect_attempts += 1;
        Ok(())
    }

    /// Any phase → `disconnected`; topics are forgotten
    pub fn close(&mut self) -> Phase {
        let previous = self.phase;
        self.phase = Phase::Disconnected;
        self.attempt = 0;
        self.topics.clear();
        previous
    }

    /// Returns true if the topic was not subscribed yet
    pub fn subscribe(&mut self, topic: &str) -> bool {
        self.topics.insert(topic.to_string())
    }

    pub fn unsubscribe(&mut self, topic: &str) -> bool {
        self.topics.remove(topic)
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }
}
