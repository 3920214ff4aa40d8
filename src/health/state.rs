//! Backend health state machine.
//!
//! # States
//! - Alive: backend receives traffic
//! - Dead: backend excluded from load balancing, except for one probe per window
//!
//! # State Transitions
//! ```text
//! Alive → Dead:   refused / timed-out forwarding attempt
//! Dead  → Probe:  dead past the probation window and picked; first claim wins
//! Probe → Alive:  probe request completes without a forwarding error
//! Probe → Dead:   probe fails; window restarts, probe re-armed
//! Probe → Dead:   probe request ends without an outcome; probe handed back
//! ```
//!
//! # Design Decisions
//! - One lock per host; every transition is a single critical section
//! - Time comes from `tokio::time::Instant` so tests can pause the clock

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// How long a dead host sits out before a single probe is let through.
pub const PROBATION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default)]
struct Health {
    dead: bool,
    dead_since: Option<Instant>,
    retry: bool,
}

/// Outcome of [`HealthState::mark_dead`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadTransition {
    /// Host was alive and is now dead.
    Died,
    /// Host was dead with a probe in flight; the probe failed and was re-armed.
    ProbeFailed,
    /// Host was already dead with no probe outstanding.
    Unchanged,
}

/// Outcome of [`HealthState::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    Alive,
    /// Dead host; this request is its probe.
    Probe,
    /// Dead host still in probation, or its probe is taken.
    Denied,
}

/// Dead/alive bookkeeping for one host.
#[derive(Debug, Default)]
pub struct HealthState {
    inner: Mutex<Health>,
}

/// Point-in-time copy of a host's health, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub dead: bool,
    pub retry: bool,
    pub dead_for: Option<Duration>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Health> {
        self.inner.lock().expect("host health mutex poisoned")
    }

    pub fn is_dead(&self) -> bool {
        self.lock().dead
    }

    pub fn is_retrying(&self) -> bool {
        self.lock().retry
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let health = *self.lock();
        HealthSnapshot {
            dead: health.dead,
            retry: health.retry,
            dead_for: health.dead_since.map(|since| since.elapsed()),
        }
    }

    /// Record a transport failure.
    pub fn mark_dead(&self) -> DeadTransition {
        let mut health = self.lock();
        let transition = if !health.dead {
            DeadTransition::Died
        } else if health.retry {
            DeadTransition::ProbeFailed
        } else {
            return DeadTransition::Unchanged;
        };
        health.dead = true;
        health.retry = false;
        health.dead_since = Some(Instant::now());
        transition
    }

    /// Record a successful exchange. Returns true if the host was dead.
    pub fn clear_dead(&self) -> bool {
        let mut health = self.lock();
        let was_dead = health.dead;
        *health = Health::default();
        was_dead
    }

    /// Whether selection may consider this host: alive, or dead with the
    /// probe still available. Changes nothing.
    pub fn admits_traffic(&self) -> bool {
        let health = self.lock();
        !health.dead || (!health.retry && probation_over(&health))
    }

    /// Claim the host for one request once a strategy has picked it.
    /// Alive hosts are always granted; a dead host hands out its single probe.
    pub fn claim(&self) -> Claim {
        let mut health = self.lock();
        if !health.dead {
            return Claim::Alive;
        }
        if !health.retry && probation_over(&health) {
            health.retry = true;
            return Claim::Probe;
        }
        Claim::Denied
    }

    /// Hand an unused probe back. `dead_since` is kept, so the next
    /// selection may probe again right away.
    pub fn release_probe(&self) -> bool {
        let mut health = self.lock();
        if health.dead && health.retry {
            health.retry = false;
            return true;
        }
        false
    }
}

fn probation_over(health: &Health) -> bool {
    health
        .dead_since
        .map(|since| since.elapsed() > PROBATION)
        .unwrap_or(true)
}
