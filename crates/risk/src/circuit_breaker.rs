//! Circuit breaker for halting new entries.
//!
//! The status lives in an [`AtomicU8`] so that every gating pass reads it with a
//! single load. Transitions are compare-and-swap: concurrent trips or resets
//! produce exactly one transition and exactly one alert. The trip record is
//! behind a `parking_lot::Mutex` since it is only written on transitions.

use crate::types::{BreakerSettings, ResetPolicySettings};
use chrono::{DateTime, Duration, Utc};
use core_types::PortfolioState;
use events::{AlertEvent, BreakerReset, BreakerTripped};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use tokio::sync::broadcast;

const CLOSED: u8 = 0;
const OPEN: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerStatus {
    Closed,
    Open,
}

/// How an OPEN breaker returns to CLOSED.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResetPolicy {
    Manual,
    AutoCooldown(Duration),
}

impl From<&ResetPolicySettings> for ResetPolicy {
    fn from(settings: &ResetPolicySettings) -> Self {
        match settings {
            ResetPolicySettings::Manual => ResetPolicy::Manual,
            ResetPolicySettings::AutoCooldown { cooldown_secs } => {
                ResetPolicy::AutoCooldown(Duration::seconds(*cooldown_secs as i64))
            }
        }
    }
}

/// Why the breaker tripped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TripReason {
    Drawdown { drawdown: f64, threshold: f64 },
    DailyLoss { loss: f64, threshold: f64 },
    WeeklyLoss { loss: f64, threshold: f64 },
    ConsecutiveLosses { count: u32, limit: u32 },
    /// Tripped by an out-of-band monitor or an operator.
    Manual(String),
}

impl fmt::Display for TripReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TripReason::Drawdown { drawdown, threshold } => write!(
                f,
                "drawdown {:.2}% exceeds {:.2}%",
                drawdown * 100.0,
                threshold * 100.0
            ),
            TripReason::DailyLoss { loss, threshold } => write!(
                f,
                "daily loss {:.2}% exceeds {:.2}%",
                loss * 100.0,
                threshold * 100.0
            ),
            TripReason::WeeklyLoss { loss, threshold } => write!(
                f,
                "weekly loss {:.2}% exceeds {:.2}%",
                loss * 100.0,
                threshold * 100.0
            ),
            TripReason::ConsecutiveLosses { count, limit } => {
                write!(f, "{count} consecutive losses (limit {limit})")
            }
            TripReason::Manual(reason) => write!(f, "manual trip: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TripRecord {
    pub reason: TripReason,
    pub tripped_at: DateTime<Utc>,
}

/// A consistent read of the breaker, taken once per gating pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub status: BreakerStatus,
    pub trip: Option<TripRecord>,
    /// Incremented on every OPEN -> CLOSED transition.
    pub generation: u64,
}

impl BreakerSnapshot {
    pub fn is_open(&self) -> bool {
        self.status == BreakerStatus::Open
    }

    /// Reason text for rejections; empty when closed.
    pub fn reason(&self) -> String {
        self.trip
            .as_ref()
            .map(|t| t.reason.to_string())
            .unwrap_or_default()
    }
}

pub struct CircuitBreaker {
    settings: BreakerSettings,
    policy: ResetPolicy,
    status: AtomicU8,
    generation: AtomicU64,
    trip: Mutex<Option<TripRecord>>,
    history: Mutex<Vec<TripRecord>>,
    alerts: Option<broadcast::Sender<AlertEvent>>,
}

impl CircuitBreaker {
    /// Creates a CLOSED breaker.
    pub fn new(settings: BreakerSettings) -> Self {
        let policy = ResetPolicy::from(&settings.reset_policy);
        Self {
            settings,
            policy,
            status: AtomicU8::new(CLOSED),
            generation: AtomicU64::new(0),
            trip: Mutex::new(None),
            history: Mutex::new(Vec::new()),
            alerts: None,
        }
    }

    /// Publishes trip and reset alerts on `alerts`.
    pub fn with_alerts(mut self, alerts: broadcast::Sender<AlertEvent>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn policy(&self) -> ResetPolicy {
        self.policy
    }

    /// Single atomic load. Does not apply the cooldown.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status.load(Ordering::Acquire) == OPEN
    }

    /// Current status, closing the breaker first if its cooldown has elapsed.
    pub fn status(&self, now: DateTime<Utc>) -> BreakerSnapshot {
        if self.is_open() {
            if let ResetPolicy::AutoCooldown(cooldown) = self.policy {
                let elapsed = self
                    .trip
                    .lock()
                    .as_ref()
                    .is_some_and(|t| now - t.tripped_at >= cooldown);
                if elapsed {
                    self.transition_to_closed(now, false);
                }
            }
        }
        self.snapshot()
    }

    /// The first violated condition, in fixed precedence order.
    pub fn check_trip_conditions(&self, state: &PortfolioState) -> Option<TripReason> {
        let s = &self.settings;
        if state.current_drawdown > s.drawdown_threshold {
            return Some(TripReason::Drawdown {
                drawdown: state.current_drawdown,
                threshold: s.drawdown_threshold,
            });
        }
        let daily = state.daily_pnl_fraction();
        if daily < -s.daily_loss_threshold {
            return Some(TripReason::DailyLoss {
                loss: -daily,
                threshold: s.daily_loss_threshold,
            });
        }
        if let Some(weekly_threshold) = s.weekly_loss_threshold {
            let weekly = state.weekly_pnl_fraction();
            if weekly < -weekly_threshold {
                return Some(TripReason::WeeklyLoss {
                    loss: -weekly,
                    threshold: weekly_threshold,
                });
            }
        }
        if state.consecutive_losses >= s.consecutive_trip {
            return Some(TripReason::ConsecutiveLosses {
                count: state.consecutive_losses,
                limit: s.consecutive_trip,
            });
        }
        None
    }

    /// Applies the cooldown, then trips if `state` violates a condition.
    pub fn evaluate(&self, state: &PortfolioState, now: DateTime<Utc>) -> BreakerSnapshot {
        let current = self.status(now);
        if current.is_open() {
            return current;
        }
        if let Some(reason) = self.check_trip_conditions(state) {
            self.trip(reason, now);
        }
        self.snapshot()
    }

    /// CLOSED -> OPEN. Returns `false` if the breaker was already open.
    pub fn trip(&self, reason: TripReason, now: DateTime<Utc>) -> bool {
        let mut record = self.trip.lock();
        if self
            .status
            .compare_exchange(CLOSED, OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let trip = TripRecord {
            reason,
            tripped_at: now,
        };
        tracing::error!(reason = %trip.reason, "CIRCUIT BREAKER TRIPPED. New entries halted.");
        self.history.lock().push(trip.clone());
        self.publish(AlertEvent::BreakerTripped(BreakerTripped {
            timestamp: now,
            reason: trip.reason.to_string(),
        }));
        *record = Some(trip);
        true
    }

    /// Operator reset, OPEN -> CLOSED. Returns `false` if the breaker was closed.
    pub fn reset(&self, now: DateTime<Utc>) -> bool {
        self.transition_to_closed(now, true)
    }

    /// Every trip since the last cooldown reset, oldest first.
    pub fn trip_history(&self) -> Vec<TripRecord> {
        self.history.lock().clone()
    }

    fn transition_to_closed(&self, now: DateTime<Utc>, manual: bool) -> bool {
        let mut record = self.trip.lock();
        if self
            .status
            .compare_exchange(OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        *record = None;
        if !manual {
            self.history.lock().clear();
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        tracing::warn!(manual, "Circuit breaker reset. New entries re-enabled.");
        self.publish(AlertEvent::BreakerReset(BreakerReset {
            timestamp: now,
            manual,
        }));
        true
    }

    fn snapshot(&self) -> BreakerSnapshot {
        let record = self.trip.lock();
        let status = if self.status.load(Ordering::Acquire) == OPEN {
            BreakerStatus::Open
        } else {
            BreakerStatus::Closed
        };
        BreakerSnapshot {
            status,
            trip: record.clone(),
            generation: self.generation.load(Ordering::Acquire),
        }
    }

    fn publish(&self, event: AlertEvent) {
        if let Some(tx) = &self.alerts {
            // No subscribers is not an error.
            let _ = tx.send(event);
        }
    }
}
