// --- Alert and audit events handed to the logging/alerting collaborator ---

use chrono::{DateTime, Utc};
use core_types::{ExecutionIntent, PositionDirective, RiskGateResult, Symbol};
use rust_decimal::Decimal;
use serde::Serialize;

/// How loudly an event should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// The circuit breaker moved from CLOSED to OPEN.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerTripped {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// The circuit breaker moved from OPEN back to CLOSED.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerReset {
    pub timestamp: DateTime<Utc>,
    /// `false` when the reset came from an elapsed cooldown.
    pub manual: bool,
}

/// One verdict of the risk gate pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct GateDecision {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub result: RiskGateResult,
}

/// A sized intent that was handed to the execution collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct IntentSubmitted {
    pub timestamp: DateTime<Utc>,
    pub intent: ExecutionIntent,
}

/// A position was closed by the execution collaborator.
#[derive(Debug, Clone, Serialize)]
pub struct PositionClosed {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub exit_price: Decimal,
    /// Realized PnL net of fees, in account currency.
    pub pnl: Decimal,
    pub reason: String,
}

/// The top-level alert enum.
/// `tag` and `content` are used by serde for clean JSON representation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum AlertEvent {
    BreakerTripped(BreakerTripped),
    BreakerReset(BreakerReset),
    GateDecision(GateDecision),
    PositionDirective(PositionDirective),
    IntentSubmitted(IntentSubmitted),
    PositionClosed(PositionClosed),
}

impl AlertEvent {
    pub fn severity(&self) -> Severity {
        match self {
            AlertEvent::BreakerTripped(_) => Severity::Critical,
            AlertEvent::BreakerReset(_) => Severity::Warning,
            AlertEvent::GateDecision(d) if !d.result.approved => Severity::Warning,
            AlertEvent::GateDecision(_) => Severity::Info,
            AlertEvent::PositionDirective(_) => Severity::Warning,
            AlertEvent::IntentSubmitted(_) => Severity::Info,
            AlertEvent::PositionClosed(c) if c.pnl.is_sign_negative() => Severity::Warning,
            AlertEvent::PositionClosed(_) => Severity::Info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::GateLayer;

    #[test]
    fn test_trip_is_critical() {
        let event = AlertEvent::BreakerTripped(BreakerTripped {
            timestamp: Utc::now(),
            reason: "drawdown".to_string(),
        });
        assert_eq!(event.severity(), Severity::Critical);
        assert!(Severity::Critical > Severity::Warning);
    }

    #[test]
    fn test_rejection_is_warning() {
        let event = AlertEvent::GateDecision(GateDecision {
            timestamp: Utc::now(),
            symbol: Symbol::new("BTCUSDT"),
            result: RiskGateResult::rejected(GateLayer::PreTrade, "daily loss limit"),
        });
        assert_eq!(event.severity(), Severity::Warning);
    }

    #[test]
    fn test_losing_close_is_warning() {
        let event = AlertEvent::PositionClosed(PositionClosed {
            timestamp: Utc::now(),
            symbol: Symbol::new("ETHUSDT"),
            exit_price: Decimal::from(1_900),
            pnl: Decimal::from(-25),
            reason: "stop loss".to_string(),
        });
        assert_eq!(event.severity(), Severity::Warning);
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let event = AlertEvent::BreakerReset(BreakerReset {
            timestamp: Utc::now(),
            manual: true,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BreakerReset");
        assert_eq!(json["payload"]["manual"], true);
    }
}
