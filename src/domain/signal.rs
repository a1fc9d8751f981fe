use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::rl::{Action, StateKey};

/// Lifecycle of an emitted signal: Pending until its timeframe elapses, then Win or Loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Pending,
    Win,
    Loss,
}

impl Outcome {
    /// Reward fed back into the policy; Pending carries none.
    pub fn reward(&self) -> Option<f64> {
        match self {
            Outcome::Pending => None,
            Outcome::Win => Some(1.0),
            Outcome::Loss => Some(-1.0),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Pending => "Pending",
            Outcome::Win => "Win",
            Outcome::Loss => "Loss",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "Pending" => Ok(Outcome::Pending),
            "Win" => Ok(Outcome::Win),
            "Loss" => Ok(Outcome::Loss),
            other => Err(format!("unknown outcome '{other}'")),
        }
    }
}

/// Direction suggested by the model probability alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceHint {
    Up,
    Down,
    Abstain,
}

impl ConfidenceHint {
    /// Up above `threshold`, Down below `1 - threshold`, Abstain in between.
    pub fn from_probability(probability: f64, threshold: f64) -> Self {
        if probability > threshold {
            ConfidenceHint::Up
        } else if probability < 1.0 - threshold {
            ConfidenceHint::Down
        } else {
            ConfidenceHint::Abstain
        }
    }

    pub fn direction(&self) -> Option<Action> {
        match self {
            ConfidenceHint::Up => Some(Action::Up),
            ConfidenceHint::Down => Some(Action::Down),
            ConfidenceHint::Abstain => None,
        }
    }
}

/// An emitted trade signal. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeSignal {
    /// Start of the next whole minute after emission
    pub entry_time: DateTime<Utc>,
    /// Action chosen by the policy (always wins over `hint`)
    pub action: Action,
    /// Direction the probability alone suggested
    pub hint: Action,
    /// Model probability of an up move, in [0, 1]
    pub probability: f64,
    pub timeframe_minutes: u32,
    /// Policy state at emission time
    pub state: StateKey,
    /// Pattern detected on the last two candles of the window
    pub pattern: Option<&'static str>,
    /// Validation accuracy of the model that produced `probability`
    pub model_accuracy: Option<f64>,
}

impl TradeSignal {
    /// Probability reported as a percentage
    pub fn confidence_pct(&self) -> f64 {
        self.probability * 100.0
    }

    pub fn exit_time(&self) -> DateTime<Utc> {
        self.entry_time + Duration::minutes(i64::from(self.timeframe_minutes))
    }

    pub fn policy_overrode_hint(&self) -> bool {
        self.action != self.hint
    }
}

/// Signal awaiting resolution, with the number of failed resolution attempts.
#[derive(Debug, Clone)]
pub struct PendingTrade {
    pub signal: TradeSignal,
    pub attempts: u32,
}

impl PendingTrade {
    pub fn new(signal: TradeSignal) -> Self {
        Self {
            signal,
            attempts: 0,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.signal.exit_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn hint_thresholds() {
        assert_eq!(ConfidenceHint::from_probability(0.9, 0.6), ConfidenceHint::Up);
        assert_eq!(ConfidenceHint::from_probability(0.1, 0.6), ConfidenceHint::Down);
        assert_eq!(ConfidenceHint::from_probability(0.6, 0.6), ConfidenceHint::Abstain);
        assert_eq!(ConfidenceHint::from_probability(0.5, 0.6), ConfidenceHint::Abstain);
        assert_eq!(ConfidenceHint::Abstain.direction(), None);
    }

    #[test]
    fn rewards_follow_outcome() {
        assert_eq!(Outcome::Win.reward(), Some(1.0));
        assert_eq!(Outcome::Loss.reward(), Some(-1.0));
        assert_eq!(Outcome::Pending.reward(), None);
    }

    #[test]
    fn pending_trade_becomes_due_at_exit_time() {
        let entry = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let signal = TradeSignal {
            entry_time: entry,
            action: Action::Up,
            hint: Action::Up,
            probability: 0.8,
            timeframe_minutes: 2,
            state: StateKey::price(100.0),
            pattern: None,
            model_accuracy: None,
        };
        let pending = PendingTrade::new(signal);
        assert!(!pending.is_due(entry + Duration::seconds(119)));
        assert!(pending.is_due(entry + Duration::minutes(2)));
        assert!((pending.signal.confidence_pct() - 80.0).abs() < 1e-9);
    }
}
