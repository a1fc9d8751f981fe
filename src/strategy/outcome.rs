//! Outcome resolution for emitted signals.

use chrono::{DateTime, Utc};

use crate::domain::{Candle, Outcome, TradeSignal};
use crate::error::{CandlebotError, Result};
use crate::persistence::CandleStore;
use crate::rl::Action;

/// Up wins on a strictly higher exit close, Down on a strictly lower one.
/// An unchanged close is a Loss for either action.
pub fn evaluate_outcome(action: Action, entry_close: f64, exit_close: f64) -> Outcome {
    let won = match action {
        Action::Up => exit_close > entry_close,
        Action::Down => exit_close < entry_close,
    };
    if won {
        Outcome::Win
    } else {
        Outcome::Loss
    }
}

/// Entry and exit candles used to resolve a signal
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub entry: Candle,
    pub exit: Candle,
    pub outcome: Outcome,
}

/// Nearest stored candle strictly within `tolerance_secs` of `at`.
pub async fn candle_near(
    store: &CandleStore,
    at: DateTime<Utc>,
    tolerance_secs: i64,
) -> Result<Candle> {
    store
        .find_near(at.timestamp_millis(), tolerance_secs * 1000)
        .await
        .ok_or(CandlebotError::CandleNotFound {
            timestamp: at,
            tolerance_secs,
        })
}

/// Look up both ends of the signal's timeframe and score it.
pub async fn resolve(
    store: &CandleStore,
    signal: &TradeSignal,
    tolerance_secs: i64,
) -> Result<Resolution> {
    let entry = candle_near(store, signal.entry_time, tolerance_secs).await?;
    let exit = candle_near(store, signal.exit_time(), tolerance_secs).await?;
    Ok(Resolution {
        entry,
        exit,
        outcome: evaluate_outcome(signal.action, entry.close, exit.close),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn up_and_down_outcomes() {
        assert_eq!(evaluate_outcome(Action::Up, 100.0, 101.0), Outcome::Win);
        assert_eq!(evaluate_outcome(Action::Up, 100.0, 99.0), Outcome::Loss);
        assert_eq!(evaluate_outcome(Action::Down, 100.0, 99.0), Outcome::Win);
        assert_eq!(evaluate_outcome(Action::Down, 100.0, 101.0), Outcome::Loss);
    }

    #[test]
    fn unchanged_close_loses() {
        assert_eq!(evaluate_outcome(Action::Up, 100.0, 100.0), Outcome::Loss);
        assert_eq!(evaluate_outcome(Action::Down, 100.0, 100.0), Outcome::Loss);
    }
}
