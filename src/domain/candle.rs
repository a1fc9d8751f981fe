use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A completed OHLCV candle. `timestamp` is the period open time in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }

    /// Close above open
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// Close below open
    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Binary direction target attached to a stored candle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    Down = 0,
    Up = 1,
}

impl Label {
    /// `open > close` is Down, everything else (including doji) is Up.
    pub fn from_candle(candle: &Candle) -> Self {
        if candle.open > candle.close {
            Label::Down
        } else {
            Label::Up
        }
    }

    pub fn from_target(target: u8) -> Option<Self> {
        match target {
            0 => Some(Label::Down),
            1 => Some(Label::Up),
            _ => None,
        }
    }

    pub fn as_target(self) -> u8 {
        self as u8
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.as_target())
    }
}

/// How a candle's label is derived.
///
/// `OwnCandle` compares the candle's own open and close and is the default.
/// `NextCandle` compares the following candle's close with this candle's close,
/// which leaves the newest candle unlabeled until its successor arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelRule {
    #[default]
    OwnCandle,
    NextCandle,
}

impl LabelRule {
    pub fn label(&self, candle: &Candle, next: Option<&Candle>) -> Option<Label> {
        match self {
            LabelRule::OwnCandle => Some(Label::from_candle(candle)),
            LabelRule::NextCandle => next.map(|n| {
                if n.close > candle.close {
                    Label::Up
                } else {
                    Label::Down
                }
            }),
        }
    }

    /// Label every candle of an ordered history.
    pub fn label_all(&self, candles: &[Candle]) -> Vec<Option<Label>> {
        candles
            .iter()
            .enumerate()
            .map(|(i, c)| self.label(c, candles.get(i + 1)))
            .collect()
    }
}

/// A stored candle together with its derived label (`None` renders as `N/A`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledCandle {
    pub candle: Candle,
    pub label: Option<Label>,
}

impl LabeledCandle {
    pub fn new(candle: Candle, label: Option<Label>) -> Self {
        Self { candle, label }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, close: f64) -> Candle {
        Candle::new(0, open, open.max(close) + 1.0, open.min(close) - 1.0, close, 10.0)
    }

    #[test]
    fn label_is_down_only_when_open_above_close() {
        assert_eq!(Label::from_candle(&candle(101.0, 100.0)), Label::Down);
        assert_eq!(Label::from_candle(&candle(100.0, 101.0)), Label::Up);
        assert_eq!(Label::from_candle(&candle(100.0, 100.0)), Label::Up);
    }

    #[test]
    fn own_candle_labeling_is_idempotent() {
        let candles: Vec<Candle> = (0..50)
            .map(|i| {
                let open = 100.0 + (i as f64 * 0.7).sin() * 3.0;
                let close = 100.0 + (i as f64 * 1.3).cos() * 3.0;
                candle(open, close)
            })
            .collect();

        let first = LabelRule::OwnCandle.label_all(&candles);
        let second = LabelRule::OwnCandle.label_all(&candles);
        assert_eq!(first, second);
        for (c, label) in candles.iter().zip(&first) {
            let expected = if c.open > c.close { 0 } else { 1 };
            assert_eq!(label.map(Label::as_target), Some(expected));
        }
    }

    #[test]
    fn next_candle_rule_leaves_last_unlabeled() {
        let candles = vec![candle(100.0, 101.0), candle(101.0, 103.0), candle(103.0, 102.0)];
        let labels = LabelRule::NextCandle.label_all(&candles);
        assert_eq!(labels, vec![Some(Label::Up), Some(Label::Down), None]);
    }

    #[test]
    fn label_from_target_rejects_other_values() {
        assert_eq!(Label::from_target(0), Some(Label::Down));
        assert_eq!(Label::from_target(1), Some(Label::Up));
        assert_eq!(Label::from_target(2), None);
    }
}
