//! Per-candle feature vectors: OHLCV followed by one bit per recognized pattern.
//!
//! Pattern detection only looks at the preceding candle inside the slice being
//! built, so the first candle of any slice always has a zeroed pattern segment.

use crate::domain::Candle;

/// Number of raw OHLCV columns
pub const OHLCV_WIDTH: usize = 5;

/// Recognized patterns, in feature-column order
pub const PATTERN_NAMES: [&str; 1] = ["engulfing_bullish"];

/// Total width of one feature vector
pub const FEATURE_WIDTH: usize = OHLCV_WIDTH + PATTERN_NAMES.len();

pub type FeatureVector = [f64; FEATURE_WIDTH];

/// Bullish candle that opens below the prior low and closes above the prior
/// high, following a bearish candle.
pub fn is_bullish_engulfing(prev: &Candle, curr: &Candle) -> bool {
    curr.is_bullish()
        && prev.is_bearish()
        && curr.close > prev.high
        && curr.open < prev.low
}

/// Pattern flags for `curr`, all false when there is no preceding candle.
pub fn detect_patterns(prev: Option<&Candle>, curr: &Candle) -> [bool; PATTERN_NAMES.len()] {
    match prev {
        Some(prev) => [is_bullish_engulfing(prev, curr)],
        None => [false; PATTERN_NAMES.len()],
    }
}

/// Name of the first pattern formed by the last two candles, if any.
pub fn last_pattern(candles: &[Candle]) -> Option<&'static str> {
    let (curr, rest) = candles.split_last()?;
    let flags = detect_patterns(rest.last(), curr);
    PATTERN_NAMES
        .iter()
        .zip(flags)
        .find_map(|(name, hit)| hit.then_some(*name))
}

/// One feature vector per input candle, in input order.
pub fn build_features(candles: &[Candle]) -> Vec<FeatureVector> {
    candles
        .iter()
        .enumerate()
        .map(|(i, candle)| {
            let prev = i.checked_sub(1).map(|p| &candles[p]);
            let flags = detect_patterns(prev, candle);

            let mut row = [0.0; FEATURE_WIDTH];
            row[0] = candle.open;
            row[1] = candle.high;
            row[2] = candle.low;
            row[3] = candle.close;
            row[4] = candle.volume;
            for (slot, hit) in row[OHLCV_WIDTH..].iter_mut().zip(flags) {
                *slot = if hit { 1.0 } else { 0.0 };
            }
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(ts: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle::new(ts, open, high, low, close, 5.0)
    }

    fn engulfing_pair() -> (Candle, Candle) {
        let prev = c(0, 105.0, 106.0, 100.0, 101.0);
        let curr = c(60_000, 99.0, 108.0, 98.0, 107.0);
        (prev, curr)
    }

    #[test]
    fn engulfing_requires_all_four_conditions() {
        let (prev, curr) = engulfing_pair();
        assert!(is_bullish_engulfing(&prev, &curr));

        // current not bullish
        let mut bad = curr;
        bad.close = bad.open - 0.5;
        assert!(!is_bullish_engulfing(&prev, &bad));

        // previous not bearish
        let mut bad_prev = prev;
        bad_prev.close = bad_prev.open + 0.5;
        assert!(!is_bullish_engulfing(&bad_prev, &curr));

        // close does not clear the previous high
        let mut bad = curr;
        bad.close = prev.high;
        assert!(!is_bullish_engulfing(&prev, &bad));

        // open does not undercut the previous low
        let mut bad = curr;
        bad.open = prev.low;
        assert!(!is_bullish_engulfing(&prev, &bad));
    }

    #[test]
    fn swapped_arguments_never_both_match() {
        let samples = [
            engulfing_pair(),
            (c(0, 100.0, 101.0, 99.0, 100.5), c(1, 100.5, 102.0, 100.0, 101.5)),
            (c(0, 110.0, 111.0, 90.0, 91.0), c(1, 89.0, 112.0, 88.0, 111.5)),
        ];
        for (a, b) in samples {
            assert!(!(is_bullish_engulfing(&a, &b) && is_bullish_engulfing(&b, &a)));
        }
    }

    #[test]
    fn width_is_constant_and_first_row_has_no_pattern() {
        let (prev, curr) = engulfing_pair();
        let features = build_features(&[prev, curr]);
        assert_eq!(features.len(), 2);
        assert_eq!(features[0][OHLCV_WIDTH], 0.0);
        assert_eq!(features[1][OHLCV_WIDTH], 1.0);
        assert_eq!(features[1][..OHLCV_WIDTH], [99.0, 108.0, 98.0, 107.0, 5.0]);

        // The same candle leading a slice loses its pattern context.
        let alone = build_features(&[curr]);
        assert_eq!(alone[0][OHLCV_WIDTH], 0.0);
        assert_eq!(alone[0].len(), features[0].len());
    }

    #[test]
    fn empty_input_builds_nothing() {
        assert!(build_features(&[]).is_empty());
        assert_eq!(last_pattern(&[]), None);
    }

    #[test]
    fn last_pattern_names_engulfing() {
        let (prev, curr) = engulfing_pair();
        assert_eq!(last_pattern(&[prev, curr]), Some("engulfing_bullish"));
        assert_eq!(last_pattern(&[curr, prev]), None);
    }
}
