//! Strategy module
//!
//! Feature extraction, the per-tick signal loop, outcome scoring and the
//! durable trade log.

pub mod features;
pub mod outcome;
pub mod signal_loop;
pub mod trade_logger;

pub use features::{build_features, is_bullish_engulfing, FeatureVector, FEATURE_WIDTH};
pub use outcome::{evaluate_outcome, Resolution};
pub use signal_loop::{next_whole_minute, SignalConfig, SignalLoop, TickReport};
pub use trade_logger::{TradeLog, TradeLogRecord, TradeStats, TRADE_LOG_HEADER};
