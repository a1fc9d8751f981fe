pub mod adapters;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod ml;
pub mod persistence;
pub mod rl;
pub mod strategy;

pub use config::AppConfig;
pub use coordinator::{Runtime, Scheduler};
pub use domain::{Candle, Label, LabelRule, LabeledCandle, Outcome, TradeSignal};
pub use error::{CandlebotError, Result};
pub use ml::Predictor;
pub use persistence::CandleStore;
pub use rl::PolicyEngine;
pub use strategy::{SignalLoop, TradeLog};
