//! Persistence Layer
//!
//! Durable candle history (CSV) with in-memory ordered cache.

pub mod candle_store;

pub use candle_store::{CandleStore, CANDLE_HEADER, TIMESTAMP_FORMAT};
