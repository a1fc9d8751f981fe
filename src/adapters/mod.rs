use async_trait::async_trait;

use crate::domain::Candle;
use crate::error::Result;

pub mod binance_kline_ws;

pub use binance_kline_ws::{parse_closed_kline, BinanceKlineWebSocket};

/// Receiver of closed-candle events from a market data feed.
#[async_trait]
pub trait ClosedCandleSink: Send + Sync {
    /// Persist or consume the candle. `Ok(false)` means it was already
    /// covered by newer data and dropped.
    async fn on_closed_candle(&self, candle: Candle) -> Result<bool>;
}
