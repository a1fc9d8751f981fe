//! Binance WebSocket adapter for closed kline (candlestick) events.
//!
//! Subscribes to `<symbol>@kline_<interval>` on the combined-stream endpoint and
//! forwards only closed klines (`x == true`) to a [`ClosedCandleSink`]. Repeated
//! deliveries of the same open time are dropped before reaching the sink.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

use super::ClosedCandleSink;
use crate::domain::Candle;
use crate::error::{CandlebotError, Result};

/// How often to send ping frames
const PING_INTERVAL_SECS: u64 = 30;

/// Maximum reconnection delay
const MAX_RECONNECT_DELAY_SECS: u64 = 60;

const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct CombinedStream<T> {
    #[serde(rename = "stream")]
    _stream: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct BinanceKlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: BinanceKlineData,
}

#[derive(Debug, Deserialize)]
struct BinanceKlineData {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

impl BinanceKlineData {
    fn to_candle(&self) -> Option<Candle> {
        let field = |name: &str, raw: &str| match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Some(v),
            _ => {
                warn!(field = name, value = raw, "unparseable kline field");
                None
            }
        };
        Some(Candle::new(
            self.open_time,
            field("open", &self.open)?,
            field("high", &self.high)?,
            field("low", &self.low)?,
            field("close", &self.close)?,
            field("volume", &self.volume)?,
        ))
    }
}

/// Parse a kline message (combined wrapper or raw event). Returns a candle
/// only for closed klines.
pub fn parse_closed_kline(text: &str) -> Option<Candle> {
    let event = serde_json::from_str::<CombinedStream<BinanceKlineEvent>>(text)
        .map(|w| w.data)
        .or_else(|_| serde_json::from_str::<BinanceKlineEvent>(text));

    match event {
        Ok(ev) if ev.kline.is_closed => {
            let candle = ev.kline.to_candle();
            if candle.is_some() {
                debug!(symbol = %ev.symbol, open_time = ev.kline.open_time, "closed kline");
            }
            candle
        }
        Ok(_) => None,
        Err(_) => {
            let preview: String = text.chars().take(120).collect();
            debug!("Unrecognized Binance kline message: {preview}");
            None
        }
    }
}

/// Binance WebSocket client for closed kline data.
pub struct BinanceKlineWebSocket {
    ws_url: String,
    symbol: String,
    interval: String,
    reconnect_delay: Duration,
    last_forwarded: AtomicI64,
}

impl BinanceKlineWebSocket {
    /// * `ws_url` - endpoint base such as `wss://stream.binance.com:9443`
    /// * `symbol` - trading pair like `BTCUSDT`
    /// * `interval` - Binance interval like `1m`
    pub fn new(ws_url: &str, symbol: &str, interval: &str) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
            symbol: symbol.to_string(),
            interval: interval.to_string(),
            reconnect_delay: Duration::from_secs(1),
            last_forwarded: AtomicI64::new(i64::MIN),
        }
    }

    pub fn build_url(&self) -> String {
        format!(
            "{}/stream?streams={}@kline_{}",
            self.ws_url,
            self.symbol.to_lowercase(),
            self.interval
        )
    }

    /// Seed the duplicate filter, typically with the last stored timestamp.
    pub fn with_last_timestamp(self, timestamp: Option<i64>) -> Self {
        if let Some(ts) = timestamp {
            self.last_forwarded.store(ts, Ordering::SeqCst);
        }
        self
    }

    /// Stream forever, reconnecting with capped backoff plus jitter.
    pub async fn run(&self, sink: Arc<dyn ClosedCandleSink>) -> Result<()> {
        let mut attempt: u32 = 0;
        let max_delay = Duration::from_secs(MAX_RECONNECT_DELAY_SECS);

        info!(
            symbol = %self.symbol,
            interval = %self.interval,
            "starting Binance kline feed"
        );

        loop {
            match self.connect_and_stream(sink.as_ref()).await {
                Ok(()) => {
                    info!("Binance kline WS connection closed normally");
                    attempt = 0;
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    error!(attempt, error = %e, "Binance kline WS error");
                }
            }

            let base_delay = self.reconnect_delay * attempt.clamp(1, 10);
            let delay = base_delay.min(max_delay);
            let jitter_range = (delay.as_millis() as u64 / 4).max(1);
            let jitter = Duration::from_millis(rand::random::<u64>() % jitter_range);
            let final_delay = delay + jitter;

            info!(delay = ?final_delay, attempt = attempt + 1, "reconnecting to Binance kline WS");
            tokio::time::sleep(final_delay).await;
        }
    }

    async fn connect_and_stream(&self, sink: &dyn ClosedCandleSink) -> Result<()> {
        let url = Url::parse(&self.build_url())
            .map_err(|e| CandlebotError::Internal(format!("Invalid WebSocket URL: {e}")))?;

        info!(%url, "connecting to Binance kline WS");
        let (ws_stream, _) = tokio::time::timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            connect_async(url.as_str()),
        )
        .await
        .map_err(|_| CandlebotError::Internal("WebSocket connection timeout".to_string()))??;
        info!("connected to Binance kline WS");

        let (mut write, mut read) = ws_stream.split();
        let mut ping_interval = interval(Duration::from_secs(PING_INTERVAL_SECS));

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(candle) = parse_closed_kline(&text) {
                                self.forward(sink, candle).await;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                error!(error = %e, "failed to send pong");
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("received close frame from Binance");
                            break;
                        }
                        Some(Err(e)) => return Err(CandlebotError::WebSocket(e)),
                        None => {
                            info!("Binance kline WS stream ended");
                            break;
                        }
                        _ => {}
                    }
                }
                _ = ping_interval.tick() => {
                    if let Err(e) = write.send(Message::Ping(vec![])).await {
                        error!(error = %e, "failed to send ping");
                        break;
                    }
                    debug!("sent ping to Binance (kline WS)");
                }
            }
        }

        Ok(())
    }

    /// Hand the candle to the sink unless its open time was already forwarded.
    /// The open time counts as forwarded only once the sink accepted it, so a
    /// failed write is retried when the exchange delivers the kline again.
    async fn forward(&self, sink: &dyn ClosedCandleSink, candle: Candle) -> bool {
        if candle.timestamp <= self.last_forwarded.load(Ordering::SeqCst) {
            debug!(timestamp = candle.timestamp, "dropping repeated kline");
            return false;
        }
        match sink.on_closed_candle(candle).await {
            Ok(_) => {
                self.last_forwarded.fetch_max(candle.timestamp, Ordering::SeqCst);
                true
            }
            Err(e) => {
                warn!(timestamp = candle.timestamp, error = %e, "failed to persist candle");
                false
            }
        }
    }
}
