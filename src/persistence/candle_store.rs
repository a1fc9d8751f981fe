//! Durable candle history backed by a CSV file.
//!
//! Columns: `Timestamp, Open, High, Low, Close, Volume, Target`. Timestamps are
//! written as local calendar strings in the configured zone at second
//! resolution. `Target` is `N/A` until a label exists, then `0` or `1`.
//!
//! The in-memory history and the file are mutated under one write lock, so a
//! reader never observes an appended candle without its label.

use async_trait::async_trait;
use chrono::{LocalResult, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::adapters::ClosedCandleSink;
use crate::domain::{Candle, Label, LabelRule, LabeledCandle};
use crate::error::{CandlebotError, Result};

pub const CANDLE_HEADER: [&str; 7] = [
    "Timestamp", "Open", "High", "Low", "Close", "Volume", "Target",
];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NO_TARGET: &str = "N/A";

#[derive(Debug, Serialize, Deserialize)]
struct CandleRow {
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "Open")]
    open: f64,
    #[serde(rename = "High")]
    high: f64,
    #[serde(rename = "Low")]
    low: f64,
    #[serde(rename = "Close")]
    close: f64,
    #[serde(rename = "Volume")]
    volume: f64,
    #[serde(rename = "Target")]
    target: String,
}

pub struct CandleStore {
    path: PathBuf,
    tz: Tz,
    rule: LabelRule,
    history: RwLock<Vec<LabeledCandle>>,
}

impl CandleStore {
    pub fn new(path: impl Into<PathBuf>, tz: Tz, rule: LabelRule) -> Self {
        Self {
            path: path.into(),
            tz,
            rule,
            history: RwLock::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn label_rule(&self) -> LabelRule {
        self.rule
    }

    /// Rebuild the in-memory history from the file, creating it with a header
    /// if it does not exist. Any malformed row aborts the load.
    pub async fn load(&self) -> Result<usize> {
        if !tokio::fs::try_exists(&self.path).await? {
            ensure_parent(&self.path).await?;
            tokio::fs::write(&self.path, header_line()?).await?;
            info!(path = %self.path.display(), "created empty candle store");
            *self.history.write().await = Vec::new();
            return Ok(0);
        }

        let bytes = tokio::fs::read(&self.path).await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            tokio::fs::write(&self.path, header_line()?).await?;
            *self.history.write().await = Vec::new();
            return Ok(0);
        }
        let candles = self.parse(&bytes)?;
        let labels = self.rule.label_all(&candles);
        let history: Vec<LabeledCandle> = candles
            .into_iter()
            .zip(labels)
            .map(|(c, l)| LabeledCandle::new(c, l))
            .collect();

        let count = history.len();
        *self.history.write().await = history;
        info!(path = %self.path.display(), candles = count, "candle store loaded");
        Ok(count)
    }

    fn parse(&self, bytes: &[u8]) -> Result<Vec<Candle>> {
        let path = self.path.display().to_string();
        let mut reader = csv::Reader::from_reader(bytes);

        let headers = reader.headers()?.clone();
        if headers.iter().map(str::trim).ne(CANDLE_HEADER) {
            return Err(CandlebotError::format(
                &path,
                1,
                format!("expected header {:?}", CANDLE_HEADER),
            ));
        }

        let mut candles: Vec<Candle> = Vec::new();
        for record in reader.records() {
            let record = record?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);
            let row: CandleRow = record
                .deserialize(Some(&headers))
                .map_err(|e| CandlebotError::format(&path, line, e.to_string()))?;

            match row.target.trim() {
                NO_TARGET | "0" | "1" => {}
                other => {
                    return Err(CandlebotError::format(
                        &path,
                        line,
                        format!("invalid Target '{other}'"),
                    ))
                }
            }

            let after = candles.last().map(|c| c.timestamp);
            let timestamp = parse_local(&self.tz, row.timestamp.trim(), after)
                .map_err(|reason| CandlebotError::format(&path, line, reason))?;
            if let Some(prev) = candles.last() {
                if timestamp <= prev.timestamp {
                    return Err(CandlebotError::format(
                        &path,
                        line,
                        "timestamps are not strictly increasing",
                    ));
                }
            }
            candles.push(Candle::new(
                timestamp, row.open, row.high, row.low, row.close, row.volume,
            ));
        }
        Ok(candles)
    }

    /// Append a closed candle. Returns `false` when the candle is not newer than
    /// the last stored one and was dropped.
    pub async fn append(&self, candle: Candle) -> Result<bool> {
        let mut history = self.history.write().await;

        if let Some(last) = history.last() {
            if candle.timestamp <= last.candle.timestamp {
                debug!(
                    timestamp = candle.timestamp,
                    last = last.candle.timestamp,
                    "dropping duplicate or out-of-order candle"
                );
                return Ok(false);
            }
        }

        let labeled = LabeledCandle::new(candle, self.rule.label(&candle, None));
        match self.rule {
            LabelRule::OwnCandle => {
                let line = self.encode_rows(std::slice::from_ref(&labeled), false)?;
                let mut file = tokio::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .await?;
                file.write_all(&line).await?;
                file.flush().await?;
                history.push(labeled);
            }
            LabelRule::NextCandle => {
                // The previous record's label depends on this candle, so the
                // file is rewritten rather than appended to.
                let mut next = history.clone();
                if let Some(prev) = next.last_mut() {
                    prev.label = self.rule.label(&prev.candle, Some(&candle));
                }
                next.push(labeled);
                self.rewrite(&next).await?;
                *history = next;
            }
        }

        debug!(timestamp = candle.timestamp, close = candle.close, "candle appended");
        Ok(true)
    }

    async fn rewrite(&self, history: &[LabeledCandle]) -> Result<()> {
        let bytes = self.encode_rows(history, true)?;
        let tmp = self.path.with_extension("csv.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn encode_rows(&self, rows: &[LabeledCandle], with_header: bool) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(with_header)
            .from_writer(Vec::new());
        if with_header && rows.is_empty() {
            writer.write_record(CANDLE_HEADER)?;
        }
        for lc in rows {
            writer.serialize(CandleRow {
                timestamp: format_local(&self.tz, lc.candle.timestamp),
                open: lc.candle.open,
                high: lc.candle.high,
                low: lc.candle.low,
                close: lc.candle.close,
                volume: lc.candle.volume,
                target: target_str(lc.label),
            })?;
        }
        writer
            .into_inner()
            .map_err(|e| CandlebotError::Internal(format!("csv buffer flush failed: {e}")))
    }

    /// Last `n` candles in arrival order; fewer if history is shorter.
    pub async fn latest(&self, n: usize) -> Vec<Candle> {
        let history = self.history.read().await;
        let start = history.len().saturating_sub(n);
        history[start..].iter().map(|lc| lc.candle).collect()
    }

    /// Full labeled history, used for training.
    pub async fn snapshot(&self) -> Vec<LabeledCandle> {
        self.history.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.history.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.history.read().await.is_empty()
    }

    pub async fn last_timestamp(&self) -> Option<i64> {
        self.history.read().await.last().map(|lc| lc.candle.timestamp)
    }

    /// Candle whose open timestamp is nearest to `timestamp_ms`, provided the
    /// distance is strictly less than `tolerance_ms`.
    pub async fn find_near(&self, timestamp_ms: i64, tolerance_ms: i64) -> Option<Candle> {
        let history = self.history.read().await;
        let idx = history.partition_point(|lc| lc.candle.timestamp < timestamp_ms);

        [idx.checked_sub(1), Some(idx)]
            .into_iter()
            .flatten()
            .filter_map(|i| history.get(i))
            .map(|lc| lc.candle)
            .filter(|c| (c.timestamp - timestamp_ms).abs() < tolerance_ms)
            .min_by_key(|c| (c.timestamp - timestamp_ms).abs())
    }
}

#[async_trait]
impl ClosedCandleSink for CandleStore {
    async fn on_closed_candle(&self, candle: Candle) -> Result<bool> {
        self.append(candle).await
    }
}

fn header_line() -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CANDLE_HEADER)?;
    writer
        .into_inner()
        .map_err(|e| CandlebotError::Internal(format!("csv buffer flush failed: {e}")))
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

fn target_str(label: Option<Label>) -> String {
    match label {
        Some(l) => l.as_target().to_string(),
        None => NO_TARGET.to_string(),
    }
}

pub fn format_local(tz: &Tz, timestamp_ms: i64) -> String {
    match tz.timestamp_millis_opt(timestamp_ms).single() {
        Some(dt) => dt.format(TIMESTAMP_FORMAT).to_string(),
        None => timestamp_ms.to_string(),
    }
}

/// Parse a local timestamp. A wall-clock time repeated by a DST fall-back
/// resolves to its second occurrence once the first is not after `after`.
pub fn parse_local(tz: &Tz, s: &str, after: Option<i64>) -> std::result::Result<i64, String> {
    let naive = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map_err(|e| format!("invalid Timestamp '{s}': {e}"))?;
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.timestamp_millis()),
        LocalResult::Ambiguous(early, late) => {
            let early = early.timestamp_millis();
            if after.is_some_and(|prev| early <= prev) {
                Ok(late.timestamp_millis())
            } else {
                Ok(early)
            }
        }
        LocalResult::None => Err(format!("Timestamp '{s}' does not exist in {tz}")),
    }
}
