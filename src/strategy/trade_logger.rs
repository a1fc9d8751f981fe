//! Trade logging and statistics tracking

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::{Outcome, TradeSignal};
use crate::error::{CandlebotError, Result};
use crate::rl::Action;

pub const TRADE_LOG_HEADER: [&str; 9] = [
    "Entry Time",
    "Win Rate Percentage",
    "Timeframe",
    "Action",
    "Outcome",
    "Exit Time",
    "Candlestick Pattern",
    "Model Accuracy",
    "Reason",
];

const NOT_AVAILABLE: &str = "N/A";

pub const TRADE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// One row of the trade log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLogRecord {
    #[serde(rename = "Entry Time")]
    pub entry_time: String,
    /// Model probability of an up move, as a percentage
    #[serde(rename = "Win Rate Percentage")]
    pub confidence_pct: f64,
    /// Minutes
    #[serde(rename = "Timeframe")]
    pub timeframe: u32,
    #[serde(rename = "Action")]
    pub action: Action,
    #[serde(rename = "Outcome")]
    pub outcome: Outcome,
    #[serde(rename = "Exit Time")]
    pub exit_time: String,
    #[serde(rename = "Candlestick Pattern")]
    pub pattern: String,
    #[serde(rename = "Model Accuracy")]
    pub model_accuracy: String,
    #[serde(rename = "Reason")]
    pub reason: String,
}

impl TradeLogRecord {
    pub fn from_signal(signal: &TradeSignal, tz: &Tz) -> Self {
        Self {
            entry_time: format_trade_time(tz, signal.entry_time),
            confidence_pct: round2(signal.confidence_pct()),
            timeframe: signal.timeframe_minutes,
            action: signal.action,
            outcome: Outcome::Pending,
            exit_time: format_trade_time(tz, signal.exit_time()),
            pattern: signal.pattern.unwrap_or(NOT_AVAILABLE).to_string(),
            model_accuracy: signal
                .model_accuracy
                .map(|a| format!("{:.2}", a * 100.0))
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            reason: format!(
                "p_up={:.4} hint={} policy={}",
                signal.probability, signal.hint, signal.action
            ),
        }
    }
}

/// Overall trading statistics
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TradeStats {
    pub total: u32,
    pub wins: u32,
    pub losses: u32,
    pub pending: u32,
}

impl TradeStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TradeLogRecord>) -> Self {
        records.into_iter().fold(Self::default(), |mut s, r| {
            s.total += 1;
            match r.outcome {
                Outcome::Win => s.wins += 1,
                Outcome::Loss => s.losses += 1,
                Outcome::Pending => s.pending += 1,
            }
            s
        })
    }

    /// Wins over resolved trades, `None` before the first resolution.
    pub fn win_rate(&self) -> Option<f64> {
        let closed = self.wins + self.losses;
        (closed > 0).then(|| f64::from(self.wins) / f64::from(closed))
    }
}

impl fmt::Display for TradeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Trades:   {}", self.total)?;
        writeln!(f, "Wins:     {}", self.wins)?;
        writeln!(f, "Losses:   {}", self.losses)?;
        writeln!(f, "Pending:  {}", self.pending)?;
        match self.win_rate() {
            Some(rate) => write!(f, "Win rate: {:.1}%", rate * 100.0),
            None => write!(f, "Win rate: {NOT_AVAILABLE}"),
        }
    }
}

/// A logged trade that has not been resolved or abandoned yet.
#[derive(Debug, Clone)]
struct OpenTrade {
    entry_ms: i64,
    record: TradeLogRecord,
}

#[derive(Debug, Default)]
struct LogState {
    open: Vec<OpenTrade>,
    stats: TradeStats,
}

impl LogState {
    fn settle(&mut self, outcome: Outcome) {
        if outcome.is_resolved() {
            self.stats.pending = self.stats.pending.saturating_sub(1);
            match outcome {
                Outcome::Win => self.stats.wins += 1,
                _ => self.stats.losses += 1,
            }
        }
    }
}

/// Append-only trade journal.
///
/// A signal is one Pending row. Its resolution (or abandonment) is a second
/// row with the same entry time, so the file is never rewritten. Only trades
/// still awaiting a resolution row are kept in memory.
pub struct TradeLog {
    path: PathBuf,
    tz: Tz,
    state: RwLock<LogState>,
}

impl TradeLog {
    pub fn new(path: impl Into<PathBuf>, tz: Tz) -> Self {
        Self {
            path: path.into(),
            tz,
            state: RwLock::new(LogState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the journal, or create the file with its header. Returns the
    /// number of distinct trades.
    pub async fn open(&self) -> Result<usize> {
        if !tokio::fs::try_exists(&self.path).await? {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&self.path, encode(&[], true)?).await?;
            *self.state.write().await = LogState::default();
            debug!(path = %self.path.display(), "created trade log");
            return Ok(0);
        }

        let (trades, open_keys) = self.read_trades().await?;
        let stats = TradeStats::from_records(trades.iter().map(|(_, r)| r));
        let open = trades
            .into_iter()
            .filter(|(key, _)| open_keys.contains(key))
            .map(|(entry_ms, record)| OpenTrade { entry_ms, record })
            .collect();

        *self.state.write().await = LogState { open, stats };
        info!(
            path = %self.path.display(),
            trades = stats.total,
            pending = stats.pending,
            "loaded trade log"
        );
        Ok(stats.total as usize)
    }

    /// Append a freshly emitted signal as a Pending row.
    pub async fn record_signal(&self, signal: &TradeSignal) -> Result<TradeLogRecord> {
        let entry_ms = signal.entry_time.timestamp_millis();
        let record = TradeLogRecord::from_signal(signal, &self.tz);
        let mut state = self.state.write().await;

        if state.open.iter().any(|t| t.entry_ms == entry_ms) {
            return Err(CandlebotError::Validation(format!(
                "a trade entering at {} is already open",
                record.entry_time
            )));
        }
        self.append_rows(std::slice::from_ref(&record)).await?;

        state.open.push(OpenTrade {
            entry_ms,
            record: record.clone(),
        });
        state.stats.total += 1;
        state.stats.pending += 1;
        info!(
            entry = %record.entry_time,
            action = %record.action,
            timeframe = record.timeframe,
            confidence = record.confidence_pct,
            pattern = %record.pattern,
            "trade signal logged"
        );
        Ok(record)
    }

    /// Append the resolution row for `signal`. `note` is appended to the
    /// reason column. Returns `false` when no open trade matches.
    pub async fn record_resolution(
        &self,
        signal: &TradeSignal,
        outcome: Outcome,
        note: Option<&str>,
    ) -> Result<bool> {
        let entry_ms = signal.entry_time.timestamp_millis();
        let mut state = self.state.write().await;

        let Some(idx) = state.open.iter().position(|t| t.entry_ms == entry_ms) else {
            warn!(entry = %signal.entry_time, "no open trade log row to resolve");
            return Ok(false);
        };
        let row = resolution_row(&state.open[idx].record, outcome, note);
        self.append_rows(std::slice::from_ref(&row)).await?;

        state.open.remove(idx);
        state.settle(outcome);
        debug!(entry = %row.entry_time, %outcome, "trade log row resolved");
        Ok(true)
    }

    /// Close every open trade as abandoned, keeping its Pending outcome.
    pub async fn abandon_open(&self, note: &str) -> Result<usize> {
        let mut state = self.state.write().await;
        if state.open.is_empty() {
            return Ok(0);
        }
        let rows: Vec<TradeLogRecord> = state
            .open
            .iter()
            .map(|t| resolution_row(&t.record, Outcome::Pending, Some(note)))
            .collect();
        self.append_rows(&rows).await?;
        state.open.clear();
        Ok(rows.len())
    }

    /// Rows of trades still awaiting a resolution, oldest first.
    pub async fn open_trades(&self) -> Vec<TradeLogRecord> {
        self.state
            .read()
            .await
            .open
            .iter()
            .map(|t| t.record.clone())
            .collect()
    }

    pub async fn stats(&self) -> TradeStats {
        self.state.read().await.stats
    }

    /// Every trade in entry order, each with its latest row applied.
    pub async fn trades(&self) -> Result<Vec<TradeLogRecord>> {
        let (trades, _) = self.read_trades().await?;
        Ok(trades.into_iter().map(|(_, r)| r).collect())
    }

    async fn append_rows(&self, rows: &[TradeLogRecord]) -> Result<()> {
        let bytes = encode(rows, false)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }

    /// Fold the journal into one record per trade plus the keys of trades
    /// that have no resolution row yet.
    async fn read_trades(&self) -> Result<(Vec<(i64, TradeLogRecord)>, HashSet<i64>)> {
        let bytes = tokio::fs::read(&self.path).await?;
        let mut trades: Vec<(i64, TradeLogRecord)> = Vec::new();
        let mut open: HashMap<i64, usize> = HashMap::new();

        for (entry_ms, record) in decode(&self.path, &bytes)? {
            match open.remove(&entry_ms) {
                Some(idx) => trades[idx].1 = record,
                None => {
                    open.insert(entry_ms, trades.len());
                    trades.push((entry_ms, record));
                }
            }
        }
        Ok((trades, open.into_keys().collect()))
    }
}

fn resolution_row(open: &TradeLogRecord, outcome: Outcome, note: Option<&str>) -> TradeLogRecord {
    let mut row = open.clone();
    row.outcome = outcome;
    if let Some(note) = note {
        row.reason = format!("{} | {note}", row.reason);
    }
    row
}

fn encode(records: &[TradeLogRecord], with_header: bool) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    if with_header {
        writer.write_record(TRADE_LOG_HEADER)?;
    }
    for r in records {
        writer.serialize(r)?;
    }
    writer
        .into_inner()
        .map_err(|e| CandlebotError::Internal(format!("csv buffer flush failed: {e}")))
}

/// Rows with their entry instant, in file order.
fn decode(path: &Path, bytes: &[u8]) -> Result<Vec<(i64, TradeLogRecord)>> {
    let display = path.display().to_string();
    let mut reader = csv::Reader::from_reader(bytes);
    let headers = reader.headers()?.clone();
    if headers.iter().ne(TRADE_LOG_HEADER) {
        return Err(CandlebotError::format(
            &display,
            1,
            format!("expected header {:?}", TRADE_LOG_HEADER),
        ));
    }

    let mut rows = Vec::new();
    for row in reader.records() {
        let row = row?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        let record: TradeLogRecord = row
            .deserialize(Some(&headers))
            .map_err(|e| CandlebotError::format(&display, line, e.to_string()))?;
        let entry_ms = parse_trade_time(&record.entry_time)
            .map_err(|reason| CandlebotError::format(&display, line, reason))?;
        rows.push((entry_ms, record));
    }
    Ok(rows)
}

/// Local time with its UTC offset, so repeated wall-clock hours stay distinct.
pub fn format_trade_time(tz: &Tz, at: DateTime<Utc>) -> String {
    at.with_timezone(tz).format(TRADE_TIME_FORMAT).to_string()
}

pub fn parse_trade_time(s: &str) -> std::result::Result<i64, String> {
    DateTime::parse_from_str(s.trim(), TRADE_TIME_FORMAT)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| format!("invalid Entry Time '{s}': {e}"))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
