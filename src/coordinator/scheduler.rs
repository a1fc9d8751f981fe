//! Whole-minute cadence driver.
//!
//! Sleeps until the next whole minute in the configured zone, runs one signal
//! loop tick, and every `retrain_every_ticks` ticks dispatches a retrain on a
//! separate task. At most one retrain runs at a time; the predictor keeps
//! serving the previous model until the new one is installed.

use chrono::{DateTime, Duration, DurationRound, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ml::Predictor;
use crate::persistence::CandleStore;
use crate::strategy::{SignalLoop, TickReport};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// IANA zone used for minute boundaries and persisted timestamps
    pub timezone: String,
    pub retrain_every_ticks: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: "Africa/Tunis".to_string(),
            retrain_every_ticks: 20,
        }
    }
}

pub struct Scheduler {
    signal_loop: Arc<SignalLoop>,
    store: Arc<CandleStore>,
    predictor: Arc<Predictor>,
    tz: Tz,
    retrain_every_ticks: u64,
    ticks: AtomicU64,
    training: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        signal_loop: Arc<SignalLoop>,
        store: Arc<CandleStore>,
        predictor: Arc<Predictor>,
        tz: Tz,
        retrain_every_ticks: u64,
    ) -> Self {
        Self {
            signal_loop,
            store,
            predictor,
            tz,
            retrain_every_ticks: retrain_every_ticks.max(1),
            ticks: AtomicU64::new(0),
            training: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::SeqCst)
    }

    /// Main cadence loop, blocks until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(tz = %self.tz, retrain_every = self.retrain_every_ticks, "scheduler started");
        loop {
            let delay = until_next_minute(Utc::now(), &self.tz);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    self.on_tick(Utc::now()).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("scheduler: shutdown signal received");
                    break;
                }
            }
        }
    }

    /// One cadence step. Returns the tick report and the retrain task, if one
    /// was dispatched.
    pub async fn on_tick(&self, now: DateTime<Utc>) -> (TickReport, Option<JoinHandle<()>>) {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(tick, %now, "tick");

        let report = self.signal_loop.tick(now).await;
        if let Some(signal) = &report.signal {
            info!(
                entry = %signal.entry_time.with_timezone(&self.tz),
                action = %signal.action,
                hint = %signal.hint,
                probability = signal.probability,
                timeframe = signal.timeframe_minutes,
                "signal emitted"
            );
        }

        let retrain = if tick % self.retrain_every_ticks == 0 {
            self.dispatch_retrain()
        } else {
            None
        };
        (report, retrain)
    }

    /// Spawn a retrain on the current history unless one is already running.
    pub fn dispatch_retrain(&self) -> Option<JoinHandle<()>> {
        if self.training.swap(true, Ordering::SeqCst) {
            debug!("retrain already in progress, skipping");
            return None;
        }

        let store = self.store.clone();
        let predictor = self.predictor.clone();
        let training = self.training.clone();
        Some(tokio::spawn(async move {
            let history = store.snapshot().await;
            info!(candles = history.len(), "retraining predictor");
            match predictor.train(history).await {
                Ok(report) => info!(
                    windows = report.windows,
                    train_accuracy = report.train_accuracy,
                    validation_accuracy = ?report.validation_accuracy,
                    "retrain complete"
                ),
                Err(e) if e.is_abstention() => info!(reason = %e, "retrain skipped"),
                Err(e) => warn!(error = %e, "retrain failed, keeping previous model"),
            }
            training.store(false, Ordering::SeqCst);
        }))
    }
}

/// Time left until the next whole minute in `tz`.
pub fn until_next_minute(now: DateTime<Utc>, tz: &Tz) -> std::time::Duration {
    let local = now.with_timezone(tz);
    let next = local
        .duration_trunc(Duration::minutes(1))
        .map(|floor| floor + Duration::minutes(1))
        .unwrap_or(local + Duration::minutes(1));
    (next - local)
        .to_std()
        .unwrap_or(std::time::Duration::from_secs(60))
}
