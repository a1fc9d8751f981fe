//! Runtime bootstrap: wires store, predictor, policy, trade log and scheduler
//! together from configuration, then runs the feed and cadence tasks.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use super::scheduler::Scheduler;
use crate::adapters::{BinanceKlineWebSocket, ClosedCandleSink};
use crate::config::AppConfig;
use crate::error::{CandlebotError, Result};
use crate::ml::{Predictor, TrainingReport};
use crate::persistence::CandleStore;
use crate::rl::{PolicyEngine, StateEncoder};
use crate::strategy::{SignalLoop, TradeLog};

const RESTART_NOTE: &str = "abandoned: process restarted before resolution";

pub struct Runtime {
    config: AppConfig,
    store: Arc<CandleStore>,
    predictor: Arc<Predictor>,
    policy: Arc<PolicyEngine>,
    trade_log: Arc<TradeLog>,
    scheduler: Arc<Scheduler>,
}

impl Runtime {
    /// Create directories, load persisted state and build all components.
    pub async fn bootstrap(config: AppConfig) -> Result<Self> {
        config.validate().map_err(|errors| {
            CandlebotError::Validation(format!("invalid configuration: {}", errors.join("; ")))
        })?;
        let tz = config.timezone()?;

        for path in [
            &config.paths.candle_store,
            &config.paths.model,
            &config.paths.trade_log,
        ] {
            ensure_parent(path).await?;
        }

        let store = Arc::new(CandleStore::new(
            &config.paths.candle_store,
            tz,
            config.labeling,
        ));
        store.load().await?;

        let trade_log = Arc::new(TradeLog::new(&config.paths.trade_log, tz));
        trade_log.open().await?;
        // The value table starts empty each run, so trades from a previous
        // run can no longer feed a reward into it.
        let stale = trade_log.abandon_open(RESTART_NOTE).await?;
        if stale > 0 {
            warn!(trades = stale, "closed trades left open by a previous run");
        }

        let predictor = Arc::new(Predictor::new(
            config.predictor.clone(),
            &config.paths.model,
        ));
        if let Err(e) = predictor.load().await {
            warn!(error = %e, "could not load model artifact, starting without a model");
        }

        let policy = Arc::new(PolicyEngine::new(&config.policy));
        let encoder: Arc<dyn StateEncoder> = Arc::from(config.policy.state_encoder.build());

        let signal_loop = Arc::new(SignalLoop::new(
            config.signal.clone(),
            store.clone(),
            predictor.clone(),
            policy.clone(),
            encoder,
            trade_log.clone(),
            config.policy.seed,
        ));
        let scheduler = Arc::new(Scheduler::new(
            signal_loop,
            store.clone(),
            predictor.clone(),
            tz,
            config.schedule.retrain_every_ticks,
        ));

        info!(
            candles = store.len().await,
            model_loaded = predictor.is_loaded().await,
            labeling = ?config.labeling,
            "runtime bootstrapped"
        );

        Ok(Self {
            config,
            store,
            predictor,
            policy,
            trade_log,
            scheduler,
        })
    }

    pub fn store(&self) -> &Arc<CandleStore> {
        &self.store
    }

    pub fn predictor(&self) -> &Arc<Predictor> {
        &self.predictor
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn trade_log(&self) -> &Arc<TradeLog> {
        &self.trade_log
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Train on the stored history if it is longer than one window.
    pub async fn initial_train(&self) -> Result<Option<TrainingReport>> {
        let available = self.store.len().await;
        let window_len = self.predictor.window_len();
        if available <= window_len {
            info!(available, window_len, "not enough history for initial training");
            return Ok(None);
        }
        let report = self.predictor.train(self.store.snapshot().await).await?;
        Ok(Some(report))
    }

    /// Run feed ingestion and the cadence loop until shutdown.
    pub async fn run(self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let feed_handle = if self.config.feed.enabled {
            let feed = BinanceKlineWebSocket::new(
                &self.config.feed.ws_url,
                &self.config.feed.symbol,
                &self.config.feed.interval,
            )
            .with_last_timestamp(self.store.last_timestamp().await);
            let sink: Arc<dyn ClosedCandleSink> = self.store.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = feed.run(sink).await {
                    error!(error = %e, "market data feed stopped");
                }
            }))
        } else {
            info!("market data feed disabled");
            None
        };

        match self.initial_train().await {
            Ok(Some(report)) => info!(
                windows = report.windows,
                accuracy = report.model_accuracy(),
                "initial training complete"
            ),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "initial training failed"),
        }

        self.scheduler.clone().run(shutdown_rx).await;

        if let Some(handle) = feed_handle {
            handle.abort();
        }
        let stats = self.trade_log.stats().await;
        info!(
            trades = stats.total,
            wins = stats.wins,
            losses = stats.losses,
            pending = stats.pending,
            "runtime stopped"
        );
        Ok(())
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}
