//! Per-tick signal generation and outcome resolution.
//!
//! Each tick fetches the latest window, asks the predictor for P(up), derives
//! the confidence hint and, unless it abstains, emits the policy's action for
//! the current state. Pending signals whose timeframe has elapsed are scored
//! against the stored candles and fed back into the policy.

use chrono::{DateTime, Duration, DurationRound, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::features::{build_features, last_pattern};
use super::outcome;
use super::trade_logger::TradeLog;
use crate::domain::{ConfidenceHint, Outcome, PendingTrade, TradeSignal};
use crate::error::{CandlebotError, Result};
use crate::ml::Predictor;
use crate::persistence::CandleStore;
use crate::rl::{PolicyEngine, StateEncoder};

/// Signal generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Up above this probability, Down below its complement
    pub confidence_threshold: f64,
    /// Candidate holding periods, one is drawn uniformly per signal
    pub timeframes_minutes: Vec<u32>,
    /// Maximum distance between a required timestamp and the candle used for it
    pub outcome_tolerance_secs: i64,
    /// Failed resolution attempts before a signal is abandoned
    pub max_resolution_attempts: u32,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            timeframes_minutes: vec![1, 2, 5],
            outcome_tolerance_secs: 60,
            max_resolution_attempts: 10,
        }
    }
}

impl SignalConfig {
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if !(self.confidence_threshold > 0.5 && self.confidence_threshold <= 1.0) {
            errors.push(format!(
                "signal.confidence_threshold must be in (0.5, 1], got {}",
                self.confidence_threshold
            ));
        }
        if self.timeframes_minutes.is_empty() || self.timeframes_minutes.contains(&0) {
            errors.push("signal.timeframes_minutes must be non-empty and positive".to_string());
        }
        if self.outcome_tolerance_secs <= 0 {
            errors.push("signal.outcome_tolerance_secs must be positive".to_string());
        }
        if self.max_resolution_attempts == 0 {
            errors.push("signal.max_resolution_attempts must be at least 1".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// What happened during one tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub signal: Option<TradeSignal>,
    /// Why no signal was emitted, when it was an abstention
    pub abstained: Option<String>,
    pub resolved: Vec<(TradeSignal, Outcome)>,
    pub abandoned: usize,
}

pub struct SignalLoop {
    config: SignalConfig,
    store: Arc<CandleStore>,
    predictor: Arc<Predictor>,
    policy: Arc<PolicyEngine>,
    encoder: Arc<dyn StateEncoder>,
    trade_log: Arc<TradeLog>,
    pending: Mutex<Vec<PendingTrade>>,
    rng: StdMutex<StdRng>,
}

impl SignalLoop {
    pub fn new(
        config: SignalConfig,
        store: Arc<CandleStore>,
        predictor: Arc<Predictor>,
        policy: Arc<PolicyEngine>,
        encoder: Arc<dyn StateEncoder>,
        trade_log: Arc<TradeLog>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            store,
            predictor,
            policy,
            encoder,
            trade_log,
            pending: Mutex::new(Vec::new()),
            rng: StdMutex::new(rng),
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Build a signal for the current window. `Ok(None)` when the confidence
    /// hint abstains; abstention errors when history or model are missing.
    pub async fn generate_signal(&self, now: DateTime<Utc>) -> Result<Option<TradeSignal>> {
        let window_len = self.predictor.window_len();
        let candles = self.store.latest(window_len).await;
        if candles.len() < window_len {
            return Err(CandlebotError::InsufficientHistory {
                available: candles.len(),
                required: window_len,
            });
        }

        let features = build_features(&candles);
        let probability = self.predictor.predict(&features).await?;

        let hint = ConfidenceHint::from_probability(probability, self.config.confidence_threshold);
        let Some(hint) = hint.direction() else {
            info!(probability, "confidence hint abstained, no signal");
            return Ok(None);
        };

        let state = self
            .encoder
            .encode(&candles)
            .ok_or_else(|| CandlebotError::Internal("state encoder produced no key".into()))?;
        let action = self.policy.choose_action(&state);

        let timeframe_minutes = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            *self
                .config
                .timeframes_minutes
                .choose(&mut *rng)
                .ok_or_else(|| CandlebotError::Validation("no timeframes configured".into()))?
        };

        let signal = TradeSignal {
            entry_time: next_whole_minute(now)?,
            action,
            hint,
            probability,
            timeframe_minutes,
            state,
            pattern: last_pattern(&candles),
            model_accuracy: self.predictor.model_accuracy().await,
        };
        if signal.policy_overrode_hint() {
            debug!(%hint, %action, "policy action differs from confidence hint");
        }
        Ok(Some(signal))
    }

    /// Write the signal to the trade log, then track it for resolution.
    pub async fn emit(&self, signal: &TradeSignal) -> Result<()> {
        self.trade_log.record_signal(signal).await?;
        self.pending.lock().await.push(PendingTrade::new(signal.clone()));
        Ok(())
    }

    /// Resolve every due signal; returns resolved signals and the number abandoned.
    pub async fn resolve_pending(&self, now: DateTime<Utc>) -> (Vec<(TradeSignal, Outcome)>, usize) {
        let mut pending = self.pending.lock().await;
        if !pending.iter().any(|p| p.is_due(now)) {
            return (Vec::new(), 0);
        }

        let latest = self.store.latest(self.predictor.window_len()).await;
        let next_state = self.encoder.encode(&latest);
        let tolerance = self.config.outcome_tolerance_secs;

        let mut resolved = Vec::new();
        let mut abandoned = 0;
        let mut keep = Vec::with_capacity(pending.len());

        for mut trade in std::mem::take(&mut *pending) {
            if !trade.is_due(now) {
                keep.push(trade);
                continue;
            }
            let signal = &trade.signal;

            match outcome::resolve(&self.store, signal, tolerance).await {
                Ok(res) => {
                    if let (Some(reward), Some(next)) = (res.outcome.reward(), next_state.as_ref()) {
                        self.policy.update(&signal.state, signal.action, reward, next);
                    }
                    info!(
                        entry = %signal.entry_time,
                        action = %signal.action,
                        entry_close = res.entry.close,
                        exit_close = res.exit.close,
                        outcome = %res.outcome,
                        "signal resolved"
                    );
                    if let Err(e) = self
                        .trade_log
                        .record_resolution(signal, res.outcome, None)
                        .await
                    {
                        warn!(error = %e, "failed to record trade outcome");
                    }
                    resolved.push((trade.signal, res.outcome));
                }
                Err(e @ CandlebotError::CandleNotFound { .. }) => {
                    trade.attempts += 1;
                    warn!(
                        entry = %signal.entry_time,
                        attempts = trade.attempts,
                        error = %e,
                        "outcome resolution deferred"
                    );
                    if trade.attempts >= self.config.max_resolution_attempts {
                        let note = format!("abandoned after {} attempts: {e}", trade.attempts);
                        warn!(entry = %signal.entry_time, "{note}");
                        if let Err(e) = self
                            .trade_log
                            .record_resolution(signal, Outcome::Pending, Some(&note))
                            .await
                        {
                            warn!(error = %e, "failed to record abandoned trade");
                        }
                        abandoned += 1;
                    } else {
                        keep.push(trade);
                    }
                }
                Err(e) => {
                    warn!(entry = %signal.entry_time, error = %e, "outcome resolution failed");
                    keep.push(trade);
                }
            }
        }

        *pending = keep;
        (resolved, abandoned)
    }

    /// Generate, emit, then resolve. Never fails; problems are logged.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        match self.generate_signal(now).await {
            Ok(Some(signal)) => match self.emit(&signal).await {
                Ok(()) => report.signal = Some(signal),
                Err(e) => warn!(error = %e, "failed to log trade signal, dropping it"),
            },
            Ok(None) => report.abstained = Some("confidence hint abstained".to_string()),
            Err(e) if e.is_abstention() => {
                info!(reason = %e, "no signal this tick");
                report.abstained = Some(e.to_string());
            }
            Err(e) => warn!(error = %e, "signal generation failed"),
        }

        let (resolved, abandoned) = self.resolve_pending(now).await;
        report.resolved = resolved;
        report.abandoned = abandoned;
        report
    }
}

/// Start of the minute following `now`.
pub fn next_whole_minute(now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let floor = now
        .duration_trunc(Duration::minutes(1))
        .map_err(|e| CandlebotError::Internal(format!("cannot truncate {now}: {e}")))?;
    Ok(floor + Duration::minutes(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candle, LabelRule};
    use crate::ml::predictor::MockSequenceModel;
    use crate::ml::PredictorConfig;
    use crate::rl::{Action, LastCloseEncoder, PolicyConfig};
    use chrono::TimeZone;
    use chrono_tz::Tz;

    const W: usize = 5;
    const T0: i64 = 1_717_200_000_000;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<CandleStore>,
        predictor: Arc<Predictor>,
        trade_log: Arc<TradeLog>,
        signal_loop: SignalLoop,
    }

    async fn fixture(candles: usize, probability: Option<f64>, config: SignalConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let tz = Tz::Africa__Tunis;

        let store = Arc::new(CandleStore::new(
            dir.path().join("candles.csv"),
            tz,
            LabelRule::OwnCandle,
        ));
        store.load().await.unwrap();
        for i in 0..candles as i64 {
            let open = 100.0 + i as f64;
            store
                .append(Candle::new(T0 + i * 60_000, open, open + 2.0, open - 1.0, open + 1.0, 1.0))
                .await
                .unwrap();
        }

        let predictor = Arc::new(Predictor::new(
            PredictorConfig {
                window_len: W,
                ..Default::default()
            },
            dir.path().join("model.json"),
        ));
        if let Some(p) = probability {
            let mut mock = MockSequenceModel::new();
            mock.expect_window_len().return_const(W);
            mock.expect_predict_proba().returning(move |_| Ok(p));
            mock.expect_accuracy().return_const(None);
            predictor.install(Arc::new(mock)).await;
        }

        let policy = Arc::new(PolicyEngine::new(&PolicyConfig {
            exploration_rate: 0.0,
            seed: Some(1),
            ..Default::default()
        }));
        let trade_log = Arc::new(TradeLog::new(dir.path().join("trades.csv"), tz));
        trade_log.open().await.unwrap();

        let signal_loop = SignalLoop::new(
            config,
            store.clone(),
            predictor.clone(),
            policy,
            Arc::new(LastCloseEncoder),
            trade_log.clone(),
            Some(9),
        );
        Fixture {
            _dir: dir,
            store,
            predictor,
            trade_log,
            signal_loop,
        }
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(ms).unwrap()
    }

    #[test]
    fn next_whole_minute_always_advances() {
        let exact = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(next_whole_minute(exact).unwrap(), exact + Duration::minutes(1));
        let mid = exact + Duration::seconds(59);
        assert_eq!(next_whole_minute(mid).unwrap(), exact + Duration::minutes(1));
    }

    #[tokio::test]
    async fn short_history_abstains() {
        let fx = fixture(W - 1, Some(0.9), SignalConfig::default()).await;
        let report = fx.signal_loop.tick(at(T0 + 10 * 60_000)).await;
        assert!(report.signal.is_none());
        assert!(report.abstained.unwrap().contains("Insufficient history"));
    }

    #[tokio::test]
    async fn missing_model_abstains() {
        let fx = fixture(W, None, SignalConfig::default()).await;
        assert!(!fx.predictor.is_loaded().await);
        let err = fx.signal_loop.generate_signal(at(T0)).await.unwrap_err();
        assert!(err.is_abstention());
        assert!(fx.signal_loop.tick(at(T0)).await.signal.is_none());
    }

    #[tokio::test]
    async fn uncertain_probability_emits_nothing() {
        let fx = fixture(W, Some(0.55), SignalConfig::default()).await;
        let report = fx.signal_loop.tick(at(T0 + W as i64 * 60_000)).await;
        assert!(report.signal.is_none());
        assert_eq!(fx.signal_loop.pending_count().await, 0);
        assert!(fx.trade_log.trades().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn policy_action_supersedes_hint() {
        let fx = fixture(W, Some(0.1), SignalConfig::default()).await;
        let now = at(T0 + W as i64 * 60_000 + 15_000);

        let signal = fx.signal_loop.generate_signal(now).await.unwrap().unwrap();
        assert_eq!(signal.hint, Action::Down);
        // Unseen state, greedy tie-break.
        assert_eq!(signal.action, Action::Up);
        assert!(signal.policy_overrode_hint());
        assert_eq!(signal.entry_time, at(T0 + (W as i64 + 1) * 60_000));
        assert!([1, 2, 5].contains(&signal.timeframe_minutes));
        assert_eq!(signal.probability, 0.1);
    }

    #[tokio::test]
    async fn unresolvable_signal_is_abandoned_after_max_attempts() {
        let config = SignalConfig {
            timeframes_minutes: vec![5],
            max_resolution_attempts: 2,
            ..Default::default()
        };
        let fx = fixture(W, Some(0.9), config).await;
        let emitted = fx
            .signal_loop
            .tick(at(T0 + W as i64 * 60_000))
            .await
            .signal
            .unwrap();
        assert_eq!(fx.signal_loop.pending_count().await, 1);

        // No candles exist around entry or exit.
        let later = emitted.exit_time() + Duration::minutes(3);
        let first = fx.signal_loop.resolve_pending(later).await;
        assert_eq!((first.0.len(), first.1), (0, 0));
        assert_eq!(fx.signal_loop.pending_count().await, 1);

        let second = fx.signal_loop.resolve_pending(later).await;
        assert_eq!(second.1, 1);
        assert_eq!(fx.signal_loop.pending_count().await, 0);

        let trades = fx.trade_log.trades().await.unwrap();
        assert_eq!(trades[0].outcome, Outcome::Pending);
        assert!(trades[0].reason.contains("abandoned after 2 attempts"));
        assert!(fx.trade_log.open_trades().await.is_empty());
        assert_eq!(fx.store.len().await, W);
    }

    #[test]
    fn config_validation_collects_errors() {
        let bad = SignalConfig {
            confidence_threshold: 0.4,
            timeframes_minutes: vec![],
            ..Default::default()
        };
        assert_eq!(bad.validate().unwrap_err().len(), 2);
        assert!(SignalConfig::default().validate().is_ok());
    }
}
