use candlebot::domain::{Candle, LabelRule, Outcome};
use candlebot::error::Result;
use candlebot::ml::{Predictor, PredictorConfig, SequenceModel};
use candlebot::persistence::CandleStore;
use candlebot::rl::{Action, LastCloseEncoder, PolicyConfig, PolicyEngine, StateKey};
use candlebot::strategy::{FeatureVector, SignalConfig, SignalLoop, TradeLog, FEATURE_WIDTH};
use chrono::{DateTime, Duration};
use chrono_tz::Tz;
use std::sync::Arc;

const T0: i64 = 1_718_000_040_000;
const MIN: i64 = 60_000;
const W: usize = 20;

/// Always predicts a confident up move.
struct ConfidentUp;

impl SequenceModel for ConfidentUp {
    fn window_len(&self) -> usize {
        W
    }

    fn predict_proba(&self, window: &[FeatureVector]) -> Result<f64> {
        assert_eq!(window.len(), W);
        assert!(window.iter().all(|row| row.len() == FEATURE_WIDTH));
        Ok(0.9)
    }

    fn accuracy(&self) -> Option<f64> {
        Some(0.5)
    }
}

/// Candles 0..20 alternate bearish/bullish, 20..25 climb.
fn candle(i: i64) -> Candle {
    let ts = T0 + i * MIN;
    if i < W as i64 {
        let (open, close) = if i % 2 == 0 { (101.0, 100.0) } else { (100.0, 101.0) };
        Candle::new(ts, open, 101.5, 99.5, close, 10.0)
    } else {
        let open = 102.0 + (i - W as i64) as f64;
        Candle::new(ts, open, open + 1.5, open - 0.5, open + 1.0, 10.0)
    }
}

#[tokio::test]
async fn confident_prediction_with_greedy_policy_wins() {
    let dir = tempfile::tempdir().unwrap();
    let tz = Tz::Africa__Tunis;

    let store = Arc::new(CandleStore::new(
        dir.path().join("candles.csv"),
        tz,
        LabelRule::OwnCandle,
    ));
    store.load().await.unwrap();
    for i in 0..W as i64 {
        store.append(candle(i)).await.unwrap();
    }

    let predictor = Arc::new(Predictor::new(
        PredictorConfig::default(),
        dir.path().join("model.json"),
    ));
    predictor.install(Arc::new(ConfidentUp)).await;

    let policy = Arc::new(PolicyEngine::new(&PolicyConfig {
        exploration_rate: 0.0,
        seed: Some(42),
        ..Default::default()
    }));
    let trade_log = Arc::new(TradeLog::new(dir.path().join("trade_log.csv"), tz));
    trade_log.open().await.unwrap();

    let signal_loop = SignalLoop::new(
        SignalConfig {
            timeframes_minutes: vec![5],
            ..Default::default()
        },
        store.clone(),
        predictor,
        policy.clone(),
        Arc::new(LastCloseEncoder),
        trade_log.clone(),
        Some(7),
    );

    // The window [0, 20) is complete shortly before candle 19's open time
    // rolls over, so the entry is candle 19 and the exit is candle 24.
    let emit_at = DateTime::from_timestamp_millis(T0 + 18 * MIN + 40_000).unwrap();
    let report = signal_loop.tick(emit_at).await;
    let signal = report.signal.expect("signal emitted");
    assert_eq!(signal.action, Action::Up);
    assert_eq!(signal.hint, Action::Up);
    assert_eq!(signal.probability, 0.9);
    assert_eq!(signal.state, StateKey::price(101.0));
    assert_eq!(signal.entry_time.timestamp_millis(), T0 + 19 * MIN);
    assert_eq!(signal.exit_time().timestamp_millis(), T0 + 24 * MIN);

    for i in W as i64..25 {
        store.append(candle(i)).await.unwrap();
    }
    assert!(candle(24).close > candle(19).close);

    let resolve_at = signal.exit_time() + Duration::seconds(30);
    let report = signal_loop.tick(resolve_at).await;
    assert_eq!(report.resolved.len(), 1);
    let (resolved, outcome) = &report.resolved[0];
    assert_eq!(resolved.entry_time, signal.entry_time);
    assert_eq!(*outcome, Outcome::Win);

    // Q[s][Up] = 0 + 0.1 * (1 + 0.9 * 0 - 0)
    let q = policy.q_values(&signal.state).unwrap();
    assert_eq!(q.up, 0.1);
    assert_eq!(q.down, 0.0);

    let trades = trade_log.trades().await.unwrap();
    assert_eq!(trades[0].outcome, Outcome::Win);
    assert_eq!(trades[0].action, Action::Up);
    assert_eq!(trades[0].timeframe, 5);
    assert_eq!(trade_log.stats().await.wins, 1);
}
