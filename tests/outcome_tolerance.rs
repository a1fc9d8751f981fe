use candlebot::domain::{Candle, LabelRule, Outcome, TradeSignal};
use candlebot::error::CandlebotError;
use candlebot::persistence::CandleStore;
use candlebot::rl::{Action, StateKey};
use candlebot::strategy::outcome;
use chrono::DateTime;
use chrono_tz::Tz;

const ENTRY: i64 = 1_718_000_040_000;
const TOLERANCE_SECS: i64 = 60;

fn signal() -> TradeSignal {
    TradeSignal {
        entry_time: DateTime::from_timestamp_millis(ENTRY).unwrap(),
        action: Action::Up,
        hint: Action::Up,
        probability: 0.9,
        timeframe_minutes: 5,
        state: StateKey::price(100.0),
        pattern: None,
        model_accuracy: None,
    }
}

async fn store_with_exit_offset(dir: &tempfile::TempDir, offset_ms: i64) -> CandleStore {
    let store = CandleStore::new(
        dir.path().join("candles.csv"),
        Tz::Africa__Tunis,
        LabelRule::OwnCandle,
    );
    store.load().await.unwrap();
    store
        .append(Candle::new(ENTRY, 99.0, 101.0, 98.0, 100.0, 1.0))
        .await
        .unwrap();
    store
        .append(Candle::new(ENTRY + 5 * 60_000 + offset_ms, 100.0, 103.0, 99.0, 102.0, 1.0))
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn exit_candle_thirty_seconds_away_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_exit_offset(&dir, 30_000).await;

    let resolution = outcome::resolve(&store, &signal(), TOLERANCE_SECS).await.unwrap();
    assert_eq!(resolution.entry.close, 100.0);
    assert_eq!(resolution.exit.close, 102.0);
    assert_eq!(resolution.outcome, Outcome::Win);
}

#[tokio::test]
async fn exit_candle_ninety_seconds_away_does_not_resolve() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with_exit_offset(&dir, 90_000).await;

    let err = outcome::resolve(&store, &signal(), TOLERANCE_SECS).await.unwrap_err();
    match err {
        CandlebotError::CandleNotFound {
            timestamp,
            tolerance_secs,
        } => {
            assert_eq!(timestamp, signal().exit_time());
            assert_eq!(tolerance_secs, TOLERANCE_SECS);
        }
        other => panic!("expected CandleNotFound, got {other:?}"),
    }
}
