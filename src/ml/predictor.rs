//! Direction predictor: owns the current model and swaps in retrained ones.
//!
//! Training runs on the blocking pool. A new model becomes visible only after
//! fitting and the atomic artifact write have both succeeded, so `predict`
//! sees either the previous model or the new one, never a partial state.

use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::lstm::LstmNetwork;
use super::trainer::{build_windows, fit, PredictorConfig, TrainingReport};
use crate::domain::LabeledCandle;
use crate::error::{CandlebotError, Result};
use crate::strategy::features::{FeatureVector, FEATURE_WIDTH};

/// A fitted model mapping a window of feature vectors to P(up).
#[cfg_attr(test, mockall::automock)]
pub trait SequenceModel: Send + Sync {
    /// Number of feature vectors the model expects per prediction.
    fn window_len(&self) -> usize;

    fn predict_proba(&self, window: &[FeatureVector]) -> Result<f64>;

    /// Held-out accuracy recorded at training time, if known.
    fn accuracy(&self) -> Option<f64>;
}

/// LSTM applied to a `[window_len, FEATURE_WIDTH]` window.
#[derive(Debug, Clone)]
pub struct WindowClassifier {
    network: LstmNetwork,
    window_len: usize,
    accuracy: Option<f64>,
}

impl WindowClassifier {
    pub fn new(network: LstmNetwork, window_len: usize, accuracy: Option<f64>) -> Result<Self> {
        if network.input_size != FEATURE_WIDTH || window_len == 0 {
            return Err(CandlebotError::Validation(format!(
                "model input width {} does not fit window {window_len} x {FEATURE_WIDTH}",
                network.input_size
            )));
        }
        Ok(Self {
            network,
            window_len,
            accuracy,
        })
    }

    /// Load a persisted artifact; window length and accuracy come from its metadata.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let network = LstmNetwork::from_file(path)?;
        let window_len = network
            .metadata
            .get("window_len")
            .and_then(|v| v.as_u64())
            .map(|w| w as usize)
            .ok_or_else(|| {
                CandlebotError::Validation("model metadata has no window_len".to_string())
            })?;
        let accuracy = network
            .metadata
            .pointer("/report/validation_accuracy")
            .and_then(|v| v.as_f64())
            .or_else(|| {
                network
                    .metadata
                    .pointer("/report/train_accuracy")
                    .and_then(|v| v.as_f64())
            });
        Self::new(network, window_len, accuracy)
    }

    pub fn network(&self) -> &LstmNetwork {
        &self.network
    }
}

impl SequenceModel for WindowClassifier {
    fn window_len(&self) -> usize {
        self.window_len
    }

    fn predict_proba(&self, window: &[FeatureVector]) -> Result<f64> {
        let input = Array2::from_shape_fn((window.len(), FEATURE_WIDTH), |(t, f)| window[t][f]);
        Ok(self.network.predict(input.view())?.clamp(0.0, 1.0))
    }

    fn accuracy(&self) -> Option<f64> {
        self.accuracy
    }
}

pub struct Predictor {
    config: PredictorConfig,
    model_path: PathBuf,
    model: RwLock<Option<Arc<dyn SequenceModel>>>,
}

impl Predictor {
    pub fn new(config: PredictorConfig, model_path: impl Into<PathBuf>) -> Self {
        Self {
            config,
            model_path: model_path.into(),
            model: RwLock::new(None),
        }
    }

    pub fn window_len(&self) -> usize {
        self.config.window_len
    }

    /// Load the persisted artifact if one exists. Returns whether a model is now loaded.
    pub async fn load(&self) -> Result<bool> {
        if !tokio::fs::try_exists(&self.model_path).await.unwrap_or(false) {
            info!(path = %self.model_path.display(), "no model artifact yet");
            return Ok(false);
        }
        let path = self.model_path.clone();
        let classifier = tokio::task::spawn_blocking(move || WindowClassifier::from_file(path))
            .await
            .map_err(|e| CandlebotError::Internal(format!("model load task failed: {e}")))??;

        if classifier.window_len() != self.config.window_len {
            warn!(
                artifact = classifier.window_len(),
                configured = self.config.window_len,
                "model artifact window length differs from configuration; ignoring it"
            );
            return Ok(false);
        }
        info!(path = %self.model_path.display(), accuracy = ?classifier.accuracy(), "model loaded");
        self.install(Arc::new(classifier)).await;
        Ok(true)
    }

    /// Replace the active model.
    pub async fn install(&self, model: Arc<dyn SequenceModel>) {
        *self.model.write().await = Some(model);
    }

    pub async fn is_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }

    pub async fn model_accuracy(&self) -> Option<f64> {
        self.model.read().await.as_ref().and_then(|m| m.accuracy())
    }

    /// P(next interval closes higher than it opened) for exactly `window_len` vectors.
    pub async fn predict(&self, window: &[FeatureVector]) -> Result<f64> {
        let model = self
            .model
            .read()
            .await
            .clone()
            .ok_or(CandlebotError::ModelNotLoaded)?;
        if window.len() != model.window_len() {
            return Err(CandlebotError::Validation(format!(
                "prediction window has {} vectors, model expects {}",
                window.len(),
                model.window_len()
            )));
        }
        model.predict_proba(window)
    }

    /// Fit on the full labeled history, persist, then swap the new model in.
    pub async fn train(&self, history: Vec<LabeledCandle>) -> Result<TrainingReport> {
        let config = self.config.clone();
        let path = self.model_path.clone();

        let (classifier, report) = tokio::task::spawn_blocking(move || {
            let dataset = build_windows(&history, config.window_len)?;
            let (network, report) = fit(&dataset, &config)?;
            network.save_atomic(&path)?;
            let classifier =
                WindowClassifier::new(network, config.window_len, Some(report.model_accuracy()))?;
            Ok::<_, CandlebotError>((classifier, report))
        })
        .await
        .map_err(|e| CandlebotError::Internal(format!("training task failed: {e}")))??;

        self.install(Arc::new(classifier)).await;
        info!(
            path = %self.model_path.display(),
            accuracy = report.model_accuracy(),
            "retrained model installed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candle, LabelRule};

    fn history(n: usize) -> Vec<LabeledCandle> {
        let candles: Vec<Candle> = (0..n)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.4).sin();
                let close = if i % 3 == 0 { base - 0.5 } else { base + 0.5 };
                Candle::new(i as i64 * 60_000, base, base + 1.0, base - 1.0, close, 3.0)
            })
            .collect();
        let labels = LabelRule::OwnCandle.label_all(&candles);
        candles
            .into_iter()
            .zip(labels)
            .map(|(c, l)| LabeledCandle::new(c, l))
            .collect()
    }

    fn small_config() -> PredictorConfig {
        PredictorConfig {
            window_len: 5,
            epochs: 2,
            hidden_units: 4,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn predict_without_model_reports_not_loaded() {
        let predictor = Predictor::new(small_config(), "/nonexistent/model.json");
        let window = vec![[0.0; FEATURE_WIDTH]; 5];
        assert!(matches!(
            predictor.predict(&window).await,
            Err(CandlebotError::ModelNotLoaded)
        ));
        assert!(!predictor.load().await.unwrap());
    }

    #[tokio::test]
    async fn installed_model_is_used() {
        let mut mock = MockSequenceModel::new();
        mock.expect_window_len().return_const(5usize);
        mock.expect_predict_proba().returning(|_| Ok(0.9));
        mock.expect_accuracy().return_const(Some(0.7));

        let predictor = Predictor::new(small_config(), "/nonexistent/model.json");
        predictor.install(Arc::new(mock)).await;

        let window = vec![[1.0; FEATURE_WIDTH]; 5];
        assert_eq!(predictor.predict(&window).await.unwrap(), 0.9);
        assert_eq!(predictor.model_accuracy().await, Some(0.7));
        assert!(predictor.predict(&window[..4]).await.is_err());
    }

    #[tokio::test]
    async fn train_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("model.json");
        let predictor = Predictor::new(small_config(), &path);

        let report = predictor.train(history(40)).await.unwrap();
        assert_eq!(report.windows, 35);
        assert!(predictor.is_loaded().await);
        assert!(path.exists());

        let window = vec![[100.0, 101.0, 99.0, 100.5, 3.0, 0.0]; 5];
        let p = predictor.predict(&window).await.unwrap();
        assert!((0.0..=1.0).contains(&p));

        let reloaded = Predictor::new(small_config(), &path);
        assert!(reloaded.load().await.unwrap());
        let q = reloaded.predict(&window).await.unwrap();
        assert!((p - q).abs() < 1e-12, "{p} vs {q}");
    }

    #[tokio::test]
    async fn train_on_short_history_fails_and_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let predictor = Predictor::new(small_config(), dir.path().join("model.json"));
        let err = predictor.train(history(5)).await.unwrap_err();
        assert!(matches!(err, CandlebotError::InsufficientHistory { .. }));
        assert!(!predictor.is_loaded().await);
    }
}
