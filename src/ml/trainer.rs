//! Sliding-window dataset construction and classifier fitting.
//!
//! Window `i` is the `[W, F]` feature matrix of candles `[i - W, i)` and its
//! target is the label of candle `i`. The classifier is an LSTM over the
//! window rows, trained with Adam on binary cross-entropy in mini-batches.
//! All randomness (split, init, shuffling) comes from one seed.

use chrono::Utc;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::lstm::{Adam, LstmGradients, LstmNetwork};
use crate::domain::{Candle, LabeledCandle};
use crate::error::{CandlebotError, Result};
use crate::strategy::features::{build_features, FEATURE_WIDTH};

/// Predictor / training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Number of candles per model input window
    pub window_len: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub hidden_units: usize,
    /// Fraction of windows held out for validation
    pub validation_split: f64,
    pub seed: u64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            window_len: 20,
            epochs: 10,
            batch_size: 32,
            learning_rate: 0.01,
            hidden_units: 25,
            validation_split: 0.2,
            seed: 42,
        }
    }
}

const MAX_GRAD_NORM: f64 = 5.0;

/// Feature windows (`[W, F]` each) and their binary targets
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub inputs: Vec<Array2<f64>>,
    pub targets: Vec<f64>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Summary of one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub windows: usize,
    pub train_samples: usize,
    pub validation_samples: usize,
    pub train_accuracy: f64,
    /// `None` when the history was too short to hold anything out
    pub validation_accuracy: Option<f64>,
    pub final_loss: f64,
    pub epochs: usize,
}

impl TrainingReport {
    /// Accuracy reported alongside predictions: validation if available.
    pub fn model_accuracy(&self) -> f64 {
        self.validation_accuracy.unwrap_or(self.train_accuracy)
    }
}

/// Build overlapping windows over the full history. Fails when no window can be formed.
pub fn build_windows(history: &[LabeledCandle], window_len: usize) -> Result<Dataset> {
    if window_len == 0 || history.len() <= window_len {
        return Err(CandlebotError::InsufficientHistory {
            available: history.len(),
            required: window_len + 1,
        });
    }

    let candles: Vec<Candle> = history.iter().map(|lc| lc.candle).collect();
    let features = build_features(&candles);

    let mut dataset = Dataset::default();
    for i in window_len..history.len() {
        // Unlabeled candles (next-candle rule, newest record) produce no sample.
        let Some(label) = history[i].label else {
            continue;
        };
        let rows = &features[i - window_len..i];
        let input = Array2::from_shape_fn((window_len, FEATURE_WIDTH), |(t, f)| rows[t][f]);
        dataset.inputs.push(input);
        dataset.targets.push(label.as_f64());
    }

    if dataset.is_empty() {
        return Err(CandlebotError::InsufficientHistory {
            available: history.len(),
            required: window_len + 1,
        });
    }
    Ok(dataset)
}

/// Shuffle `0..n` with `seed` and hold out `ceil(n * fraction)` indices,
/// always leaving at least one training index.
pub fn split_indices(n: usize, fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_val = ((n as f64) * fraction.clamp(0.0, 1.0)).ceil() as usize;
    let n_val = n_val.min(n.saturating_sub(1));
    let train = indices.split_off(n_val);
    (train, indices)
}

/// Per-column mean and std over every row of the given windows; constant
/// columns get std 1.
fn column_stats(windows: &[ArrayView2<f64>]) -> Result<(Array1<f64>, Array1<f64>)> {
    let stacked = ndarray::concatenate(Axis(0), windows)
        .map_err(|e| CandlebotError::Training(format!("cannot stack windows: {e}")))?;
    let mean = stacked
        .mean_axis(Axis(0))
        .ok_or_else(|| CandlebotError::Training("no rows to normalize".to_string()))?;
    let std = stacked
        .std_axis(Axis(0), 0.0)
        .mapv(|s| if s.is_finite() && s > 1e-8 { s } else { 1.0 });
    Ok((mean, std))
}

fn accuracy(net: &LstmNetwork, dataset: &Dataset, indices: &[usize]) -> Result<Option<f64>> {
    if indices.is_empty() {
        return Ok(None);
    }
    let mut correct = 0usize;
    for &i in indices {
        let p = net.predict(dataset.inputs[i].view())?;
        let predicted = if p >= 0.5 { 1.0 } else { 0.0 };
        if predicted == dataset.targets[i] {
            correct += 1;
        }
    }
    Ok(Some(correct as f64 / indices.len() as f64))
}

/// Fit an LSTM classifier on `dataset`.
pub fn fit(dataset: &Dataset, config: &PredictorConfig) -> Result<(LstmNetwork, TrainingReport)> {
    if dataset.is_empty() {
        return Err(CandlebotError::Training("empty dataset".to_string()));
    }
    let expected = (config.window_len, FEATURE_WIDTH);
    if let Some(bad) = dataset.inputs.iter().find(|x| x.dim() != expected) {
        return Err(CandlebotError::Training(format!(
            "window shape {:?} != expected {expected:?}",
            bad.dim()
        )));
    }

    let (train_idx, val_idx) = split_indices(dataset.len(), config.validation_split, config.seed);
    let train_views: Vec<ArrayView2<f64>> =
        train_idx.iter().map(|&i| dataset.inputs[i].view()).collect();
    let (mean, std) = column_stats(&train_views)?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut net = LstmNetwork::new(FEATURE_WIDTH, config.hidden_units, &mut rng);
    net.input_mean = mean;
    net.input_std = std;

    let normalized: Vec<Array2<f64>> = train_views.iter().map(|w| net.normalize(*w)).collect();
    let mut optimizer = Adam::new(&net, config.learning_rate);
    let mut order: Vec<usize> = (0..normalized.len()).collect();
    let batch_size = config.batch_size.max(1);
    let mut final_loss = f64::NAN;

    for epoch in 0..config.epochs {
        order.shuffle(&mut rng);
        let mut epoch_loss = 0.0;
        for chunk in order.chunks(batch_size) {
            let mut grads = LstmGradients::zeros_like(&net);
            for &k in chunk {
                let target = dataset.targets[train_idx[k]];
                epoch_loss += net.accumulate_gradients(normalized[k].view(), target, &mut grads);
            }
            grads.scale(1.0 / chunk.len() as f64);
            grads.clip_norm(MAX_GRAD_NORM);
            optimizer.step(&mut net, &grads);
        }
        final_loss = epoch_loss / normalized.len() as f64;
        if !final_loss.is_finite() {
            return Err(CandlebotError::Training(format!(
                "loss diverged at epoch {epoch}"
            )));
        }
        debug!(epoch, loss = final_loss, "training epoch complete");
    }

    net.validate().map_err(CandlebotError::Training)?;

    let train_accuracy = accuracy(&net, dataset, &train_idx)?.unwrap_or(0.0);
    let validation_accuracy = accuracy(&net, dataset, &val_idx)?;

    let report = TrainingReport {
        windows: dataset.len(),
        train_samples: train_idx.len(),
        validation_samples: val_idx.len(),
        train_accuracy,
        validation_accuracy,
        final_loss,
        epochs: config.epochs,
    };
    net.metadata = serde_json::json!({
        "window_len": config.window_len,
        "feature_width": FEATURE_WIDTH,
        "trained_at": Utc::now().to_rfc3339(),
        "report": report,
    });

    info!(
        windows = report.windows,
        train_accuracy = report.train_accuracy,
        validation_accuracy = ?report.validation_accuracy,
        loss = report.final_loss,
        "model fitted"
    );
    Ok((net, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Label, LabelRule};

    /// Strictly alternating up/down candles.
    fn alternating(n: usize) -> Vec<LabeledCandle> {
        let candles: Vec<Candle> = (0..n)
            .map(|i| {
                let (open, close) = if i % 2 == 0 { (100.0, 101.0) } else { (101.0, 100.0) };
                Candle::new(i as i64 * 60_000, open, 101.5, 99.5, close, 10.0)
            })
            .collect();
        let labels = LabelRule::OwnCandle.label_all(&candles);
        candles
            .into_iter()
            .zip(labels)
            .map(|(c, l)| LabeledCandle::new(c, l))
            .collect()
    }

    #[test]
    fn history_not_longer_than_window_is_rejected() {
        let err = build_windows(&alternating(20), 20).unwrap_err();
        assert!(matches!(
            err,
            CandlebotError::InsufficientHistory { available: 20, required: 21 }
        ));
    }

    #[test]
    fn windows_use_target_of_following_candle() {
        let history = alternating(25);
        let data = build_windows(&history, 20).unwrap();
        assert_eq!(data.len(), 5);
        assert!(data.inputs.iter().all(|x| x.dim() == (20, FEATURE_WIDTH)));
        for (k, target) in data.targets.iter().enumerate() {
            let i = 20 + k;
            assert_eq!(*target, history[i].label.unwrap().as_f64());
        }
        // Row 0 of window 0 is candle 0, row 19 of window 0 is candle 19.
        assert_eq!(data.inputs[0][[0, 0]], 100.0);
        assert_eq!(data.inputs[0][[19, 3]], history[19].candle.close);
        assert_eq!(data.inputs[1][[0, 0]], history[1].candle.open);
    }

    #[test]
    fn unlabeled_candles_are_skipped() {
        let mut history = alternating(22);
        history[21].label = None;
        let data = build_windows(&history, 20).unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data.targets[0], Label::Down.as_f64());
    }

    #[test]
    fn split_is_reproducible_and_eighty_twenty() {
        let (train_a, val_a) = split_indices(100, 0.2, 42);
        let (train_b, val_b) = split_indices(100, 0.2, 42);
        assert_eq!(train_a, train_b);
        assert_eq!(val_a, val_b);
        assert_eq!(train_a.len(), 80);
        assert_eq!(val_a.len(), 20);

        let (train, val) = split_indices(1, 0.2, 42);
        assert_eq!((train.len(), val.len()), (1, 0));
    }

    #[test]
    fn fit_learns_alternating_series() {
        let data = build_windows(&alternating(120), 20).unwrap();
        let config = PredictorConfig {
            epochs: 40,
            batch_size: 8,
            learning_rate: 0.02,
            hidden_units: 8,
            ..Default::default()
        };
        let (net, report) = fit(&data, &config).unwrap();
        assert_eq!(net.input_size, FEATURE_WIDTH);
        assert_eq!(net.hidden_size, 8);
        assert_eq!(net.metadata["window_len"], 20);
        assert_eq!(report.train_samples + report.validation_samples, 100);
        assert!(report.train_accuracy >= 0.95, "{report:?}");
        assert!(report.validation_accuracy.unwrap() >= 0.9, "{report:?}");
    }

    #[test]
    fn fit_is_deterministic_for_a_seed() {
        let data = build_windows(&alternating(60), 20).unwrap();
        let config = PredictorConfig {
            epochs: 3,
            hidden_units: 4,
            ..Default::default()
        };
        let (a, ra) = fit(&data, &config).unwrap();
        let (b, rb) = fit(&data, &config).unwrap();
        assert_eq!(a.w_x, b.w_x);
        assert_eq!(a.w_out, b.w_out);
        assert_eq!(ra, rb);
    }
}
