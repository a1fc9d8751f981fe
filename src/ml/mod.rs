//! Direction classifier: window dataset, LSTM fitting and inference.
//!
//! Models persist as JSON (`ndarray` weights plus normalization and training
//! metadata).

pub mod lstm;
pub mod predictor;
pub mod trainer;

pub use lstm::{LstmGradients, LstmNetwork};
pub use predictor::{Predictor, SequenceModel, WindowClassifier};
pub use trainer::{build_windows, fit, Dataset, PredictorConfig, TrainingReport};
