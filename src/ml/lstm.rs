//! Single-layer LSTM direction classifier.
//!
//! Gates are stacked `[input, forget, cell, output]` along the first axis of
//! `w_x` (4H x F) and `w_h` (4H x H). The hidden state after the last window
//! row feeds a sigmoid head. Inputs are z-scored per feature column with the
//! statistics stored in the artifact.

use ndarray::{s, Array, Array1, Array2, ArrayView2, Axis, Dimension, Zip};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::{CandlebotError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmNetwork {
    pub input_size: usize,
    pub hidden_size: usize,

    /// Input weights, shape [4H, F]
    pub w_x: Array2<f64>,
    /// Recurrent weights, shape [4H, H]
    pub w_h: Array2<f64>,
    /// Gate biases, shape [4H]
    pub b: Array1<f64>,

    /// Output head
    pub w_out: Array1<f64>,
    pub b_out: f64,

    /// Per-feature z-score normalization
    pub input_mean: Array1<f64>,
    pub input_std: Array1<f64>,

    /// Training info (window length, accuracy, timestamp).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Everything the backward pass needs from one time step.
struct StepCache {
    x: Array1<f64>,
    h_prev: Array1<f64>,
    c_prev: Array1<f64>,
    i: Array1<f64>,
    f: Array1<f64>,
    g: Array1<f64>,
    o: Array1<f64>,
    c: Array1<f64>,
}

impl LstmNetwork {
    pub fn new<R: Rng + ?Sized>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let h = hidden_size.max(1);
        let limit = (1.0 / h as f64).sqrt();
        let dist = Uniform::new(-limit, limit);

        let mut b = Array1::zeros(4 * h);
        // Forget gate starts open.
        b.slice_mut(s![h..2 * h]).fill(1.0);

        Self {
            input_size,
            hidden_size: h,
            w_x: Array2::random_using((4 * h, input_size), dist, rng),
            w_h: Array2::random_using((4 * h, h), dist, rng),
            b,
            w_out: Array1::random_using(h, dist, rng),
            b_out: 0.0,
            input_mean: Array1::zeros(input_size),
            input_std: Array1::ones(input_size),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let model: Self = serde_json::from_str(&content)?;
        model.validate().map_err(CandlebotError::Validation)?;
        Ok(model)
    }

    /// Write to `<path>.json.tmp` then rename over `path`, so readers never see a partial file.
    pub fn save_atomic<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(self)?)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "saved model artifact");
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        let (f, h) = (self.input_size, self.hidden_size);
        if f == 0 || h == 0 {
            return Err("input_size and hidden_size must be > 0".to_string());
        }
        let shapes = [
            ("w_x", self.w_x.shape(), vec![4 * h, f]),
            ("w_h", self.w_h.shape(), vec![4 * h, h]),
            ("b", self.b.shape(), vec![4 * h]),
            ("w_out", self.w_out.shape(), vec![h]),
            ("input_mean", self.input_mean.shape(), vec![f]),
            ("input_std", self.input_std.shape(), vec![f]),
        ];
        for (name, actual, expected) in shapes {
            if actual != expected.as_slice() {
                return Err(format!("{name} has shape {actual:?}, expected {expected:?}"));
            }
        }

        let all_finite = self
            .w_x
            .iter()
            .chain(self.w_h.iter())
            .chain(self.b.iter())
            .chain(self.w_out.iter())
            .chain(self.input_mean.iter())
            .chain(std::iter::once(&self.b_out))
            .all(|v| v.is_finite());
        if !all_finite {
            return Err("weights contain non-finite values".to_string());
        }
        if self.input_std.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err("input_std must be finite and > 0".to_string());
        }
        Ok(())
    }

    /// Apply the stored normalization to a `[T, F]` window.
    pub fn normalize(&self, window: ArrayView2<f64>) -> Array2<f64> {
        let mut x = window.to_owned();
        x -= &self.input_mean;
        x /= &self.input_std;
        x
    }

    /// P(up) for a raw `[T, F]` window.
    pub fn predict(&self, window: ArrayView2<f64>) -> Result<f64> {
        if window.ncols() != self.input_size || window.nrows() == 0 {
            return Err(CandlebotError::Validation(format!(
                "LSTM input shape {:?} does not match feature width {}",
                window.shape(),
                self.input_size
            )));
        }
        let x = self.normalize(window);
        Ok(self.forward(x.view()).0)
    }

    /// Run the recurrence over an already normalized window.
    fn forward(&self, x: ArrayView2<f64>) -> (f64, Array1<f64>, Vec<StepCache>) {
        let h = self.hidden_size;
        let mut h_t = Array1::zeros(h);
        let mut c_t = Array1::zeros(h);
        let mut steps = Vec::with_capacity(x.nrows());

        for row in x.rows() {
            let z = self.w_x.dot(&row) + self.w_h.dot(&h_t) + &self.b;
            let i = z.slice(s![0..h]).mapv(sigmoid);
            let f = z.slice(s![h..2 * h]).mapv(sigmoid);
            let g = z.slice(s![2 * h..3 * h]).mapv(f64::tanh);
            let o = z.slice(s![3 * h..]).mapv(sigmoid);

            let c = &f * &c_t + &i * &g;
            let h_next = &o * &c.mapv(f64::tanh);

            steps.push(StepCache {
                x: row.to_owned(),
                h_prev: h_t,
                c_prev: c_t,
                i,
                f,
                g,
                o,
                c: c.clone(),
            });
            h_t = h_next;
            c_t = c;
        }

        let p = sigmoid(self.w_out.dot(&h_t) + self.b_out);
        (p, h_t, steps)
    }

    /// Backpropagate binary cross-entropy through time for one normalized
    /// window, adding into `grads`. Returns the sample loss.
    pub fn accumulate_gradients(
        &self,
        x: ArrayView2<f64>,
        target: f64,
        grads: &mut LstmGradients,
    ) -> f64 {
        let h = self.hidden_size;
        let (p, h_last, steps) = self.forward(x);

        let d_logit = p - target;
        grads.w_out.scaled_add(d_logit, &h_last);
        grads.b_out += d_logit;

        let mut dh = &self.w_out * d_logit;
        let mut dc_next: Array1<f64> = Array1::zeros(h);
        let mut dz: Array1<f64> = Array1::zeros(4 * h);

        for step in steps.iter().rev() {
            let tanh_c = step.c.mapv(f64::tanh);
            let d_o = &dh * &tanh_c;
            let dc = &dc_next + &(&dh * &step.o * &tanh_c.mapv(|t| 1.0 - t * t));
            let d_f = &dc * &step.c_prev;
            let d_i = &dc * &step.g;
            let d_g = &dc * &step.i;
            dc_next = &dc * &step.f;

            dz.slice_mut(s![0..h])
                .assign(&(d_i * &step.i.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![h..2 * h])
                .assign(&(d_f * &step.f.mapv(|v| v * (1.0 - v))));
            dz.slice_mut(s![2 * h..3 * h])
                .assign(&(d_g * &step.g.mapv(|v| 1.0 - v * v)));
            dz.slice_mut(s![3 * h..])
                .assign(&(d_o * &step.o.mapv(|v| v * (1.0 - v))));

            grads.w_x += &outer(&dz, &step.x);
            grads.w_h += &outer(&dz, &step.h_prev);
            grads.b += &dz;
            dh = self.w_h.t().dot(&dz);
        }

        bce(p, target)
    }
}

/// Parameter-shaped accumulator, also used for optimizer moments.
#[derive(Debug, Clone)]
pub struct LstmGradients {
    pub w_x: Array2<f64>,
    pub w_h: Array2<f64>,
    pub b: Array1<f64>,
    pub w_out: Array1<f64>,
    pub b_out: f64,
}

impl LstmGradients {
    pub fn zeros_like(net: &LstmNetwork) -> Self {
        Self {
            w_x: Array2::zeros(net.w_x.raw_dim()),
            w_h: Array2::zeros(net.w_h.raw_dim()),
            b: Array1::zeros(net.b.raw_dim()),
            w_out: Array1::zeros(net.w_out.raw_dim()),
            b_out: 0.0,
        }
    }

    pub fn scale(&mut self, k: f64) {
        self.w_x *= k;
        self.w_h *= k;
        self.b *= k;
        self.w_out *= k;
        self.b_out *= k;
    }

    pub fn l2_norm(&self) -> f64 {
        let squares = |a: f64, v: &f64| a + v * v;
        (self.w_x.fold(0.0, squares)
            + self.w_h.fold(0.0, squares)
            + self.b.fold(0.0, squares)
            + self.w_out.fold(0.0, squares)
            + self.b_out * self.b_out)
            .sqrt()
    }

    /// Rescale so the global norm is at most `max_norm`.
    pub fn clip_norm(&mut self, max_norm: f64) {
        let norm = self.l2_norm();
        if norm.is_finite() && norm > max_norm {
            self.scale(max_norm / norm);
        }
    }
}

/// Adam optimizer over every LSTM parameter.
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: i32,
    m: LstmGradients,
    v: LstmGradients,
}

impl Adam {
    pub fn new(net: &LstmNetwork, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            m: LstmGradients::zeros_like(net),
            v: LstmGradients::zeros_like(net),
        }
    }

    pub fn step(&mut self, net: &mut LstmNetwork, grads: &LstmGradients) {
        self.t += 1;
        let hp = AdamStep {
            lr: self.learning_rate,
            beta1: self.beta1,
            beta2: self.beta2,
            epsilon: self.epsilon,
            bias1: 1.0 - self.beta1.powi(self.t),
            bias2: 1.0 - self.beta2.powi(self.t),
        };

        hp.apply(&mut net.w_x, &grads.w_x, &mut self.m.w_x, &mut self.v.w_x);
        hp.apply(&mut net.w_h, &grads.w_h, &mut self.m.w_h, &mut self.v.w_h);
        hp.apply(&mut net.b, &grads.b, &mut self.m.b, &mut self.v.b);
        hp.apply(&mut net.w_out, &grads.w_out, &mut self.m.w_out, &mut self.v.w_out);
        hp.update(&mut net.b_out, grads.b_out, &mut self.m.b_out, &mut self.v.b_out);
    }
}

struct AdamStep {
    lr: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    bias1: f64,
    bias2: f64,
}

impl AdamStep {
    fn update(&self, param: &mut f64, grad: f64, m: &mut f64, v: &mut f64) {
        *m = self.beta1 * *m + (1.0 - self.beta1) * grad;
        *v = self.beta2 * *v + (1.0 - self.beta2) * grad * grad;
        let m_hat = *m / self.bias1;
        let v_hat = *v / self.bias2;
        *param -= self.lr * m_hat / (v_hat.sqrt() + self.epsilon);
    }

    fn apply<D: Dimension>(
        &self,
        param: &mut Array<f64, D>,
        grad: &Array<f64, D>,
        m: &mut Array<f64, D>,
        v: &mut Array<f64, D>,
    ) {
        Zip::from(param)
            .and(grad)
            .and(m)
            .and(v)
            .for_each(|p, &g, m, v| self.update(p, g, m, v));
    }
}

fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let col = a.view().insert_axis(Axis(1));
    let row = b.view().insert_axis(Axis(0));
    col.dot(&row)
}

pub fn bce(p: f64, y: f64) -> f64 {
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
}

/// Numerically-stable sigmoid.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}
