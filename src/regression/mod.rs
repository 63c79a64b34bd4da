//! Gaussian-process kernel regressor.
//!
//! Fits a zero-mean GP to mean-centred targets. The noisy covariance matrix
//! `K + σ²I` is Cholesky-factored once per `fit`; every `predict` reuses the
//! factor through two triangular solves, so a prediction costs O(n²) and
//! the matrix is never inverted.

pub mod kernel;

use ndarray::{Array1, Array2};
use tracing::{debug, info};

use crate::types::{CoreError, FeatureVector, RegressionEstimate};
pub use kernel::{Kernel, MaternNu};

/// Pivots at or below this fraction of their diagonal entry are treated
/// as a loss of positive-definiteness.
const PIVOT_TOLERANCE: f64 = 1e-12;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Kernel regressor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelConfig {
    pub kernel: Kernel,
    /// Observation noise variance added to the diagonal.
    pub noise: f64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            kernel: Kernel::default(),
            noise: 1e-6,
        }
    }
}

// ---------------------------------------------------------------------------
// Regressor
// ---------------------------------------------------------------------------

/// State produced by a successful `fit`.
#[derive(Debug, Clone)]
struct Fitted {
    inputs: Vec<Vec<f64>>,
    /// Lower-triangular Cholesky factor of `K + σ²I`.
    chol: Array2<f64>,
    /// `(K + σ²I)⁻¹ (y - ȳ)`
    alpha: Array1<f64>,
    y_mean: f64,
    log_marginal_likelihood: f64,
}

/// Gaussian-process regressor over named feature vectors.
#[derive(Debug, Clone)]
pub struct KernelRegressor {
    config: KernelConfig,
    fitted: Option<Fitted>,
}

impl KernelRegressor {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            fitted: None,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn kernel(&self) -> Kernel {
        self.config.kernel
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    /// Number of stored training points (0 before `fit`).
    pub fn training_size(&self) -> usize {
        self.fitted.as_ref().map_or(0, |f| f.inputs.len())
    }

    /// Store training data and factor the noisy covariance matrix.
    ///
    /// On error the previous fit (if any) is left untouched.
    pub fn fit(&mut self, x: &[FeatureVector], y: &[f64]) -> Result<(), CoreError> {
        self.config.kernel.validate()?;
        if !self.config.noise.is_finite() || self.config.noise < 0.0 {
            return Err(CoreError::Config(format!(
                "noise must be >= 0, got {}",
                self.config.noise
            )));
        }
        if x.is_empty() {
            return Err(CoreError::InvalidInput("cannot fit on an empty training set".into()));
        }
        if x.len() != y.len() {
            return Err(CoreError::InvalidInput(format!(
                "{} feature vectors but {} targets",
                x.len(),
                y.len()
            )));
        }
        let dim = x[0].len();
        if let Some(bad) = x.iter().position(|v| v.len() != dim) {
            return Err(CoreError::InvalidInput(format!(
                "training point {bad} has {} features, expected {dim}",
                x[bad].len()
            )));
        }
        if let Some(bad) = y.iter().position(|v| !v.is_finite()) {
            return Err(CoreError::InvalidInput(format!("target {bad} is not finite")));
        }

        let n = x.len();
        let inputs: Vec<Vec<f64>> = x.iter().map(|v| v.values().to_vec()).collect();
        let kernel = self.config.kernel;

        let mut cov = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..=i {
                let k = kernel.eval(&inputs[i], &inputs[j]);
                cov[[i, j]] = k;
                cov[[j, i]] = k;
            }
            cov[[i, i]] += self.config.noise;
        }

        let chol = cholesky(&cov)?;

        let y_mean = y.iter().sum::<f64>() / n as f64;
        let centred = Array1::from_iter(y.iter().map(|v| v - y_mean));
        let z = forward_substitute(&chol, &centred);
        let alpha = backward_substitute(&chol, &z);

        let data_fit = centred.dot(&alpha);
        let log_det: f64 = (0..n).map(|i| chol[[i, i]].ln()).sum();
        let log_marginal_likelihood =
            -0.5 * data_fit - log_det - 0.5 * n as f64 * (2.0 * std::f64::consts::PI).ln();

        debug!(
            kernel = kernel.name(),
            points = n,
            dim,
            lml = log_marginal_likelihood,
            "Kernel regressor fitted"
        );

        self.fitted = Some(Fitted {
            inputs,
            chol,
            alpha,
            y_mean,
            log_marginal_likelihood,
        });
        Ok(())
    }

    /// Predictive mean and variance at `x`.
    pub fn predict(&self, x: &FeatureVector) -> Result<RegressionEstimate, CoreError> {
        let fitted = self.fitted.as_ref().ok_or(CoreError::NotFitted)?;
        let dim = fitted.inputs[0].len();
        if x.len() != dim {
            return Err(CoreError::InvalidInput(format!(
                "query has {} features, model was fitted on {dim}",
                x.len()
            )));
        }

        let kernel = self.config.kernel;
        let point = x.values();
        let k_star = Array1::from_iter(fitted.inputs.iter().map(|xi| kernel.eval(xi, point)));

        let mean = fitted.y_mean + k_star.dot(&fitted.alpha);
        let v = forward_substitute(&fitted.chol, &k_star);
        let variance = (kernel.prior_variance(point) - v.dot(&v)).max(0.0);

        Ok(RegressionEstimate { mean, variance })
    }

    /// Predict several points against the same factorisation.
    pub fn predict_many(&self, xs: &[FeatureVector]) -> Result<Vec<RegressionEstimate>, CoreError> {
        xs.iter().map(|x| self.predict(x)).collect()
    }

    /// Log marginal likelihood of the training targets under the fitted model.
    pub fn log_marginal_likelihood(&self) -> Result<f64, CoreError> {
        self.fitted
            .as_ref()
            .map(|f| f.log_marginal_likelihood)
            .ok_or(CoreError::NotFitted)
    }

    /// Fit every candidate kernel and keep the one whose marginal
    /// likelihood is highest.
    ///
    /// Candidates whose covariance is not positive-definite are skipped;
    /// if none can be fitted the last error is returned.
    pub fn select_best(
        candidates: &[Kernel],
        noise: f64,
        x: &[FeatureVector],
        y: &[f64],
    ) -> Result<Self, CoreError> {
        let mut best: Option<(f64, KernelRegressor)> = None;
        let mut last_err = CoreError::InvalidInput("no candidate kernels supplied".into());

        for kernel in candidates {
            let mut model = KernelRegressor::new(KernelConfig {
                kernel: *kernel,
                noise,
            });
            match model.fit(x, y) {
                Ok(()) => {
                    let lml = model.log_marginal_likelihood()?;
                    debug!(kernel = kernel.name(), lml, "Candidate kernel fitted");
                    if best.as_ref().map_or(true, |(b, _)| lml > *b) {
                        best = Some((lml, model));
                    }
                }
                Err(e) => {
                    debug!(kernel = kernel.name(), error = %e, "Candidate kernel rejected");
                    last_err = e;
                }
            }
        }

        match best {
            Some((lml, model)) => {
                info!(kernel = model.kernel().name(), lml, "Kernel selected");
                Ok(model)
            }
            None => Err(last_err),
        }
    }
}

// ---------------------------------------------------------------------------
// Linear algebra
// ---------------------------------------------------------------------------

/// Lower-triangular `L` with `L Lᵀ = a`.
fn cholesky(a: &Array2<f64>) -> Result<Array2<f64>, CoreError> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for j in 0..n {
        let mut pivot = a[[j, j]];
        for k in 0..j {
            pivot -= l[[j, k]] * l[[j, k]];
        }
        if !pivot.is_finite() || pivot <= PIVOT_TOLERANCE * a[[j, j]].abs() {
            return Err(CoreError::NumericalInstability { pivot: j, value: pivot });
        }
        let diag = pivot.sqrt();
        l[[j, j]] = diag;
        for i in (j + 1)..n {
            let mut s = a[[i, j]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = s / diag;
        }
    }
    Ok(l)
}

/// Solve `L z = b` for lower-triangular `L`.
fn forward_substitute(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut s = b[i];
        for k in 0..i {
            s -= l[[i, k]] * z[k];
        }
        z[i] = s / l[[i, i]];
    }
    z
}

/// Solve `Lᵀ x = z` for lower-triangular `L`.
fn backward_substitute(l: &Array2<f64>, z: &Array1<f64>) -> Array1<f64> {
    let n = z.len();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut s = z[i];
        for k in (i + 1)..n {
            s -= l[[k, i]] * x[k];
        }
        x[i] = s / l[[i, i]];
    }
    x
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
