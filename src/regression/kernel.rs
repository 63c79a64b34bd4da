//! Covariance kernels for the Gaussian-process regressor.
//!
//! Every kernel is a pure function of its two inputs and is symmetric:
//! `eval(a, b) == eval(b, a)` bit-for-bit, which keeps the assembled
//! covariance matrix exactly symmetric.

use serde::{Deserialize, Serialize};

use crate::types::CoreError;

/// Smoothness of a Matérn kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaternNu {
    /// ν = 1/2 (exponential / Ornstein–Uhlenbeck).
    Half,
    /// ν = 3/2
    ThreeHalves,
    /// ν = 5/2
    FiveHalves,
}

/// Covariance function selected at regressor construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Kernel {
    /// Radial-basis (squared exponential).
    Rbf { length_scale: f64, variance: f64 },
    Matern {
        length_scale: f64,
        variance: f64,
        nu: MaternNu,
    },
    /// `variance * (offset + a·b)`
    Linear { variance: f64, offset: f64 },
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::Rbf {
            length_scale: 1.0,
            variance: 1.0,
        }
    }
}

impl Kernel {
    /// Reject hyperparameters that cannot produce a valid covariance.
    pub fn validate(&self) -> Result<(), CoreError> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(CoreError::Config(format!("kernel {name} must be positive, got {v}")))
            }
        };
        match *self {
            Kernel::Rbf { length_scale, variance } | Kernel::Matern { length_scale, variance, .. } => {
                positive("length_scale", length_scale)?;
                positive("variance", variance)
            }
            Kernel::Linear { variance, offset } => {
                positive("variance", variance)?;
                if offset.is_finite() && offset >= 0.0 {
                    Ok(())
                } else {
                    Err(CoreError::Config(format!("kernel offset must be >= 0, got {offset}")))
                }
            }
        }
    }

    /// Covariance between two points of equal dimension.
    pub fn eval(&self, a: &[f64], b: &[f64]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        match *self {
            Kernel::Rbf { length_scale, variance } => {
                let r2 = squared_distance(a, b);
                variance * (-0.5 * r2 / (length_scale * length_scale)).exp()
            }
            Kernel::Matern { length_scale, variance, nu } => {
                let r = squared_distance(a, b).sqrt() / length_scale;
                let shape = match nu {
                    MaternNu::Half => (-r).exp(),
                    MaternNu::ThreeHalves => {
                        let s = 3f64.sqrt() * r;
                        (1.0 + s) * (-s).exp()
                    }
                    MaternNu::FiveHalves => {
                        let s = 5f64.sqrt() * r;
                        (1.0 + s + s * s / 3.0) * (-s).exp()
                    }
                };
                variance * shape
            }
            Kernel::Linear { variance, offset } => {
                let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                variance * (offset + dot)
            }
        }
    }

    /// Prior variance at a point, `k(x, x)`.
    pub fn prior_variance(&self, x: &[f64]) -> f64 {
        self.eval(x, x)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Rbf { .. } => "rbf",
            Kernel::Matern { .. } => "matern",
            Kernel::Linear { .. } => "linear",
        }
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
