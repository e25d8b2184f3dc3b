//! Small models shared by the unit tests.

use std::{
    f64::consts::PI,
    sync::atomic::{AtomicUsize, Ordering},
};

use rand::{Rng, RngCore};
use thiserror::Error;

use crate::model::{Likelihood, LikelihoodError, Prior};

#[derive(Error, Debug)]
pub enum TestError {
    #[error("soft failure")]
    Recoverable,
    #[error("hard failure")]
    Fatal,
}

impl LikelihoodError for TestError {
    fn is_recoverable(&self) -> bool {
        matches!(self, TestError::Recoverable)
    }
}

/// Independent uniform priors on boxes.
pub struct BoxPrior {
    pub names: Vec<String>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl BoxPrior {
    pub fn new(dim: usize, lower: f64, upper: f64) -> Self {
        Self {
            names: (0..dim).map(|i| format!("x{i}")).collect(),
            lower: vec![lower; dim],
            upper: vec![upper; dim],
        }
    }
}

impl Prior for BoxPrior {
    fn names(&self) -> &[String] {
        &self.names
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Box<[f64]> {
        self.lower
            .iter()
            .zip(self.upper.iter())
            .map(|(&lo, &hi)| rng.random_range(lo..hi))
            .collect()
    }

    fn log_prob(&self, params: &[f64]) -> f64 {
        let mut logp = 0f64;
        for ((&x, &lo), &hi) in params.iter().zip(self.lower.iter()).zip(self.upper.iter()) {
            if !(lo..=hi).contains(&x) {
                return f64::NEG_INFINITY;
            }
            logp -= (hi - lo).ln();
        }
        logp
    }

    fn rescale(&self, unit: &[f64]) -> Box<[f64]> {
        unit.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(&u, (&lo, &hi))| lo + u * (hi - lo))
            .collect()
    }
}

/// Normalized isotropic normal likelihood that counts its evaluations.
pub struct NormalLikelihood {
    pub mean: Vec<f64>,
    pub sd: f64,
    pub calls: AtomicUsize,
}

impl NormalLikelihood {
    pub fn new(dim: usize, sd: f64) -> Self {
        Self {
            mean: vec![0f64; dim],
            sd,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Likelihood for NormalLikelihood {
    type Error = TestError;

    fn log_likelihood(&self, params: &[f64]) -> Result<f64, TestError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let dim = params.len() as f64;
        let quad = params
            .iter()
            .zip(self.mean.iter())
            .map(|(x, mu)| ((x - mu) / self.sd).powi(2))
            .sum::<f64>();
        Ok(-0.5 * quad - 0.5 * dim * (2. * PI * self.sd * self.sd).ln())
    }
}

/// Fails for every parameter vector whose first entry exceeds `threshold`.
pub struct FailingLikelihood {
    pub threshold: f64,
    pub recoverable: bool,
}

impl Likelihood for FailingLikelihood {
    type Error = TestError;

    fn log_likelihood(&self, params: &[f64]) -> Result<f64, TestError> {
        if params[0] > self.threshold {
            if self.recoverable {
                return Err(TestError::Recoverable);
            }
            return Err(TestError::Fatal);
        }
        Ok(0.)
    }
}
