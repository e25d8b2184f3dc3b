#![allow(dead_code)]

use std::f64::consts::PI;

use ptmcmc_rs::{Likelihood, LikelihoodError, Prior};
use rand::{Rng, RngCore};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {}

impl LikelihoodError for ModelError {
    fn is_recoverable(&self) -> bool {
        true
    }
}

/// Independent uniform priors on `[lower, upper]`.
pub struct UniformBox {
    names: Vec<String>,
    lower: f64,
    upper: f64,
}

impl UniformBox {
    pub fn new(dim: usize, lower: f64, upper: f64) -> Self {
        Self {
            names: (0..dim).map(|i| format!("x{i}")).collect(),
            lower,
            upper,
        }
    }
}

impl Prior for UniformBox {
    fn names(&self) -> &[String] {
        &self.names
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Box<[f64]> {
        (0..self.names.len())
            .map(|_| rng.random_range(self.lower..self.upper))
            .collect()
    }

    fn log_prob(&self, params: &[f64]) -> f64 {
        if params
            .iter()
            .all(|x| (self.lower..=self.upper).contains(x))
        {
            -(params.len() as f64) * (self.upper - self.lower).ln()
        } else {
            f64::NEG_INFINITY
        }
    }

    fn rescale(&self, unit: &[f64]) -> Box<[f64]> {
        unit.iter()
            .map(|u| self.lower + u * (self.upper - self.lower))
            .collect()
    }
}

/// Normalized isotropic normal likelihood.
pub struct Normal {
    pub mean: Vec<f64>,
    pub sd: f64,
    pub noise_evidence: Option<f64>,
}

impl Normal {
    pub fn new(mean: Vec<f64>, sd: f64) -> Self {
        Self {
            mean,
            sd,
            noise_evidence: None,
        }
    }
}

impl Likelihood for Normal {
    type Error = ModelError;

    fn log_likelihood(&self, params: &[f64]) -> Result<f64, ModelError> {
        let dim = params.len() as f64;
        let quad: f64 = params
            .iter()
            .zip(self.mean.iter())
            .map(|(x, mu)| ((x - mu) / self.sd).powi(2))
            .sum();
        Ok(-0.5 * quad - 0.5 * dim * (2. * PI * self.sd * self.sd).ln())
    }

    fn log_noise_evidence(&self) -> Option<f64> {
        self.noise_evidence
    }
}

/// Equal mixture of two narrow normals at `-offset` and `offset` in one dimension.
pub struct Bimodal {
    pub offset: f64,
    pub sd: f64,
}

impl Likelihood for Bimodal {
    type Error = ModelError;

    fn log_likelihood(&self, params: &[f64]) -> Result<f64, ModelError> {
        let x = params[0];
        let norm = -(2. * PI * self.sd * self.sd).ln() * 0.5 - 2f64.ln();
        let left = -0.5 * ((x + self.offset) / self.sd).powi(2);
        let right = -0.5 * ((x - self.offset) / self.sd).powi(2);
        let max = left.max(right);
        Ok(norm + max + ((left - max).exp() + (right - max).exp()).ln())
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Mean and sample variance of one coordinate.
pub fn moments(samples: &[Box<[f64]>], coordinate: usize) -> (f64, f64) {
    let n = samples.len() as f64;
    let mean = samples.iter().map(|s| s[coordinate]).sum::<f64>() / n;
    let var = samples
        .iter()
        .map(|s| (s[coordinate] - mean).powi(2))
        .sum::<f64>()
        / (n - 1.);
    (mean, var)
}
