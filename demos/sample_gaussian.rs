//! Sample a correlated two dimensional normal distribution with a small
//! tempered ensemble.
//!
//! Run with `RUST_LOG=info cargo run --release --example sample_gaussian [checkpoint.json]`.
//! With a checkpoint path the run can be interrupted and resumed.

use std::{f64::consts::PI, path::PathBuf, time::Duration};

use anyhow::Result;
use ptmcmc_rs::{Likelihood, LikelihoodError, Prior, Sampler, Settings};
use rand::{Rng, RngCore};
use thiserror::Error;

#[derive(Error, Debug)]
enum ModelError {}

impl LikelihoodError for ModelError {
    fn is_recoverable(&self) -> bool {
        true
    }
}

/// Normal distribution with unit variances and correlation `rho`.
struct CorrelatedNormal {
    rho: f64,
}

impl Likelihood for CorrelatedNormal {
    type Error = ModelError;

    fn log_likelihood(&self, params: &[f64]) -> Result<f64, ModelError> {
        let (x, y) = (params[0], params[1]);
        let det = 1. - self.rho * self.rho;
        let quad = (x * x - 2. * self.rho * x * y + y * y) / det;
        Ok(-0.5 * quad - (2. * PI).ln() - 0.5 * det.ln())
    }

    fn log_noise_evidence(&self) -> Option<f64> {
        Some(-10.)
    }
}

struct Uniform {
    names: Vec<String>,
    half_width: f64,
}

impl Prior for Uniform {
    fn names(&self) -> &[String] {
        &self.names
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Box<[f64]> {
        let w = self.half_width;
        self.names.iter().map(|_| rng.random_range(-w..w)).collect()
    }

    fn log_prob(&self, params: &[f64]) -> f64 {
        if params.iter().all(|x| x.abs() <= self.half_width) {
            -(params.len() as f64) * (2. * self.half_width).ln()
        } else {
            f64::NEG_INFINITY
        }
    }

    fn rescale(&self, unit: &[f64]) -> Box<[f64]> {
        unit.iter()
            .map(|u| (2. * u - 1.) * self.half_width)
            .collect()
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let checkpoint_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = Settings {
        n_independent_samples: 2000,
        n_temperatures: 4,
        n_ensemble: 4,
        max_temperature: 50.,
        n_pool: 4,
        print_interval: Duration::from_secs(2),
        checkpoint_interval: Duration::from_secs(30),
        checkpoint_path,
        seed: 1,
        ..Settings::default()
    };
    let prior = Uniform {
        names: vec!["x".to_string(), "y".to_string()],
        half_width: 10.,
    };
    let mut sampler = Sampler::new(CorrelatedNormal { rho: 0.9 }, prior, settings)?;
    let output = sampler.run()?;

    println!("state: {:?}", output.state);
    println!(
        "{} samples, act {:.1}, burn-in {}, {} rounds in {:.1?}",
        output.samples.len(),
        output.act,
        output.burn_in,
        output.rounds,
        output.elapsed
    );
    for (k, name) in output.names.iter().enumerate() {
        let n = output.samples.len() as f64;
        let mean = output.samples.iter().map(|s| s[k]).sum::<f64>() / n;
        let var = output.samples.iter().map(|s| (s[k] - mean).powi(2)).sum::<f64>() / n;
        println!("{name}: mean {mean:.3} sd {:.3}", var.sqrt());
    }
    if let Some(evidence) = output.evidence {
        println!(
            "ln Z {:.3} +/- {:.3}, stepping stone {:.3}, expected {:.3}",
            evidence.log_evidence,
            evidence.log_evidence_error,
            evidence.stepping_stone,
            -(20f64 * 20.).ln()
        );
    }
    if let Some(log_bf) = output.log_bayes_factor {
        println!("ln BF {:.3}", log_bf);
    }
    println!("{}", serde_json::to_string_pretty(&output.diagnostics)?);
    Ok(())
}
