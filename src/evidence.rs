//! Evidence estimates from the tempered chains.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{math::logsumexp, pool::ChainPool};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEstimate {
    /// Thermodynamic integration over the ladder.
    pub log_evidence: f64,
    /// Difference to the estimate from every other temperature.
    pub log_evidence_error: f64,
    pub stepping_stone: f64,
}

/// Integrate the mean log-likelihood over the inverse temperature.
///
/// `betas` decrease from one. The integrand is held constant between the
/// hottest temperature and `beta = 0`. Returns the estimate and the absolute
/// difference to the estimate that only uses every other temperature.
pub fn thermodynamic_integration(betas: &[f64], mean_log_likelihoods: &[f64]) -> (f64, f64) {
    let integrate = |points: &[(f64, f64)]| -> f64 {
        let Some(&(beta_min, mean_min)) = points.last() else {
            return f64::NAN;
        };
        let tail = beta_min * mean_min;
        let body: f64 = points
            .iter()
            .tuple_windows()
            .map(|((b0, m0), (b1, m1))| (b0 - b1) * 0.5 * (m0 + m1))
            .sum();
        body + tail
    };

    let points: Vec<(f64, f64)> = betas
        .iter()
        .copied()
        .zip(mean_log_likelihoods.iter().copied())
        .collect();
    let full = integrate(&points);
    if points.len() < 3 {
        return (full, 0.);
    }
    let mut sparse: Vec<(f64, f64)> = points.iter().copied().step_by(2).collect();
    if points.len() % 2 == 0 {
        // always keep the hottest temperature
        sparse.push(points[points.len() - 1]);
    }
    (full, (full - integrate(&sparse)).abs())
}

/// Stepping-stone estimate from the log-likelihood samples of every temperature.
///
/// The ratio between neighbouring temperatures is estimated from the samples
/// of the hotter one. The last step down to `beta = 0` uses the reciprocal
/// estimate from the hottest samples.
pub fn stepping_stone(betas: &[f64], log_likelihoods: &[Vec<f64>]) -> f64 {
    let log_mean_exp = |values: &[f64], scale: f64| -> f64 {
        logsumexp(values.iter().map(|ll| scale * ll)) - (values.len() as f64).ln()
    };

    let Some((&beta_min, samples_min)) = betas.last().zip(log_likelihoods.last()) else {
        return f64::NAN;
    };
    let mut log_z = -log_mean_exp(samples_min, -beta_min);
    for t in (1..betas.len()).rev() {
        // from the hotter temperature t to the colder t - 1
        log_z += log_mean_exp(&log_likelihoods[t], betas[t - 1] - betas[t]);
    }
    log_z
}

/// Evidence estimates of a tempered pool, if every temperature has samples.
pub fn estimate(pool: &ChainPool) -> Option<EvidenceEstimate> {
    if pool.n_temperatures() < 2 {
        return None;
    }
    let samples: Vec<Vec<f64>> = (0..pool.n_temperatures())
        .map(|t| pool.level_log_likelihoods(t))
        .collect();
    if samples.iter().any(|level| level.is_empty()) {
        return None;
    }
    let means: Vec<f64> = samples
        .iter()
        .map(|level| level.iter().sum::<f64>() / level.len() as f64)
        .collect();
    let (log_evidence, log_evidence_error) = thermodynamic_integration(pool.betas(), &means);
    Some(EvidenceEstimate {
        log_evidence,
        log_evidence_error,
        stepping_stone: stepping_stone(pool.betas(), &samples),
    })
}
