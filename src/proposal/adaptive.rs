use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::{ProposalContext, Proposed};

const LOG_SCALE_LIMITS: (f64, f64) = (-20., 5.);

/// Number of history samples before the chain variance replaces the prior widths.
const MIN_VARIANCE_SAMPLES: u64 = 10;

/// Gaussian random walk with a self-tuning step scale.
///
/// The step in dimension `k` has standard deviation `scale * sqrt(var_k)`, where
/// `var_k` is the running variance of the chain. The logarithm of the scale
/// follows a Robbins-Monro recursion towards the target acceptance rate, with a
/// gain decaying like `1 / sqrt(n + t0)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveGaussianProposal {
    log_scale: f64,
    count: u64,
    pub target_accept: f64,
    pub t0: f64,
}

impl AdaptiveGaussianProposal {
    pub fn new(dim: usize) -> Self {
        Self {
            log_scale: (2.38 / (dim.max(1) as f64).sqrt()).ln(),
            count: 0,
            target_accept: 0.234,
            t0: 10.,
        }
    }

    pub fn scale(&self) -> f64 {
        self.log_scale.exp()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn propose<R: Rng>(&self, current: &[f64], ctx: &ProposalContext, rng: &mut R) -> Proposed {
        let scale = self.scale();
        let position = current
            .iter()
            .enumerate()
            .map(|(dim, &x)| {
                let sd = self.step_sd(ctx, dim);
                let z: f64 = rng.sample(StandardNormal);
                x + scale * sd * z
            })
            .collect();
        Proposed::symmetric(position)
    }

    fn step_sd(&self, ctx: &ProposalContext, dim: usize) -> f64 {
        if let Some(var) = ctx.chain_variance {
            let var = var[dim];
            if var > 0. && var.is_finite() {
                return var.sqrt();
            }
        }
        0.1 * ctx.width(dim)
    }

    pub fn update(&mut self, accepted: bool) {
        self.count += 1;
        let gain = (self.count as f64 + self.t0).sqrt().recip();
        let signal = if accepted { 1. } else { 0. } - self.target_accept;
        self.log_scale =
            (self.log_scale + gain * signal).clamp(LOG_SCALE_LIMITS.0, LOG_SCALE_LIMITS.1);
    }
}

pub(crate) fn uses_chain_variance(count: u64) -> bool {
    count >= MIN_VARIANCE_SAMPLES
}
