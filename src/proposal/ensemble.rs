//! Moves that use the positions of the other chains at the same temperature.
//!
//! All of them need at least three ensemble members and fall back to an
//! independent prior draw otherwise.

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::{PriorProposal, ProposalContext, Proposed};

const MIN_ENSEMBLE: usize = 3;

/// Differential evolution: `x' = x + gamma (x_a - x_b)`.
///
/// Half of the moves use `gamma = 1` to jump between modes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DifferentialEvolutionProposal;

impl DifferentialEvolutionProposal {
    pub fn propose<R: Rng>(&self, current: &[f64], ctx: &ProposalContext, rng: &mut R) -> Proposed {
        if ctx.ensemble.size() < MIN_ENSEMBLE {
            return PriorProposal.propose(current, ctx, rng);
        }
        let Some(others) = ctx.ensemble.choose_others(rng, 2) else {
            return PriorProposal.propose(current, ctx, rng);
        };
        let gamma = if rng.random_bool(0.5) {
            1.
        } else {
            2.38 / (2. * current.len() as f64).sqrt()
        };
        let position = current
            .iter()
            .zip(others[0].iter().zip(others[1].iter()))
            .map(|(&x, (&a, &b))| x + gamma * (a - b))
            .collect();
        Proposed::symmetric(position)
    }
}

/// Goodman-Weare walk move over a random subset of the ensemble.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnsembleWalkProposal {
    pub subset: usize,
}

impl Default for EnsembleWalkProposal {
    fn default() -> Self {
        Self { subset: 3 }
    }
}

impl EnsembleWalkProposal {
    pub fn propose<R: Rng>(&self, current: &[f64], ctx: &ProposalContext, rng: &mut R) -> Proposed {
        if ctx.ensemble.size() < MIN_ENSEMBLE {
            return PriorProposal.propose(current, ctx, rng);
        }
        let subset = self.subset.min(ctx.ensemble.size() - 1).max(2);
        let Some(others) = ctx.ensemble.choose_others(rng, subset) else {
            return PriorProposal.propose(current, ctx, rng);
        };
        let n = others.len() as f64;
        let mut position: Box<[f64]> = current.into();
        for (dim, x) in position.iter_mut().enumerate() {
            let center = others.iter().map(|p| p[dim]).sum::<f64>() / n;
            *x += others
                .iter()
                .map(|p| {
                    let z: f64 = rng.sample(StandardNormal);
                    z * (p[dim] - center)
                })
                .sum::<f64>();
        }
        Proposed::symmetric(position)
    }
}

/// Goodman-Weare stretch move towards or away from another member.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EnsembleStretchProposal {
    pub a: f64,
}

impl Default for EnsembleStretchProposal {
    fn default() -> Self {
        Self { a: 2. }
    }
}

impl EnsembleStretchProposal {
    pub fn propose<R: Rng>(&self, current: &[f64], ctx: &ProposalContext, rng: &mut R) -> Proposed {
        if ctx.ensemble.size() < MIN_ENSEMBLE {
            return PriorProposal.propose(current, ctx, rng);
        }
        let Some(others) = ctx.ensemble.choose_others(rng, 1) else {
            return PriorProposal.propose(current, ctx, rng);
        };
        let anchor = others[0];
        let u: f64 = rng.random();
        let z = ((self.a - 1.) * u + 1.).powi(2) / self.a;
        let position = current
            .iter()
            .zip(anchor.iter())
            .map(|(&x, &y)| y + z * (x - y))
            .collect();
        Proposed {
            position,
            log_factor: (current.len() as f64 - 1.) * z.ln(),
        }
    }
}
