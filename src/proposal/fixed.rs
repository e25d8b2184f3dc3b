use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use super::{ProposalContext, Proposed};

/// Independent draw from the prior.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PriorProposal;

impl PriorProposal {
    pub fn propose<R: Rng>(&self, current: &[f64], ctx: &ProposalContext, rng: &mut R) -> Proposed {
        let position = ctx.prior.sample(rng);
        let log_factor = ctx.prior.log_prob(current) - ctx.prior.log_prob(&position);
        Proposed {
            position,
            log_factor,
        }
    }
}

/// Uniform draw inside the prior bounds.
///
/// Parameters with an unbounded prior keep their current value.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UniformProposal;

impl UniformProposal {
    pub fn propose<R: Rng>(&self, current: &[f64], ctx: &ProposalContext, rng: &mut R) -> Proposed {
        let position = current
            .iter()
            .zip(ctx.bounds.iter())
            .map(|(&x, &(lower, upper))| {
                if lower.is_finite() && upper.is_finite() && upper > lower {
                    lower + (upper - lower) * rng.random::<f64>()
                } else {
                    x
                }
            })
            .collect();
        Proposed::symmetric(position)
    }
}

/// Gaussian random walk with a fixed fraction of the prior width as step size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FixedGaussianProposal {
    pub sigma: f64,
}

impl Default for FixedGaussianProposal {
    fn default() -> Self {
        Self { sigma: 0.01 }
    }
}

impl FixedGaussianProposal {
    pub fn propose<R: Rng + ?Sized>(
        &self,
        current: &[f64],
        ctx: &ProposalContext,
        rng: &mut R,
    ) -> Proposed {
        let position = current
            .iter()
            .enumerate()
            .map(|(dim, &x)| {
                let z: f64 = rng.sample(StandardNormal);
                x + self.sigma * ctx.width(dim) * z
            })
            .collect();
        Proposed::symmetric(position)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::{
        model::Prior,
        proposal::EnsembleView,
        test_support::BoxPrior,
    };

    fn context<'a>(
        prior: &'a BoxPrior,
        bounds: &'a [(f64, f64)],
        positions: &'a [Box<[f64]>],
    ) -> ProposalContext<'a> {
        ProposalContext {
            prior,
            bounds,
            chain_variance: None,
            ensemble: EnsembleView::single(positions),
        }
    }

    #[test]
    fn uniform_stays_inside_bounds() {
        let prior = BoxPrior::new(3, -2., 5.);
        let bounds = prior.bounds();
        let positions = vec![vec![0f64, 0., 0.].into_boxed_slice()];
        let ctx = context(&prior, &bounds, &positions);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..1000 {
            let proposed = UniformProposal.propose(&[0., 0., 0.], &ctx, &mut rng);
            assert_eq!(proposed.log_factor, 0.);
            assert!(proposed.position.iter().all(|x| (-2. ..5.).contains(x)));
        }
    }

    #[test]
    fn prior_draw_carries_hastings_factor() {
        let prior = BoxPrior::new(2, 0., 4.);
        let bounds = prior.bounds();
        let positions = vec![vec![1f64, 1.].into_boxed_slice()];
        let ctx = context(&prior, &bounds, &positions);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let proposed = PriorProposal.propose(&[1., 1.], &ctx, &mut rng);
        // flat prior, so the factor cancels
        assert_eq!(proposed.log_factor, 0.);
        assert!(prior.log_prob(&proposed.position).is_finite());
    }

    #[test]
    fn fixed_gaussian_scales_with_prior_width() {
        let prior = BoxPrior::new(1, 0., 100.);
        let bounds = prior.bounds();
        let positions = vec![vec![50f64].into_boxed_slice()];
        let ctx = context(&prior, &bounds, &positions);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let proposal = FixedGaussianProposal { sigma: 0.01 };
        let steps: Vec<f64> = (0..5000)
            .map(|_| proposal.propose(&[50.], &ctx, &mut rng).position[0] - 50.)
            .collect();
        let sd = crate::math::variance(&steps).sqrt();
        assert!((sd - 1.).abs() < 0.05, "step sd {sd}");
    }
}
