//! Proposal strategies and the cycle that picks between them.
//!
//! Every strategy turns the current position into a candidate and reports the
//! Hastings correction `ln q(x | x') - ln q(x' | x)` for it. Strategies are
//! collected in a closed enum so that their adaptive state can be checkpointed.

mod adaptive;
mod cycle;
mod ensemble;
mod fixed;
mod learned;

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::model::Prior;

pub use adaptive::AdaptiveGaussianProposal;
pub(crate) use adaptive::uses_chain_variance;
pub use cycle::{
    AcceptanceCounter, CycleSpec, ProposalCycle, ProposalCycleBuilder, ProposalSpec,
    ProposalSummary, SelectionMode,
};
pub use ensemble::{DifferentialEvolutionProposal, EnsembleStretchProposal, EnsembleWalkProposal};
pub use fixed::{FixedGaussianProposal, PriorProposal, UniformProposal};
pub use learned::{
    DensityBackends, DensityEstimator, FittedDensity, GaussianKde, LearnedDensityProposal,
};

#[cfg(feature = "gmm")]
pub use learned::GaussianMixture;

/// A candidate position together with its Hastings correction.
#[derive(Debug, Clone)]
pub struct Proposed {
    pub position: Box<[f64]>,
    pub log_factor: f64,
}

impl Proposed {
    pub(crate) fn symmetric(position: Box<[f64]>) -> Self {
        Self {
            position,
            log_factor: 0.,
        }
    }
}

/// Read-only view of the current positions of all chains at one temperature.
#[derive(Debug, Clone, Copy)]
pub struct EnsembleView<'a> {
    pub positions: &'a [Box<[f64]>],
    pub member: usize,
}

impl<'a> EnsembleView<'a> {
    pub fn single(positions: &'a [Box<[f64]>]) -> Self {
        Self {
            positions,
            member: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.positions.len()
    }

    /// Pick `amount` distinct members other than the chain itself.
    pub(crate) fn choose_others<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        amount: usize,
    ) -> Option<Vec<&'a [f64]>> {
        let others = self.positions.len().checked_sub(1)?;
        if others < amount {
            return None;
        }
        let picked = rand::seq::index::sample(rng, others, amount);
        Some(
            picked
                .iter()
                .map(|idx| {
                    let idx = if idx >= self.member { idx + 1 } else { idx };
                    &*self.positions[idx]
                })
                .collect(),
        )
    }
}

/// Everything a proposal may look at besides the current position.
pub struct ProposalContext<'a> {
    pub prior: &'a dyn Prior,
    pub bounds: &'a [(f64, f64)],
    /// Per-dimension variance of the chain history, once it is meaningful.
    pub chain_variance: Option<&'a [f64]>,
    pub ensemble: EnsembleView<'a>,
}

impl ProposalContext<'_> {
    pub fn dim(&self) -> usize {
        self.bounds.len()
    }

    /// Width of the prior support, or one for unbounded parameters.
    pub(crate) fn width(&self, dim: usize) -> f64 {
        let (lower, upper) = self.bounds[dim];
        let width = upper - lower;
        if width.is_finite() && width > 0. {
            width
        } else {
            1.
        }
    }
}

/// Broad families of proposals, used to remove whole groups from a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalClass {
    Fixed,
    Adaptive,
    Ensemble,
    Learned,
}

impl ProposalClass {
    pub fn name(&self) -> &'static str {
        match self {
            ProposalClass::Fixed => "fixed",
            ProposalClass::Adaptive => "adaptive",
            ProposalClass::Ensemble => "ensemble",
            ProposalClass::Learned => "learned",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [
            ProposalClass::Fixed,
            ProposalClass::Adaptive,
            ProposalClass::Ensemble,
            ProposalClass::Learned,
        ]
        .into_iter()
        .find(|class| class.name() == name)
    }
}

/// Tag of a proposal strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalKind {
    Prior,
    Uniform,
    FixedGaussian,
    AdaptiveGaussian,
    DifferentialEvolution,
    EnsembleWalk,
    EnsembleStretch,
    Kde,
    Gmm,
    Flow,
}

impl ProposalKind {
    pub const ALL: [ProposalKind; 10] = [
        ProposalKind::Prior,
        ProposalKind::Uniform,
        ProposalKind::FixedGaussian,
        ProposalKind::AdaptiveGaussian,
        ProposalKind::DifferentialEvolution,
        ProposalKind::EnsembleWalk,
        ProposalKind::EnsembleStretch,
        ProposalKind::Kde,
        ProposalKind::Gmm,
        ProposalKind::Flow,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProposalKind::Prior => "prior",
            ProposalKind::Uniform => "uniform",
            ProposalKind::FixedGaussian => "fixed_gaussian",
            ProposalKind::AdaptiveGaussian => "adaptive_gaussian",
            ProposalKind::DifferentialEvolution => "differential_evolution",
            ProposalKind::EnsembleWalk => "ensemble_walk",
            ProposalKind::EnsembleStretch => "ensemble_stretch",
            ProposalKind::Kde => "kde",
            ProposalKind::Gmm => "gmm",
            ProposalKind::Flow => "flow",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn class(&self) -> ProposalClass {
        match self {
            ProposalKind::Prior | ProposalKind::Uniform | ProposalKind::FixedGaussian => {
                ProposalClass::Fixed
            }
            ProposalKind::AdaptiveGaussian => ProposalClass::Adaptive,
            ProposalKind::DifferentialEvolution
            | ProposalKind::EnsembleWalk
            | ProposalKind::EnsembleStretch => ProposalClass::Ensemble,
            ProposalKind::Kde | ProposalKind::Gmm | ProposalKind::Flow => ProposalClass::Learned,
        }
    }
}

/// Stand-in for a proposal whose backend was missing at configuration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisabledProposal {
    pub reason: String,
}

/// All proposal strategies known to the sampler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Proposal {
    Prior(PriorProposal),
    Uniform(UniformProposal),
    FixedGaussian(FixedGaussianProposal),
    AdaptiveGaussian(AdaptiveGaussianProposal),
    DifferentialEvolution(DifferentialEvolutionProposal),
    EnsembleWalk(EnsembleWalkProposal),
    EnsembleStretch(EnsembleStretchProposal),
    Learned(LearnedDensityProposal),
    Disabled(DisabledProposal),
}

impl Proposal {
    /// Construct the strategy for `kind`, or a disabled stand-in if a learned
    /// proposal has no registered backend.
    pub(crate) fn new(kind: ProposalKind, dim: usize, backends: &DensityBackends) -> Self {
        match kind {
            ProposalKind::Prior => Proposal::Prior(PriorProposal),
            ProposalKind::Uniform => Proposal::Uniform(UniformProposal),
            ProposalKind::FixedGaussian => Proposal::FixedGaussian(FixedGaussianProposal::default()),
            ProposalKind::AdaptiveGaussian => {
                Proposal::AdaptiveGaussian(AdaptiveGaussianProposal::new(dim))
            }
            ProposalKind::DifferentialEvolution => {
                Proposal::DifferentialEvolution(DifferentialEvolutionProposal)
            }
            ProposalKind::EnsembleWalk => Proposal::EnsembleWalk(EnsembleWalkProposal::default()),
            ProposalKind::EnsembleStretch => {
                Proposal::EnsembleStretch(EnsembleStretchProposal::default())
            }
            ProposalKind::Kde | ProposalKind::Gmm | ProposalKind::Flow => {
                match backends.get(kind) {
                    Some(estimator) => {
                        Proposal::Learned(LearnedDensityProposal::new(kind, estimator))
                    }
                    None => Proposal::Disabled(DisabledProposal {
                        reason: format!("no density backend registered for {}", kind.name()),
                    }),
                }
            }
        }
    }

    pub fn propose<R: Rng>(
        &mut self,
        current: &[f64],
        ctx: &ProposalContext,
        rng: &mut R,
    ) -> Proposed {
        match self {
            Proposal::Prior(p) => p.propose(current, ctx, rng),
            Proposal::Uniform(p) => p.propose(current, ctx, rng),
            Proposal::FixedGaussian(p) => p.propose(current, ctx, rng),
            Proposal::AdaptiveGaussian(p) => p.propose(current, ctx, rng),
            Proposal::DifferentialEvolution(p) => p.propose(current, ctx, rng),
            Proposal::EnsembleWalk(p) => p.propose(current, ctx, rng),
            Proposal::EnsembleStretch(p) => p.propose(current, ctx, rng),
            Proposal::Learned(p) => p.propose(current, ctx, rng as &mut dyn RngCore),
            Proposal::Disabled(_) => Proposed::symmetric(current.into()),
        }
    }

    /// Acceptance feedback after the proposed move was judged.
    pub fn update(&mut self, accepted: bool) {
        if let Proposal::AdaptiveGaussian(p) = self {
            p.update(accepted)
        }
    }

    pub fn is_trained(&self) -> bool {
        match self {
            Proposal::Learned(p) => p.is_trained(),
            _ => false,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Proposal::Disabled(_))
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn kind_names_round_trip() {
        for kind in ProposalKind::ALL {
            assert_eq!(ProposalKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ProposalKind::from_name("hmc"), None);
        assert_eq!(ProposalClass::from_name("learned"), Some(ProposalClass::Learned));
    }

    #[test]
    fn choose_others_skips_own_member() {
        let positions: Vec<Box<[f64]>> = (0..4).map(|i| vec![i as f64].into()).collect();
        let view = EnsembleView {
            positions: &positions,
            member: 2,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..100 {
            let others = view.choose_others(&mut rng, 3).unwrap();
            assert_eq!(others.len(), 3);
            assert!(others.iter().all(|p| p[0] != 2.));
        }
        assert!(view.choose_others(&mut rng, 4).is_none());
    }

    #[test]
    fn missing_backend_gives_disabled_proposal() {
        let backends = DensityBackends::empty();
        let proposal = Proposal::new(ProposalKind::Flow, 2, &backends);
        assert!(proposal.is_disabled());
        let proposal = Proposal::new(ProposalKind::Kde, 2, &DensityBackends::default());
        assert!(!proposal.is_disabled());
    }
}
