//! Self-tuning parallel-tempered Metropolis-Hastings sampling.
//!
//! A [`Sampler`] runs a ladder of tempered chains (optionally several per
//! temperature), each drawing from a weighted cycle of proposals. It adapts
//! the proposals and the temperature ladder, estimates burn-in and
//! autocorrelation times, and stops once the target chains hold enough
//! independent samples. Runs can be checkpointed and resumed exactly.
//!
//! ```no_run
//! use ptmcmc_rs::{Likelihood, LikelihoodError, Prior, Sampler, Settings};
//! use rand::{Rng, RngCore};
//! use thiserror::Error;
//!
//! #[derive(Error, Debug)]
//! #[error("never fails")]
//! struct NoError;
//!
//! impl LikelihoodError for NoError {
//!     fn is_recoverable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! struct Normal;
//!
//! impl Likelihood for Normal {
//!     type Error = NoError;
//!
//!     fn log_likelihood(&self, params: &[f64]) -> Result<f64, NoError> {
//!         Ok(-0.5 * params.iter().map(|x| x * x).sum::<f64>())
//!     }
//! }
//!
//! struct Flat(Vec<String>);
//!
//! impl Prior for Flat {
//!     fn names(&self) -> &[String] {
//!         &self.0
//!     }
//!
//!     fn sample(&self, rng: &mut dyn RngCore) -> Box<[f64]> {
//!         (0..self.0.len()).map(|_| rng.random_range(-5f64..5.)).collect()
//!     }
//!
//!     fn log_prob(&self, params: &[f64]) -> f64 {
//!         if params.iter().all(|x| x.abs() <= 5.) {
//!             -(params.len() as f64) * 10f64.ln()
//!         } else {
//!             f64::NEG_INFINITY
//!         }
//!     }
//!
//!     fn rescale(&self, unit: &[f64]) -> Box<[f64]> {
//!         unit.iter().map(|u| -5. + 10. * u).collect()
//!     }
//! }
//!
//! let prior = Flat(vec!["x".to_string(), "y".to_string()]);
//! let mut sampler = Sampler::new(Normal, prior, Settings::default()).unwrap();
//! let output = sampler.run().unwrap();
//! println!("{} samples", output.samples.len());
//! ```

mod autocorr;
mod chain;
mod checkpoint;
mod error;
mod evidence;
mod math;
mod model;
mod pool;
mod proposal;
mod sampler;
mod sampler_stats;
mod settings;

#[cfg(test)]
mod test_support;

pub use autocorr::{integrated_time, max_integrated_time, AutocorrEstimate, DEFAULT_WINDOW_C};
pub use chain::{ActOptions, Chain, ChainCounters, Sample};
pub use checkpoint::{Checkpoint, CHECKPOINT_VERSION};
pub use error::{Result, SamplerError};
pub use evidence::{stepping_stone, thermodynamic_integration, EvidenceEstimate};
pub use model::{Likelihood, LikelihoodError, Prior};
pub use pool::{geometric_ladder, ChainPool, SwapCounter};
pub use proposal::{
    AcceptanceCounter, AdaptiveGaussianProposal, CycleSpec, DensityBackends, DensityEstimator,
    DifferentialEvolutionProposal, DisabledProposal, EnsembleStretchProposal, EnsembleView,
    EnsembleWalkProposal, FittedDensity, FixedGaussianProposal, GaussianKde,
    LearnedDensityProposal, PriorProposal, Proposal, ProposalClass, ProposalContext,
    ProposalCycle, ProposalCycleBuilder, ProposalKind, ProposalSpec, ProposalSummary, Proposed,
    SelectionMode, UniformProposal,
};
pub use sampler::{LogObserver, Sampler, SamplerObserver, SamplerOutput, SamplerState};
pub use sampler_stats::{Diagnostics, Progress};
pub use settings::Settings;

#[cfg(feature = "gmm")]
pub use proposal::GaussianMixture;
