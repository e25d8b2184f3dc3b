//! Independence proposals drawn from a density model fitted to the chain history.
//!
//! A density model is only available if a [`DensityEstimator`] is registered for
//! its kind in [`DensityBackends`]. Without one the proposal is disabled when the
//! cycle is built.

mod kde;

#[cfg(feature = "gmm")]
mod gmm;

use std::{collections::HashMap, fmt::Debug, sync::Arc};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{FixedGaussianProposal, ProposalContext, ProposalKind, Proposed};

pub use kde::GaussianKde;

#[cfg(feature = "gmm")]
pub use gmm::GaussianMixture;

/// Fits a density model to a set of points.
///
/// Fitting must be deterministic in the data, because resuming from a
/// checkpoint refits the model from the stored training set.
pub trait DensityEstimator: Send + Sync {
    fn fit(&self, data: &[Box<[f64]>]) -> anyhow::Result<Arc<dyn FittedDensity>>;
}

/// A trained density model.
pub trait FittedDensity: Send + Sync + Debug {
    fn sample(&self, rng: &mut dyn RngCore) -> Box<[f64]>;
    fn log_density(&self, point: &[f64]) -> f64;
}

/// Registry of the density backends that are available for this run.
#[derive(Clone)]
pub struct DensityBackends {
    estimators: HashMap<ProposalKind, Arc<dyn DensityEstimator>>,
}

impl Default for DensityBackends {
    /// KDE is always available, the mixture model with the `gmm` feature.
    /// Nothing is registered for normalizing flows.
    fn default() -> Self {
        let mut backends = Self::empty();
        backends.register(ProposalKind::Kde, Arc::new(GaussianKde::default()));
        #[cfg(feature = "gmm")]
        backends.register(ProposalKind::Gmm, Arc::new(GaussianMixture::default()));
        backends
    }
}

impl Debug for DensityBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.estimators.keys().map(|kind| kind.name()).collect();
        kinds.sort_unstable();
        f.debug_struct("DensityBackends")
            .field("kinds", &kinds)
            .finish()
    }
}

impl DensityBackends {
    pub fn empty() -> Self {
        Self {
            estimators: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: ProposalKind, estimator: Arc<dyn DensityEstimator>) {
        self.estimators.insert(kind, estimator);
    }

    pub fn remove(&mut self, kind: ProposalKind) {
        self.estimators.remove(&kind);
    }

    pub fn get(&self, kind: ProposalKind) -> Option<Arc<dyn DensityEstimator>> {
        self.estimators.get(&kind).cloned()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LearnedDensityProposal {
    kind: ProposalKind,
    /// The data of the last successful fit.
    training: Vec<Box<[f64]>>,
    trained: bool,
    num_fits: u64,
    fallback: FixedGaussianProposal,
    #[serde(skip)]
    estimator: Option<Arc<dyn DensityEstimator>>,
    #[serde(skip)]
    model: Option<Arc<dyn FittedDensity>>,
}

impl Debug for LearnedDensityProposal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearnedDensityProposal")
            .field("kind", &self.kind)
            .field("training", &self.training.len())
            .field("trained", &self.trained)
            .field("num_fits", &self.num_fits)
            .finish()
    }
}

impl LearnedDensityProposal {
    pub fn new(kind: ProposalKind, estimator: Arc<dyn DensityEstimator>) -> Self {
        Self {
            kind,
            training: Vec::new(),
            trained: false,
            num_fits: 0,
            fallback: FixedGaussianProposal::default(),
            estimator: Some(estimator),
            model: None,
        }
    }

    pub fn kind(&self) -> ProposalKind {
        self.kind
    }

    pub fn is_trained(&self) -> bool {
        self.trained && self.model.is_some()
    }

    pub fn num_fits(&self) -> u64 {
        self.num_fits
    }

    /// Refit the density model. Too little data keeps the previous model.
    pub fn train(&mut self, data: Vec<Box<[f64]>>, min_samples: usize) {
        if data.len() < min_samples.max(2) {
            log::debug!(
                "Not training {} proposal: {} of {} samples",
                self.kind.name(),
                data.len(),
                min_samples
            );
            return;
        }
        let Some(estimator) = self.estimator.as_ref() else {
            return;
        };
        match estimator.fit(&data) {
            Ok(model) => {
                self.model = Some(model);
                self.training = data;
                self.trained = true;
                self.num_fits += 1;
                log::debug!(
                    "Trained {} proposal on {} samples",
                    self.kind.name(),
                    self.training.len()
                );
            }
            Err(err) => {
                log::warn!("Training of {} proposal failed: {err:#}", self.kind.name());
            }
        }
    }

    /// Reattach the estimator after deserialization and rebuild the model
    /// from the stored training set.
    pub fn attach(&mut self, estimator: Option<Arc<dyn DensityEstimator>>) {
        self.model = None;
        self.estimator = estimator;
        if !self.trained {
            return;
        }
        let refit = self
            .estimator
            .as_ref()
            .map(|estimator| estimator.fit(&self.training));
        match refit {
            Some(Ok(model)) => self.model = Some(model),
            Some(Err(err)) => {
                log::warn!("Could not restore {} proposal: {err:#}", self.kind.name());
                self.trained = false;
            }
            None => self.trained = false,
        }
    }

    pub fn propose(
        &self,
        current: &[f64],
        ctx: &ProposalContext,
        rng: &mut dyn RngCore,
    ) -> Proposed {
        let Some(model) = self.model.as_ref() else {
            return self.fallback.propose(current, ctx, rng);
        };
        let position = model.sample(rng);
        let log_factor = model.log_density(current) - model.log_density(&position);
        Proposed {
            position,
            log_factor,
        }
    }
}
