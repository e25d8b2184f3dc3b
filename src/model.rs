//! Core abstractions for the target density.
//!
//! The sampler never owns a model of its own. It consumes a [`Likelihood`] and a
//! [`Prior`] and only ever asks them for log densities and fresh draws.

use rand::RngCore;

/// Errors that happen when we evaluate the log-likelihood.
pub trait LikelihoodError: std::error::Error + Send + Sync + 'static {
    /// Unrecoverable errors stop sampling, recoverable errors reject the
    /// candidate as if its likelihood was zero.
    fn is_recoverable(&self) -> bool;
}

/// The log-likelihood of the data given a parameter vector.
///
/// Implementations are shared between worker threads, so evaluation takes `&self`.
pub trait Likelihood: Send + Sync {
    type Error: LikelihoodError;

    /// Evaluate the log-likelihood at `params`, ordered like [`Prior::names`].
    fn log_likelihood(&self, params: &[f64]) -> Result<f64, Self::Error>;

    /// Log evidence of the noise-only model, if the likelihood knows it.
    ///
    /// Used to report a log Bayes factor next to the evidence estimate.
    fn log_noise_evidence(&self) -> Option<f64> {
        None
    }
}

/// A joint prior over all sampled parameters.
pub trait Prior: Send + Sync {
    /// Parameter names. Their number fixes the dimension of the run.
    fn names(&self) -> &[String];

    /// Draw a fresh parameter vector.
    fn sample(&self, rng: &mut dyn RngCore) -> Box<[f64]>;

    /// Log prior density, `f64::NEG_INFINITY` outside the support.
    fn log_prob(&self, params: &[f64]) -> f64;

    /// Map a point of the unit hypercube to parameter space.
    fn rescale(&self, unit: &[f64]) -> Box<[f64]>;

    /// Lower and upper edge of the support of every parameter.
    ///
    /// The default maps the corners of the unit cube through [`Prior::rescale`],
    /// which is right for separable priors with monotone rescaling.
    fn bounds(&self) -> Box<[(f64, f64)]> {
        let dim = self.dim();
        let lower = self.rescale(&vec![0f64; dim]);
        let upper = self.rescale(&vec![1f64; dim]);
        lower
            .iter()
            .zip(upper.iter())
            .map(|(&a, &b)| (a.min(b), a.max(b)))
            .collect()
    }

    fn dim(&self) -> usize {
        self.names().len()
    }
}
