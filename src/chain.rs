//! A single Metropolis-Hastings random walk at a fixed inverse temperature.

use std::time::{Duration, Instant};

use rand::{Rng, RngCore};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{
    autocorr::max_integrated_time,
    error::{Result, SamplerError},
    math::RunningVariance,
    model::{Likelihood, LikelihoodError, Prior},
    proposal::{uses_chain_variance, EnsembleView, ProposalContext, ProposalCycle},
};

/// Number of prior draws we try before giving up on finding a starting point.
const MAX_INIT_TRIES: usize = 500;

/// Passes of the self-referential burn-in estimate.
const MAX_BURN_IN_PASSES: usize = 10;

/// One recorded state of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub position: Box<[f64]>,
    pub log_likelihood: f64,
    pub log_prior: f64,
    pub iteration: u64,
    pub temperature_index: usize,
    /// Whether the step that produced this record accepted its candidate.
    pub accepted: bool,
}

/// Outcome of the Metropolis-Hastings test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Acceptance {
    Accepted,
    Rejected,
    /// The log acceptance ratio was NaN or positive infinity.
    Degenerate,
}

/// Accept iff `ln u < log_alpha` for a fresh uniform `u`.
pub(crate) fn metropolis<R: Rng + ?Sized>(log_alpha: f64, rng: &mut R) -> Acceptance {
    let u: f64 = rng.random();
    if log_alpha.is_nan() || log_alpha == f64::INFINITY {
        return Acceptance::Degenerate;
    }
    if u.ln() < log_alpha {
        Acceptance::Accepted
    } else {
        Acceptance::Rejected
    }
}

/// Find a starting point with finite prior and likelihood.
pub(crate) fn draw_initial<L: Likelihood + ?Sized>(
    likelihood: &L,
    prior: &dyn Prior,
    temperature_index: usize,
    rng: &mut dyn RngCore,
) -> Result<Sample> {
    for _ in 0..MAX_INIT_TRIES {
        let position = prior.sample(rng);
        let log_prior = prior.log_prob(&position);
        if !log_prior.is_finite() {
            continue;
        }
        let log_likelihood = match likelihood.log_likelihood(&position) {
            Ok(val) => val,
            Err(err) if err.is_recoverable() => continue,
            Err(err) => return Err(SamplerError::LikelihoodEvaluation(err.into())),
        };
        if log_likelihood.is_finite() {
            return Ok(Sample {
                position,
                log_likelihood,
                log_prior,
                iteration: 0,
                temperature_index,
                accepted: true,
            });
        }
    }
    Err(SamplerError::Initialization(format!(
        "no prior draw with finite posterior in {MAX_INIT_TRIES} tries"
    )))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainCounters {
    pub steps: u64,
    pub accepted: u64,
    pub evaluations: u64,
    pub degenerate: u64,
    pub eval_time: Duration,
}

impl ChainCounters {
    pub fn acceptance_fraction(&self) -> Option<f64> {
        (self.steps > 0).then(|| self.accepted as f64 / self.steps as f64)
    }
}

/// Settings that control the autocorrelation and burn-in estimates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActOptions {
    /// Window constant of the autocorrelation estimator.
    pub autocorr_c: f64,
    /// Number of autocorrelation times discarded after the likelihood maximum.
    pub burn_in_nact: f64,
    /// Iterations that are always discarded.
    pub fixed_discard: usize,
}

/// State at the start of a round, restored if the round fails.
struct RoundStart {
    history_len: usize,
    current: Sample,
    rng: ChaCha8Rng,
    cycle: ProposalCycle,
    variance: RunningVariance,
    counters: ChainCounters,
    max_log_likelihood: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    id: usize,
    temperature_index: usize,
    beta: f64,
    current: Sample,
    history: Vec<Sample>,
    rng: ChaCha8Rng,
    cycle: ProposalCycle,
    variance: RunningVariance,
    counters: ChainCounters,
    max_log_likelihood: f64,
    tau: f64,
    burn_in: usize,
    act_estimated: bool,
}

impl Chain {
    pub fn new(
        id: usize,
        temperature_index: usize,
        beta: f64,
        initial: Sample,
        rng: ChaCha8Rng,
        cycle: ProposalCycle,
    ) -> Self {
        let mut variance = RunningVariance::new(initial.position.len());
        variance.add_sample(&initial.position);
        let current = Sample {
            iteration: 0,
            temperature_index,
            ..initial
        };
        Self {
            id,
            temperature_index,
            beta,
            max_log_likelihood: current.log_likelihood,
            history: vec![current.clone()],
            current,
            rng,
            cycle,
            variance,
            counters: ChainCounters::default(),
            tau: 1.,
            burn_in: 0,
            act_estimated: false,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn temperature_index(&self) -> usize {
        self.temperature_index
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub(crate) fn set_beta(&mut self, beta: f64) {
        self.beta = beta;
    }

    pub fn current(&self) -> &Sample {
        &self.current
    }

    pub fn history(&self) -> &[Sample] {
        &self.history
    }

    pub fn cycle(&self) -> &ProposalCycle {
        &self.cycle
    }

    pub(crate) fn cycle_mut(&mut self) -> &mut ProposalCycle {
        &mut self.cycle
    }

    pub fn counters(&self) -> &ChainCounters {
        &self.counters
    }

    pub fn max_log_likelihood(&self) -> f64 {
        self.max_log_likelihood
    }

    /// Current autocorrelation time estimate, at least one.
    pub fn act(&self) -> f64 {
        self.tau
    }

    pub fn burn_in(&self) -> usize {
        self.burn_in
    }

    /// True once the history extends at least one autocorrelation time past
    /// the burn-in.
    pub fn is_burned_in(&self) -> bool {
        self.act_estimated && self.history.len() >= self.burn_in + self.tau.ceil() as usize
    }

    /// Post burn-in samples divided by the autocorrelation time.
    pub fn independent_samples(&self) -> usize {
        (self.post_burn_in().len() as f64 / self.tau).floor() as usize
    }

    pub fn post_burn_in(&self) -> &[Sample] {
        &self.history[self.burn_in.min(self.history.len())..]
    }

    /// Post burn-in samples spaced by `thin_by_nact` autocorrelation times.
    pub fn thinned_samples(&self, thin_by_nact: f64) -> impl Iterator<Item = &Sample> + '_ {
        let step = ((thin_by_nact * self.tau).round() as usize).max(1);
        self.post_burn_in().iter().step_by(step)
    }

    /// Exchange the current states of two chains at different temperatures.
    pub(crate) fn swap_states(a: &mut Chain, b: &mut Chain) {
        std::mem::swap(&mut a.current, &mut b.current);
        for chain in [a, b] {
            chain.current.temperature_index = chain.temperature_index;
            chain.max_log_likelihood = chain.max_log_likelihood.max(chain.current.log_likelihood);
        }
    }

    /// Positions of the most recent `window` accepted post burn-in samples.
    pub fn training_data(&self, window: usize) -> Vec<Box<[f64]>> {
        let mut data: Vec<Box<[f64]>> = self
            .post_burn_in()
            .iter()
            .rev()
            .filter(|sample| sample.accepted)
            .take(window)
            .map(|sample| sample.position.clone())
            .collect();
        data.reverse();
        data
    }

    fn round_start(&self) -> RoundStart {
        RoundStart {
            history_len: self.history.len(),
            current: self.current.clone(),
            rng: self.rng.clone(),
            cycle: self.cycle.clone(),
            variance: self.variance.clone(),
            counters: self.counters,
            max_log_likelihood: self.max_log_likelihood,
        }
    }

    fn rollback(&mut self, start: RoundStart) {
        self.history.truncate(start.history_len);
        self.current = start.current;
        self.rng = start.rng;
        self.cycle = start.cycle;
        self.variance = start.variance;
        self.counters = start.counters;
        self.max_log_likelihood = start.max_log_likelihood;
    }

    /// Run `steps` Metropolis-Hastings iterations.
    ///
    /// If the likelihood fails unrecoverably or the deadline passes, the chain
    /// is restored to its state at the start of the call.
    pub fn advance<L: Likelihood + ?Sized>(
        &mut self,
        likelihood: &L,
        prior: &dyn Prior,
        bounds: &[(f64, f64)],
        steps: usize,
        ensemble: EnsembleView,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let start = self.round_start();
        for _ in 0..steps {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                self.rollback(start);
                return Err(SamplerError::Timeout { chain: self.id });
            }
            if let Err(err) = self.step(likelihood, prior, bounds, ensemble) {
                self.rollback(start);
                return Err(err);
            }
        }
        Ok(())
    }

    fn step<L: Likelihood + ?Sized>(
        &mut self,
        likelihood: &L,
        prior: &dyn Prior,
        bounds: &[(f64, f64)],
        ensemble: EnsembleView,
    ) -> Result<()> {
        let variance = if uses_chain_variance(self.variance.count()) {
            self.variance.current()
        } else {
            None
        };
        let ctx = ProposalContext {
            prior,
            bounds,
            chain_variance: variance.as_deref(),
            ensemble,
        };
        let idx = self.cycle.select(&mut self.rng);
        let proposed = self
            .cycle
            .propose(idx, &self.current.position, &ctx, &mut self.rng);

        let log_prior = prior.log_prob(&proposed.position);
        let mut candidate = None;
        let accepted = if log_prior == f64::NEG_INFINITY || log_prior.is_nan() {
            false
        } else {
            let eval_start = Instant::now();
            let result = likelihood.log_likelihood(&proposed.position);
            self.counters.evaluations += 1;
            self.counters.eval_time += eval_start.elapsed();
            let log_likelihood = match result {
                Ok(val) => val,
                Err(err) if err.is_recoverable() => f64::NEG_INFINITY,
                Err(err) => return Err(SamplerError::LikelihoodEvaluation(err.into())),
            };
            if log_likelihood == f64::NEG_INFINITY {
                false
            } else {
                let log_alpha = proposed.log_factor
                    + self.beta * (log_likelihood - self.current.log_likelihood)
                    + (log_prior - self.current.log_prior);
                match metropolis(log_alpha, &mut self.rng) {
                    Acceptance::Accepted => {
                        candidate = Some((log_likelihood, log_prior));
                        true
                    }
                    Acceptance::Rejected => false,
                    Acceptance::Degenerate => {
                        self.counters.degenerate += 1;
                        log::trace!("Chain {}: {}", self.id, SamplerError::NumericalDegeneracy);
                        false
                    }
                }
            }
        };

        if let Some((log_likelihood, log_prior)) = candidate {
            self.current.position = proposed.position;
            self.current.log_likelihood = log_likelihood;
            self.current.log_prior = log_prior;
            if log_likelihood > self.max_log_likelihood {
                self.max_log_likelihood = log_likelihood;
            }
        }
        self.current.iteration = self.history.len() as u64;
        self.current.accepted = accepted;
        self.history.push(self.current.clone());
        self.variance.add_sample(&self.current.position);

        self.counters.steps += 1;
        if accepted {
            self.counters.accepted += 1;
        }
        self.cycle.record(idx, accepted);
        Ok(())
    }

    fn act_of(samples: &[Sample], autocorr_c: f64) -> f64 {
        let Some(first) = samples.first() else {
            return 1.;
        };
        let dim = first.position.len();
        let mut columns: Vec<Vec<f64>> = (0..dim)
            .map(|k| samples.iter().map(|s| s.position[k]).collect())
            .collect();
        columns.push(samples.iter().map(|s| s.log_likelihood).collect());
        max_integrated_time(columns.iter().map(|c| c.as_slice()), autocorr_c)
    }

    /// Recompute the autocorrelation time and the burn-in.
    ///
    /// The burn-in starts `burn_in_nact` autocorrelation times after the first
    /// iteration whose log-likelihood came within `d / 2` of the maximum. As the
    /// autocorrelation time is itself estimated after the burn-in, both are
    /// iterated until they agree.
    pub fn update_act(&mut self, options: &ActOptions) {
        let dim = self.current.position.len() as f64;
        let threshold = self.max_log_likelihood - dim / 2.;
        let ml_index = self
            .history
            .iter()
            .position(|sample| sample.log_likelihood >= threshold)
            .unwrap_or(0);

        let mut burn_in = options.fixed_discard.max(ml_index);
        let mut tau = 1f64;
        for _ in 0..MAX_BURN_IN_PASSES {
            let start = burn_in.min(self.history.len());
            tau = Self::act_of(&self.history[start..], options.autocorr_c);
            let next = options
                .fixed_discard
                .max(ml_index + (options.burn_in_nact * tau).ceil() as usize);
            if next == burn_in {
                break;
            }
            burn_in = next;
        }
        self.tau = tau.max(1.);
        self.burn_in = burn_in;
        self.act_estimated = true;
    }

    /// Positions of the history after burn-in, used for diagnostics.
    pub fn post_burn_in_positions(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.post_burn_in().iter().map(|sample| &*sample.position)
    }
}
