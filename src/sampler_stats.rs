//! Progress reports and diagnostics of a running sampler.

use std::{fmt::Display, time::Duration};

use serde::Serialize;

use crate::{pool::ChainPool, proposal::ProposalSummary, sampler::SamplerState};

/// Snapshot of the run for progress reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub state: SamplerState,
    pub round: u64,
    /// Iterations of the target chains.
    pub iteration: u64,
    pub elapsed: Duration,
    pub burn_in: usize,
    pub act: f64,
    pub independent_samples: usize,
    pub target_samples: usize,
    pub acceptance_fraction: Option<f64>,
    /// Independent samples per iteration of the target chains, in percent.
    pub efficiency: f64,
    pub time_per_evaluation: Option<Duration>,
    pub max_log_likelihood: f64,
    /// Estimated time until the run converges.
    pub eta: Option<Duration>,
    pub swap_acceptance: Vec<Option<f64>>,
}

impl Progress {
    pub(crate) fn new(
        pool: &ChainPool,
        state: SamplerState,
        round: u64,
        elapsed: Duration,
        thin_by_nact: f64,
        target_samples: usize,
    ) -> Self {
        let targets = pool.target_chains();
        let iteration = targets
            .iter()
            .map(|chain| chain.history().len() as u64)
            .max()
            .unwrap_or(0);
        let (steps, accepted) = targets.iter().fold((0u64, 0u64), |(s, a), chain| {
            (s + chain.counters().steps, a + chain.counters().accepted)
        });
        let (evaluations, eval_time) =
            pool.chains()
                .iter()
                .fold((0u64, Duration::ZERO), |(n, t), chain| {
                    (n + chain.counters().evaluations, t + chain.counters().eval_time)
                });

        let samples = pool.thinned_sample_count(thin_by_nact);
        let eta = (state == SamplerState::Sampling && samples > 0 && samples < target_samples)
            .then(|| elapsed.mul_f64((target_samples - samples) as f64 / samples as f64));

        Self {
            state,
            round,
            iteration,
            elapsed,
            burn_in: pool.max_burn_in(),
            act: pool.max_act(),
            independent_samples: samples,
            target_samples,
            acceptance_fraction: (steps > 0).then(|| accepted as f64 / steps as f64),
            efficiency: 100. / pool.max_act(),
            time_per_evaluation: (evaluations > 0).then(|| eval_time.div_f64(evaluations as f64)),
            max_log_likelihood: targets
                .iter()
                .map(|chain| chain.max_log_likelihood())
                .fold(f64::NEG_INFINITY, f64::max),
            eta,
            swap_acceptance: pool.swap_counters().iter().map(|c| c.ratio()).collect(),
        }
    }
}

impl Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} it {} ({:.0?}) burn-in {} act {:.1} samples {}/{}",
            self.state,
            self.iteration,
            self.elapsed,
            self.burn_in,
            self.act,
            self.independent_samples,
            self.target_samples,
        )?;
        if let Some(acc) = self.acceptance_fraction {
            write!(f, " acc {:.2}", acc)?;
        }
        write!(f, " eff {:.1}%", self.efficiency)?;
        if let Some(time) = self.time_per_evaluation {
            write!(f, " {:.1?}/ev", time)?;
        }
        write!(f, " maxl {:.2}", self.max_log_likelihood)?;
        if let Some(eta) = self.eta {
            write!(f, " eta {:.0?}", eta)?;
        }
        if !self.swap_acceptance.is_empty() {
            let rates: Vec<String> = self
                .swap_acceptance
                .iter()
                .map(|rate| match rate {
                    Some(rate) => format!("{:.2}", rate),
                    None => "-".to_string(),
                })
                .collect();
            write!(f, " swap [{}]", rates.join(" "))?;
        }
        Ok(())
    }
}

/// Proposal and exchange statistics, reported at checkpoints and at the end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    /// Proposal summary of the first target chain.
    pub proposals: Vec<ProposalSummary>,
    pub betas: Vec<f64>,
    pub swap_acceptance: Vec<Option<f64>>,
    /// Steps with a non-finite acceptance ratio over all chains.
    pub degenerate_steps: u64,
}

impl Diagnostics {
    pub(crate) fn new(pool: &ChainPool) -> Self {
        Self {
            proposals: pool.chain(0, 0).cycle().summary(),
            betas: pool.betas().to_vec(),
            swap_acceptance: pool.swap_counters().iter().map(|c| c.ratio()).collect(),
            degenerate_steps: pool
                .chains()
                .iter()
                .map(|chain| chain.counters().degenerate)
                .sum(),
        }
    }
}
