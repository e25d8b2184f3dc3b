//! Chains across the temperature ladder and the exchange moves between them.

use std::time::Instant;

use itertools::Itertools;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    chain::{draw_initial, metropolis, Acceptance, ActOptions, Chain},
    error::{Result, SamplerError},
    model::{Likelihood, Prior},
    proposal::{DensityBackends, EnsembleView, ProposalCycle},
};

/// Controls how fast the ladder adaptation decays.
const ADAPTATION_LAG: f64 = 1000.;
const ADAPTATION_TIME: f64 = 10.;

/// Inverse temperatures `(1 / t_max)^(t / (n - 1))`, from one down to `1 / t_max`.
pub fn geometric_ladder(n_temperatures: usize, max_temperature: f64) -> Vec<f64> {
    if n_temperatures <= 1 {
        return vec![1.];
    }
    let last = (n_temperatures - 1) as f64;
    (0..n_temperatures)
        .map(|t| max_temperature.recip().powf(t as f64 / last))
        .collect()
}

/// Exchange statistics of one pair of neighbouring temperatures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapCounter {
    pub attempted: u64,
    pub accepted: u64,
}

impl SwapCounter {
    pub fn ratio(&self) -> Option<f64> {
        (self.attempted > 0).then(|| self.accepted as f64 / self.attempted as f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainPool {
    /// Chains ordered by temperature first, then by ensemble member.
    chains: Vec<Chain>,
    betas: Vec<f64>,
    n_ensemble: usize,
    rng: ChaCha8Rng,
    swaps: Vec<SwapCounter>,
    adaptation_steps: u64,
}

impl ChainPool {
    /// Draw starting points for `betas.len() * n_ensemble` chains.
    ///
    /// Chain `i` draws from stream `i + 1` of the seed, the exchange moves use
    /// stream zero.
    pub fn new<L: Likelihood + ?Sized>(
        likelihood: &L,
        prior: &dyn Prior,
        betas: Vec<f64>,
        n_ensemble: usize,
        cycle: &ProposalCycle,
        seed: u64,
    ) -> Result<Self> {
        if betas.is_empty() || n_ensemble == 0 {
            return Err(SamplerError::config("The pool needs at least one chain"));
        }
        if betas[0] != 1. || betas.iter().tuple_windows().any(|(a, b)| b >= a) {
            return Err(SamplerError::config(
                "Inverse temperatures must start at one and decrease strictly",
            ));
        }
        let n_temperatures = betas.len();
        let chains = (0..n_temperatures * n_ensemble)
            .into_par_iter()
            .map(|id| {
                let temperature = id / n_ensemble;
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(id as u64 + 1);
                let initial = draw_initial(likelihood, prior, temperature, &mut rng)?;
                Ok(Chain::new(
                    id,
                    temperature,
                    betas[temperature],
                    initial,
                    rng,
                    cycle.clone(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(0);
        Ok(Self {
            chains,
            swaps: vec![SwapCounter::default(); n_temperatures - 1],
            betas,
            n_ensemble,
            rng,
            adaptation_steps: 0,
        })
    }

    pub fn n_temperatures(&self) -> usize {
        self.betas.len()
    }

    pub fn n_ensemble(&self) -> usize {
        self.n_ensemble
    }

    pub fn betas(&self) -> &[f64] {
        &self.betas
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn chain(&self, temperature: usize, member: usize) -> &Chain {
        &self.chains[temperature * self.n_ensemble + member]
    }

    /// Chains at one temperature.
    pub fn level(&self, temperature: usize) -> &[Chain] {
        let start = temperature * self.n_ensemble;
        &self.chains[start..start + self.n_ensemble]
    }

    /// The chains that sample the posterior itself.
    pub fn target_chains(&self) -> &[Chain] {
        self.level(0)
    }

    pub fn swap_counters(&self) -> &[SwapCounter] {
        &self.swaps
    }

    fn snapshot(&self) -> Vec<Vec<Box<[f64]>>> {
        self.chains
            .chunks(self.n_ensemble)
            .map(|level| {
                level
                    .iter()
                    .map(|chain| chain.current().position.clone())
                    .collect()
            })
            .collect()
    }

    /// Advance the chains with the given ids, or all chains, in parallel.
    ///
    /// Runs on the current rayon pool. Ensemble proposals see the positions at
    /// the start of the call. Returns the chains that failed, which have been
    /// rolled back.
    pub fn advance<L: Likelihood + ?Sized>(
        &mut self,
        likelihood: &L,
        prior: &dyn Prior,
        bounds: &[(f64, f64)],
        steps: usize,
        deadline: Option<Instant>,
        only: Option<&[usize]>,
    ) -> Vec<(usize, SamplerError)> {
        let snapshot = self.snapshot();
        let n_ensemble = self.n_ensemble;
        self.chains
            .par_iter_mut()
            .filter(|chain| only.map_or(true, |ids| ids.contains(&chain.id())))
            .filter_map(|chain| {
                let view = EnsembleView {
                    positions: &snapshot[chain.temperature_index()],
                    member: chain.id() % n_ensemble,
                };
                chain
                    .advance(likelihood, prior, bounds, steps, view, deadline)
                    .err()
                    .map(|err| (chain.id(), err))
            })
            .collect()
    }

    /// Propose exchanges between neighbouring temperatures, hottest pair first.
    ///
    /// Returns the fraction of accepted exchanges of every pair in this call.
    pub fn swap_step(&mut self) -> Vec<f64> {
        let n_temperatures = self.n_temperatures();
        let mut accepted = vec![0usize; n_temperatures.saturating_sub(1)];
        for member in 0..self.n_ensemble {
            for t in (0..n_temperatures.saturating_sub(1)).rev() {
                let cold = t * self.n_ensemble + member;
                let hot = cold + self.n_ensemble;
                let log_alpha = (self.betas[t] - self.betas[t + 1])
                    * (self.chains[hot].current().log_likelihood
                        - self.chains[cold].current().log_likelihood);
                self.swaps[t].attempted += 1;
                if metropolis(log_alpha, &mut self.rng) == Acceptance::Accepted {
                    let (low, high) = self.chains.split_at_mut(hot);
                    Chain::swap_states(&mut low[cold], &mut high[0]);
                    self.swaps[t].accepted += 1;
                    accepted[t] += 1;
                }
            }
        }
        accepted
            .into_iter()
            .map(|count| count as f64 / self.n_ensemble as f64)
            .collect()
    }

    /// Move the intermediate temperatures so that neighbouring pairs approach
    /// equal exchange rates. `beta = 1` and the hottest temperature stay fixed.
    pub fn adapt_ladder(&mut self, rates: &[f64]) {
        let n = self.n_temperatures();
        if n < 3 || rates.len() != n - 1 {
            return;
        }
        let time = self.adaptation_steps as f64;
        self.adaptation_steps += 1;
        let kappa = ADAPTATION_LAG / (time + ADAPTATION_LAG) / ADAPTATION_TIME;

        let log_temps: Vec<f64> = self.betas.iter().map(|beta| -beta.ln()).collect();
        let span = log_temps[n - 1];
        let mut spacings: Vec<f64> = log_temps.iter().tuple_windows().map(|(a, b)| b - a).collect();
        for i in 0..n - 2 {
            spacings[i] *= (kappa * (rates[i] - rates[i + 1])).exp();
        }
        let total: f64 = spacings.iter().sum();
        let mut log_temp = 0f64;
        for (t, spacing) in spacings.iter().enumerate().take(n - 2) {
            log_temp += spacing * span / total;
            self.betas[t + 1] = (-log_temp).exp();
        }
        for chain in self.chains.iter_mut() {
            chain.set_beta(self.betas[chain.temperature_index()]);
        }
        log::debug!("Adapted inverse temperatures to {:?}", self.betas);
    }

    pub fn update_act(&mut self, options: &ActOptions) {
        self.chains
            .par_iter_mut()
            .for_each(|chain| chain.update_act(options));
    }

    /// Retrain the learned proposals of every chain on its own history.
    pub fn train_learned(&mut self, window: usize, min_samples: usize) {
        self.chains.par_iter_mut().for_each(|chain| {
            if chain.cycle().has_learned() {
                let data = chain.training_data(window);
                chain.cycle_mut().train_learned(&data, min_samples);
            }
        });
    }

    pub fn attach_backends(&mut self, backends: &DensityBackends) {
        for chain in self.chains.iter_mut() {
            chain.cycle_mut().attach_backends(backends);
        }
    }

    pub fn is_burned_in(&self) -> bool {
        self.target_chains().iter().all(Chain::is_burned_in)
    }

    /// Sum over the target chains of their independent samples.
    pub fn independent_sample_count(&self) -> usize {
        self.target_chains()
            .iter()
            .map(Chain::independent_samples)
            .sum()
    }

    /// Number of samples after thinning the target chains by `thin_by_nact`
    /// autocorrelation times.
    pub fn thinned_sample_count(&self, thin_by_nact: f64) -> usize {
        self.target_chains()
            .iter()
            .map(|chain| chain.post_burn_in().len() as f64 / (chain.act() * thin_by_nact))
            .sum::<f64>()
            .floor() as usize
    }

    /// Largest autocorrelation time of the target chains.
    pub fn max_act(&self) -> f64 {
        self.target_chains()
            .iter()
            .map(Chain::act)
            .fold(1., f64::max)
    }

    pub fn max_burn_in(&self) -> usize {
        self.target_chains()
            .iter()
            .map(Chain::burn_in)
            .max()
            .unwrap_or(0)
    }

    /// Post burn-in log-likelihoods of all members at one temperature.
    pub fn level_log_likelihoods(&self, temperature: usize) -> Vec<f64> {
        self.level(temperature)
            .iter()
            .flat_map(|chain| chain.post_burn_in().iter().map(|s| s.log_likelihood))
            .collect()
    }
}
