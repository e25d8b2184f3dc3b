use std::{path::PathBuf, time::Duration};

use serde_json::{Map, Value};

use crate::{
    chain::ActOptions,
    error::{Result, SamplerError},
    proposal::{CycleSpec, ProposalCycleBuilder, ProposalKind, ProposalSpec, SelectionMode},
};

/// Settings of a sampler run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Number of independent samples after which the run has converged.
    pub n_independent_samples: usize,
    /// Spacing of the returned samples in autocorrelation times. Values below
    /// one return more, correlated, samples.
    pub thin_by_nact: f64,
    /// Number of rungs of the temperature ladder.
    pub n_temperatures: usize,
    /// Number of chains at every temperature.
    pub n_ensemble: usize,
    /// Temperature of the hottest rung.
    pub max_temperature: f64,
    /// Adapt the intermediate temperatures during burn-in.
    pub adapt_temperatures: bool,
    /// Number of worker threads.
    pub n_pool: usize,
    /// Metropolis-Hastings steps of every chain between two exchange steps.
    pub internal_steps_per_round: usize,
    pub proposal_cycle: CycleSpec,
    pub selection: SelectionMode,
    pub print_interval: Duration,
    /// Time between checkpoints. Checkpoints are only written if
    /// `checkpoint_path` is set.
    pub checkpoint_interval: Duration,
    pub checkpoint_path: Option<PathBuf>,
    /// Continue from `checkpoint_path` if the file exists.
    pub resume: bool,
    /// Autocorrelation times discarded after the likelihood maximum.
    pub burn_in_nact: f64,
    /// Iterations that are always discarded at the start of every chain.
    pub burn_in_fixed_discard: usize,
    /// Window constant of the autocorrelation estimate.
    pub autocorr_c: f64,
    /// Rounds between autocorrelation estimates.
    pub act_interval_rounds: u64,
    /// Rounds between refits of the learned proposals.
    pub training_interval_rounds: u64,
    /// Number of recent accepted samples used to train learned proposals.
    pub training_window: usize,
    /// Learned proposals need at least this many samples to train.
    pub min_training_samples: usize,
    /// Target acceptance rate of the adaptive Gaussian proposal.
    pub target_acceptance: f64,
    /// Chains that take longer for one round are rolled back and retried once.
    ///
    /// The deadline is checked between internal steps. A single likelihood
    /// evaluation that never returns is not interrupted and blocks the run.
    pub round_timeout: Option<Duration>,
    /// Checkpoint and stop after this much wall time.
    pub max_run_time: Option<Duration>,
    /// Checkpoint and stop after this many rounds.
    pub max_rounds: Option<u64>,
    pub seed: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            n_independent_samples: 1000,
            thin_by_nact: 1.,
            n_temperatures: 1,
            n_ensemble: 1,
            max_temperature: 100.,
            adapt_temperatures: true,
            n_pool: 1,
            internal_steps_per_round: 100,
            proposal_cycle: CycleSpec::default(),
            selection: SelectionMode::Weighted,
            print_interval: Duration::from_secs(60),
            checkpoint_interval: Duration::from_secs(600),
            checkpoint_path: None,
            resume: true,
            burn_in_nact: 10.,
            burn_in_fixed_discard: 0,
            autocorr_c: 5.,
            act_interval_rounds: 10,
            training_interval_rounds: 20,
            training_window: 1000,
            min_training_samples: 200,
            target_acceptance: 0.234,
            round_timeout: None,
            max_run_time: None,
            max_rounds: None,
            seed: 0,
        }
    }
}

fn wrong_type(key: &str, expected: &str, value: &Value) -> SamplerError {
    SamplerError::config(format!("Option `{key}` must be {expected}, got {value}"))
}

fn as_usize(key: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .map(|val| val as usize)
        .ok_or_else(|| wrong_type(key, "a non-negative integer", value))
}

fn as_u64(key: &str, value: &Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| wrong_type(key, "a non-negative integer", value))
}

fn as_f64(key: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| wrong_type(key, "a number", value))
}

fn as_bool(key: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| wrong_type(key, "a boolean", value))
}

fn as_seconds(key: &str, value: &Value) -> Result<Duration> {
    let secs = as_f64(key, value)?;
    Duration::try_from_secs_f64(secs).map_err(|_| wrong_type(key, "a non-negative duration", value))
}

/// `null` disables an optional limit.
fn as_optional_seconds(key: &str, value: &Value) -> Result<Option<Duration>> {
    if value.is_null() {
        return Ok(None);
    }
    as_seconds(key, value).map(Some)
}

fn as_cycle(value: &Value) -> Result<CycleSpec> {
    const KEY: &str = "proposal_cycle";
    match value {
        Value::String(name) => Ok(CycleSpec::Preset(name.clone())),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                let (name, weight) = match item {
                    Value::String(name) => (name.as_str(), 1.),
                    Value::Object(entry) => {
                        let name = entry
                            .get("name")
                            .and_then(Value::as_str)
                            .ok_or_else(|| wrong_type(KEY, "a list of named proposals", item))?;
                        let weight = match entry.get("weight") {
                            Some(weight) => as_f64(KEY, weight)?,
                            None => 1.,
                        };
                        (name, weight)
                    }
                    _ => return Err(wrong_type(KEY, "a list of named proposals", item)),
                };
                let kind = ProposalKind::from_name(name)
                    .ok_or_else(|| SamplerError::config(format!("Unknown proposal `{name}`")))?;
                Ok(ProposalSpec::new(kind, weight))
            })
            .collect::<Result<Vec<_>>>()
            .map(CycleSpec::Explicit),
        _ => Err(wrong_type(KEY, "a preset name or a list of proposals", value)),
    }
}

impl Settings {
    /// Settings from a map of option names to values.
    ///
    /// Options that are not set keep their defaults. Unknown options are
    /// ignored with a warning.
    pub fn from_options(options: &Map<String, Value>) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in options.iter() {
            let key = key.as_str();
            match key {
                "n_independent_samples" => settings.n_independent_samples = as_usize(key, value)?,
                "thin_by_nact" => settings.thin_by_nact = as_f64(key, value)?,
                "n_temperatures" => settings.n_temperatures = as_usize(key, value)?,
                "n_ensemble" => settings.n_ensemble = as_usize(key, value)?,
                "max_temperature" => settings.max_temperature = as_f64(key, value)?,
                "adapt_temperatures" => settings.adapt_temperatures = as_bool(key, value)?,
                "n_pool" => settings.n_pool = as_usize(key, value)?,
                "internal_steps_per_round" => {
                    settings.internal_steps_per_round = as_usize(key, value)?
                }
                "proposal_cycle" => settings.proposal_cycle = as_cycle(value)?,
                "selection" => {
                    let name = value
                        .as_str()
                        .ok_or_else(|| wrong_type(key, "a string", value))?;
                    settings.selection = SelectionMode::from_name(name).ok_or_else(|| {
                        SamplerError::config(format!("Unknown selection mode `{name}`"))
                    })?;
                }
                "print_interval_seconds" => settings.print_interval = as_seconds(key, value)?,
                "checkpoint_interval_seconds" => {
                    settings.checkpoint_interval = as_seconds(key, value)?
                }
                "checkpoint_path" => {
                    settings.checkpoint_path = match value {
                        Value::Null => None,
                        Value::String(path) => Some(PathBuf::from(path)),
                        _ => return Err(wrong_type(key, "a path", value)),
                    }
                }
                "resume" => settings.resume = as_bool(key, value)?,
                "burn_in_nact" => settings.burn_in_nact = as_f64(key, value)?,
                "burn_in_fixed_discard" => settings.burn_in_fixed_discard = as_usize(key, value)?,
                "autocorr_c" => settings.autocorr_c = as_f64(key, value)?,
                "act_interval_rounds" => settings.act_interval_rounds = as_u64(key, value)?,
                "training_interval_rounds" => {
                    settings.training_interval_rounds = as_u64(key, value)?
                }
                "training_window" => settings.training_window = as_usize(key, value)?,
                "min_training_samples" => settings.min_training_samples = as_usize(key, value)?,
                "target_acceptance" => settings.target_acceptance = as_f64(key, value)?,
                "round_timeout_seconds" => {
                    settings.round_timeout = as_optional_seconds(key, value)?
                }
                "max_run_time_seconds" => settings.max_run_time = as_optional_seconds(key, value)?,
                "max_rounds" => {
                    settings.max_rounds = match value {
                        Value::Null => None,
                        _ => Some(as_u64(key, value)?),
                    }
                }
                "seed" => settings.seed = as_u64(key, value)?,
                _ => log::warn!("Ignoring unknown sampler option `{key}`"),
            }
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Check that the settings are consistent.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(SamplerError::config(msg));
        if self.n_independent_samples == 0 {
            return fail("n_independent_samples must be positive");
        }
        if !(self.thin_by_nact > 0. && self.thin_by_nact.is_finite()) {
            return fail("thin_by_nact must be positive");
        }
        if self.n_temperatures == 0 || self.n_ensemble == 0 || self.n_pool == 0 {
            return fail("n_temperatures, n_ensemble and n_pool must be positive");
        }
        if self.n_temperatures > 1 && !(self.max_temperature > 1. && self.max_temperature.is_finite())
        {
            return fail("max_temperature must be larger than one for a tempered run");
        }
        if self.internal_steps_per_round == 0 {
            return fail("internal_steps_per_round must be positive");
        }
        if !(self.burn_in_nact >= 0. && self.burn_in_nact.is_finite()) {
            return fail("burn_in_nact must not be negative");
        }
        if !(self.autocorr_c > 0. && self.autocorr_c.is_finite()) {
            return fail("autocorr_c must be positive");
        }
        if self.act_interval_rounds == 0 || self.training_interval_rounds == 0 {
            return fail("act_interval_rounds and training_interval_rounds must be positive");
        }
        if self.min_training_samples > self.training_window {
            return fail("min_training_samples must not exceed training_window");
        }
        if !(self.target_acceptance > 0. && self.target_acceptance < 1.) {
            return fail("target_acceptance must lie between zero and one");
        }
        ProposalCycleBuilder::from_spec(&self.proposal_cycle)?;
        Ok(())
    }

    pub(crate) fn act_options(&self) -> ActOptions {
        ActOptions {
            autocorr_c: self.autocorr_c,
            burn_in_nact: self.burn_in_nact,
            fixed_discard: self.burn_in_fixed_discard,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn options(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn defaults_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn parses_recognized_options() {
        let settings = Settings::from_options(&options(json!({
            "n_independent_samples": 500,
            "thin_by_nact": 0.5,
            "n_temperatures": 4,
            "max_temperature": 50.0,
            "n_pool": 2,
            "proposal_cycle": "default,-learned",
            "selection": "round_robin",
            "print_interval_seconds": 2.5,
            "checkpoint_path": "out/run.json",
            "round_timeout_seconds": null,
            "max_rounds": 10,
            "seed": 42,
        })))
        .unwrap();
        assert_eq!(settings.n_independent_samples, 500);
        assert_eq!(settings.thin_by_nact, 0.5);
        assert_eq!(settings.n_temperatures, 4);
        assert_eq!(settings.n_pool, 2);
        assert_eq!(
            settings.proposal_cycle,
            CycleSpec::Preset("default,-learned".to_string())
        );
        assert_eq!(settings.selection, SelectionMode::RoundRobin);
        assert_eq!(settings.print_interval, Duration::from_millis(2500));
        assert_eq!(settings.checkpoint_path, Some(PathBuf::from("out/run.json")));
        assert_eq!(settings.round_timeout, None);
        assert_eq!(settings.max_rounds, Some(10));
        assert_eq!(settings.seed, 42);
    }

    #[test]
    fn parses_explicit_cycle() {
        let settings = Settings::from_options(&options(json!({
            "proposal_cycle": ["prior", {"name": "adaptive_gaussian", "weight": 4.0}],
        })))
        .unwrap();
        assert_eq!(
            settings.proposal_cycle,
            CycleSpec::Explicit(vec![
                ProposalSpec::new(ProposalKind::Prior, 1.),
                ProposalSpec::new(ProposalKind::AdaptiveGaussian, 4.),
            ])
        );
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let settings =
            Settings::from_options(&options(json!({ "nlive": 1000, "seed": 3 }))).unwrap();
        assert_eq!(settings.seed, 3);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let cases = [
            json!({ "n_temperatures": "four" }),
            json!({ "n_independent_samples": 0 }),
            json!({ "n_temperatures": 3, "max_temperature": 1.0 }),
            json!({ "proposal_cycle": "unknown" }),
            json!({ "proposal_cycle": ["hmc"] }),
            json!({ "selection": "sometimes" }),
            json!({ "min_training_samples": 5000, "training_window": 100 }),
            json!({ "print_interval_seconds": -1.0 }),
        ];
        for case in cases {
            let result = Settings::from_options(&options(case.clone()));
            assert!(
                matches!(result, Err(SamplerError::Configuration(_))),
                "{case} was accepted"
            );
        }
    }
}
