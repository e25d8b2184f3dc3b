//! Weighted collections of proposals.
//!
//! A cycle is assembled by [`ProposalCycleBuilder`] from a named preset or an
//! explicit list. Entries whose backend is missing stay in the cycle as
//! disabled variants with zero weight, so that they still show up in the
//! diagnostics.

use std::fmt::Display;

use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

use super::{DensityBackends, Proposal, ProposalClass, ProposalContext, ProposalKind, Proposed};
use crate::error::{Result, SamplerError};

/// Number of slots in one round-robin sequence.
const ROUND_ROBIN_LENGTH: usize = 100;

/// Named cycle compositions.
const PRESETS: &[(&str, &[(ProposalKind, f64)])] = &[
    (
        "default",
        &[
            (ProposalKind::AdaptiveGaussian, 10.),
            (ProposalKind::DifferentialEvolution, 10.),
            (ProposalKind::EnsembleWalk, 3.),
            (ProposalKind::EnsembleStretch, 3.),
            (ProposalKind::Uniform, 1.),
            (ProposalKind::Prior, 1.),
            (ProposalKind::Kde, 5.),
            (ProposalKind::Gmm, 5.),
        ],
    ),
    (
        "gaussian",
        &[
            (ProposalKind::AdaptiveGaussian, 10.),
            (ProposalKind::FixedGaussian, 5.),
            (ProposalKind::Prior, 1.),
        ],
    ),
    (
        "ensemble",
        &[
            (ProposalKind::DifferentialEvolution, 10.),
            (ProposalKind::EnsembleWalk, 5.),
            (ProposalKind::EnsembleStretch, 5.),
            (ProposalKind::AdaptiveGaussian, 2.),
        ],
    ),
    (
        "learned",
        &[
            (ProposalKind::AdaptiveGaussian, 5.),
            (ProposalKind::Kde, 10.),
            (ProposalKind::Gmm, 10.),
            (ProposalKind::Flow, 10.),
            (ProposalKind::Prior, 1.),
        ],
    ),
];

/// One proposal kind with its relative selection weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProposalSpec {
    pub kind: ProposalKind,
    pub weight: f64,
}

impl ProposalSpec {
    pub fn new(kind: ProposalKind, weight: f64) -> Self {
        Self { kind, weight }
    }
}

/// How a cycle is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CycleSpec {
    /// Preset name, optionally followed by exclusions: `"default,-learned,-uniform"`.
    Preset(String),
    Explicit(Vec<ProposalSpec>),
}

impl Default for CycleSpec {
    fn default() -> Self {
        CycleSpec::Preset("default".to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Independent weighted draw for every step.
    #[default]
    Weighted,
    /// A shuffled sequence in which every proposal appears in proportion to
    /// its weight. The sequence is reshuffled once it is used up.
    RoundRobin,
}

impl SelectionMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "weighted" | "random" => Some(SelectionMode::Weighted),
            "round_robin" | "cycle" => Some(SelectionMode::RoundRobin),
            _ => None,
        }
    }
}

/// Assembles the weighted entry list of a cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalCycleBuilder {
    specs: Vec<ProposalSpec>,
}

impl ProposalCycleBuilder {
    /// Start from a preset. Comma separated `-tag` items remove proposals by
    /// kind or class name.
    pub fn preset(spec: &str) -> Result<Self> {
        let mut items = spec.split(',').map(str::trim).filter(|item| !item.is_empty());
        let name = items
            .next()
            .ok_or_else(|| SamplerError::config("Empty proposal cycle name"))?;
        let (_, entries) = PRESETS
            .iter()
            .find(|(preset, _)| *preset == name)
            .ok_or_else(|| {
                let known: Vec<&str> = PRESETS.iter().map(|(preset, _)| *preset).collect();
                SamplerError::config(format!(
                    "Unknown proposal cycle `{name}`, expected one of {}",
                    known.join(", ")
                ))
            })?;
        let mut builder = Self {
            specs: entries
                .iter()
                .map(|&(kind, weight)| ProposalSpec::new(kind, weight))
                .collect(),
        };
        for item in items {
            let Some(tag) = item.strip_prefix('-') else {
                return Err(SamplerError::config(format!(
                    "Expected an exclusion like `-learned` in proposal cycle, found `{item}`"
                )));
            };
            builder = builder.remove(tag)?;
        }
        Ok(builder)
    }

    pub fn explicit(specs: Vec<ProposalSpec>) -> Result<Self> {
        if let Some(spec) = specs
            .iter()
            .find(|spec| !(spec.weight.is_finite() && spec.weight >= 0.))
        {
            return Err(SamplerError::config(format!(
                "Invalid weight {} for proposal {}",
                spec.weight,
                spec.kind.name()
            )));
        }
        let builder = Self { specs };
        if !(builder.total_weight() > 0.) {
            return Err(SamplerError::config(
                "Proposal cycle needs at least one proposal with positive weight",
            ));
        }
        Ok(builder)
    }

    pub fn from_spec(spec: &CycleSpec) -> Result<Self> {
        match spec {
            CycleSpec::Preset(name) => Self::preset(name),
            CycleSpec::Explicit(specs) => Self::explicit(specs.clone()),
        }
    }

    pub fn specs(&self) -> &[ProposalSpec] {
        &self.specs
    }

    pub fn total_weight(&self) -> f64 {
        self.specs.iter().map(|spec| spec.weight).sum()
    }

    /// Drop every proposal matching a kind or class name and rescale the rest
    /// so that the total weight stays the same.
    pub fn remove(mut self, tag: &str) -> Result<Self> {
        let kind = ProposalKind::from_name(tag);
        let class = ProposalClass::from_name(tag);
        if kind.is_none() && class.is_none() {
            return Err(SamplerError::config(format!("Unknown proposal tag `{tag}`")));
        }
        let matches = |other: ProposalKind| Some(other) == kind || Some(other.class()) == class;

        let total = self.total_weight();
        self.specs.retain(|spec| !matches(spec.kind));
        let remaining = self.total_weight();
        if !(remaining > 0.) {
            return Err(SamplerError::config(format!(
                "Removing `{tag}` leaves no proposal with positive weight"
            )));
        }
        let factor = total / remaining;
        self.specs.iter_mut().for_each(|spec| spec.weight *= factor);
        Ok(self)
    }

    /// Instantiate the proposals. Learned proposals without a backend are
    /// disabled and their weight goes to the other entries.
    pub fn build(
        &self,
        dim: usize,
        mode: SelectionMode,
        backends: &DensityBackends,
    ) -> Result<ProposalCycle> {
        let total = self.total_weight();
        let mut entries: Vec<CycleEntry> = self
            .specs
            .iter()
            .map(|spec| CycleEntry {
                kind: spec.kind,
                weight: spec.weight,
                proposal: Proposal::new(spec.kind, dim, backends),
                counter: AcceptanceCounter::default(),
            })
            .collect();

        for entry in entries.iter_mut().filter(|entry| entry.proposal.is_disabled()) {
            if let Proposal::Disabled(disabled) = &entry.proposal {
                let err = SamplerError::ProposalUnavailable {
                    name: entry.kind.name().to_string(),
                    reason: disabled.reason.clone(),
                };
                log::warn!("{err}, its weight is redistributed");
            }
            entry.weight = 0.;
        }

        let remaining: f64 = entries.iter().map(|entry| entry.weight).sum();
        if !(remaining > 0.) {
            return Err(SamplerError::config(
                "No proposal in the cycle is available",
            ));
        }
        let factor = total / remaining;
        entries.iter_mut().for_each(|entry| entry.weight *= factor);

        Ok(ProposalCycle {
            entries,
            mode,
            sequence: Vec::new(),
            position: 0,
        })
    }
}

/// Usage and acceptance counts of one proposal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptanceCounter {
    pub used: u64,
    pub accepted: u64,
}

impl AcceptanceCounter {
    pub fn record(&mut self, accepted: bool) {
        self.used += 1;
        if accepted {
            self.accepted += 1;
        }
    }

    pub fn ratio(&self) -> Option<f64> {
        (self.used > 0).then(|| self.accepted as f64 / self.used as f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CycleEntry {
    kind: ProposalKind,
    weight: f64,
    proposal: Proposal,
    counter: AcceptanceCounter,
}

/// Diagnostic line for one proposal of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalSummary {
    pub name: &'static str,
    pub class: ProposalClass,
    pub weight: f64,
    pub used: u64,
    pub accepted: u64,
    pub acceptance_ratio: Option<f64>,
    pub trained: bool,
    pub disabled: bool,
}

impl Display for ProposalSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:<24} weight {:>6.2}", self.name, self.weight)?;
        if self.disabled {
            return write!(f, " disabled");
        }
        match self.acceptance_ratio {
            Some(ratio) => write!(f, " acc {:>5.3}", ratio)?,
            None => write!(f, " acc   n/a")?,
        }
        write!(f, " used {:>9}", self.used)?;
        if self.class == ProposalClass::Learned {
            write!(f, " trained {}", self.trained)?;
        }
        Ok(())
    }
}

/// The proposals of one chain with their weights and counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalCycle {
    entries: Vec<CycleEntry>,
    mode: SelectionMode,
    sequence: Vec<usize>,
    position: usize,
}

impl ProposalCycle {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn weights(&self) -> impl Iterator<Item = (ProposalKind, f64)> + '_ {
        self.entries.iter().map(|entry| (entry.kind, entry.weight))
    }

    pub fn kind(&self, idx: usize) -> ProposalKind {
        self.entries[idx].kind
    }

    /// Index of the proposal for the next step. Zero weight entries are never
    /// selected.
    pub fn select<R: Rng + ?Sized>(&mut self, rng: &mut R) -> usize {
        match self.mode {
            SelectionMode::Weighted => self.select_weighted(rng),
            SelectionMode::RoundRobin => {
                if self.position >= self.sequence.len() {
                    self.refill_sequence(rng);
                }
                let idx = self.sequence[self.position];
                self.position += 1;
                idx
            }
        }
    }

    fn select_weighted<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let total: f64 = self.entries.iter().map(|entry| entry.weight).sum();
        let mut u = rng.random::<f64>() * total;
        let mut last = 0;
        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.weight <= 0. {
                continue;
            }
            if u < entry.weight {
                return idx;
            }
            u -= entry.weight;
            last = idx;
        }
        last
    }

    fn refill_sequence<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let total: f64 = self.entries.iter().map(|entry| entry.weight).sum();
        self.sequence.clear();
        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.weight <= 0. {
                continue;
            }
            let slots = (entry.weight / total * ROUND_ROBIN_LENGTH as f64).round() as usize;
            self.sequence
                .extend(std::iter::repeat(idx).take(slots.max(1)));
        }
        self.sequence.shuffle(rng);
        self.position = 0;
    }

    pub fn propose<R: Rng>(
        &mut self,
        idx: usize,
        current: &[f64],
        ctx: &ProposalContext,
        rng: &mut R,
    ) -> Proposed {
        self.entries[idx].proposal.propose(current, ctx, rng)
    }

    /// Feed the outcome of a step back into the counters and the proposal.
    pub fn record(&mut self, idx: usize, accepted: bool) {
        let entry = &mut self.entries[idx];
        entry.counter.record(accepted);
        entry.proposal.update(accepted);
    }

    pub fn counter(&self, kind: ProposalKind) -> AcceptanceCounter {
        self.entries
            .iter()
            .filter(|entry| entry.kind == kind)
            .fold(AcceptanceCounter::default(), |mut acc, entry| {
                acc.used += entry.counter.used;
                acc.accepted += entry.counter.accepted;
                acc
            })
    }

    /// Target acceptance rate of the adaptive Gaussian proposals.
    pub fn set_target_acceptance(&mut self, target: f64) {
        for entry in self.entries.iter_mut() {
            if let Proposal::AdaptiveGaussian(proposal) = &mut entry.proposal {
                proposal.target_accept = target;
            }
        }
    }

    pub fn target_acceptance(&self) -> Option<f64> {
        self.entries.iter().find_map(|entry| match &entry.proposal {
            Proposal::AdaptiveGaussian(proposal) => Some(proposal.target_accept),
            _ => None,
        })
    }

    /// Names of the settings that would have built `other` differently.
    pub fn setting_differences(&self, other: &ProposalCycle) -> Vec<&'static str> {
        let mut differences = Vec::new();
        if !self.weights().eq(other.weights()) {
            differences.push("proposal_cycle");
        }
        if self.mode != other.mode {
            differences.push("selection");
        }
        if self.target_acceptance() != other.target_acceptance() {
            differences.push("target_acceptance");
        }
        differences
    }

    pub fn has_learned(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| matches!(entry.proposal, Proposal::Learned(_)))
    }

    /// Retrain every learned proposal on `data`.
    pub fn train_learned(&mut self, data: &[Box<[f64]>], min_samples: usize) {
        for entry in self.entries.iter_mut() {
            if let Proposal::Learned(proposal) = &mut entry.proposal {
                proposal.train(data.to_vec(), min_samples);
            }
        }
    }

    /// Reconnect learned proposals to their estimators after deserialization.
    pub fn attach_backends(&mut self, backends: &DensityBackends) {
        for entry in self.entries.iter_mut() {
            if let Proposal::Learned(proposal) = &mut entry.proposal {
                proposal.attach(backends.get(entry.kind));
            }
        }
    }

    pub fn summary(&self) -> Vec<ProposalSummary> {
        self.entries
            .iter()
            .map(|entry| ProposalSummary {
                name: entry.kind.name(),
                class: entry.kind.class(),
                weight: entry.weight,
                used: entry.counter.used,
                accepted: entry.counter.accepted,
                acceptance_ratio: entry.counter.ratio(),
                trained: entry.proposal.is_trained(),
                disabled: entry.proposal.is_disabled(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::proposal::GaussianKde;

    fn kde_only() -> DensityBackends {
        let mut backends = DensityBackends::empty();
        backends.register(ProposalKind::Kde, Arc::new(GaussianKde::default()));
        backends
    }

    #[test]
    fn preset_with_exclusions() {
        let builder = ProposalCycleBuilder::preset("default,-learned,-uniform").unwrap();
        let full = ProposalCycleBuilder::preset("default").unwrap();
        assert!(builder
            .specs()
            .iter()
            .all(|spec| spec.kind.class() != ProposalClass::Learned
                && spec.kind != ProposalKind::Uniform));
        assert_relative_eq!(builder.total_weight(), full.total_weight(), epsilon = 1e-12);
    }

    #[test]
    fn unknown_names_are_configuration_errors() {
        assert!(matches!(
            ProposalCycleBuilder::preset("fancy"),
            Err(SamplerError::Configuration(_))
        ));
        assert!(matches!(
            ProposalCycleBuilder::preset("default,-hmc"),
            Err(SamplerError::Configuration(_))
        ));
        assert!(matches!(
            ProposalCycleBuilder::preset("default,learned"),
            Err(SamplerError::Configuration(_))
        ));
        assert!(matches!(
            ProposalCycleBuilder::explicit(vec![ProposalSpec::new(ProposalKind::Prior, 0.)]),
            Err(SamplerError::Configuration(_))
        ));
    }

    #[test]
    fn removing_everything_is_an_error() {
        let builder = ProposalCycleBuilder::explicit(vec![ProposalSpec::new(
            ProposalKind::AdaptiveGaussian,
            1.,
        )])
        .unwrap();
        assert!(builder.remove("adaptive").is_err());
    }

    #[test]
    fn missing_backend_is_disabled_and_renormalized() {
        let builder = ProposalCycleBuilder::explicit(vec![
            ProposalSpec::new(ProposalKind::AdaptiveGaussian, 1.),
            ProposalSpec::new(ProposalKind::Kde, 1.),
            ProposalSpec::new(ProposalKind::Flow, 2.),
        ])
        .unwrap();
        let cycle = builder
            .build(2, SelectionMode::Weighted, &kde_only())
            .unwrap();
        let weights: Vec<(ProposalKind, f64)> = cycle.weights().collect();
        assert_eq!(
            weights,
            vec![
                (ProposalKind::AdaptiveGaussian, 2.),
                (ProposalKind::Kde, 2.),
                (ProposalKind::Flow, 0.),
            ]
        );
        let summary = cycle.summary();
        assert!(summary[2].disabled);
        assert!(!summary[1].disabled);
    }

    #[test]
    fn only_disabled_proposals_is_an_error() {
        let builder =
            ProposalCycleBuilder::explicit(vec![ProposalSpec::new(ProposalKind::Flow, 1.)])
                .unwrap();
        assert!(builder
            .build(2, SelectionMode::Weighted, &DensityBackends::default())
            .is_err());
    }

    #[test]
    fn weighted_selection_frequencies() {
        let builder = ProposalCycleBuilder::explicit(vec![
            ProposalSpec::new(ProposalKind::Prior, 1.),
            ProposalSpec::new(ProposalKind::Uniform, 3.),
            ProposalSpec::new(ProposalKind::Flow, 5.),
        ])
        .unwrap();
        let mut cycle = builder
            .build(1, SelectionMode::Weighted, &DensityBackends::empty())
            .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut counts = [0usize; 3];
        for _ in 0..40_000 {
            counts[cycle.select(&mut rng)] += 1;
        }
        assert_eq!(counts[2], 0);
        let frac = counts[1] as f64 / 40_000.;
        assert!((frac - 0.75).abs() < 0.01, "fraction {frac}");
    }

    #[test]
    fn round_robin_is_proportional() {
        let builder = ProposalCycleBuilder::explicit(vec![
            ProposalSpec::new(ProposalKind::Prior, 1.),
            ProposalSpec::new(ProposalKind::Uniform, 4.),
        ])
        .unwrap();
        let mut cycle = builder
            .build(1, SelectionMode::RoundRobin, &DensityBackends::empty())
            .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut counts = [0usize; 2];
        for _ in 0..ROUND_ROBIN_LENGTH {
            counts[cycle.select(&mut rng)] += 1;
        }
        assert_eq!(counts, [20, 80]);
    }

    #[test]
    fn record_updates_counters() {
        let builder =
            ProposalCycleBuilder::explicit(vec![ProposalSpec::new(ProposalKind::Prior, 1.)])
                .unwrap();
        let mut cycle = builder
            .build(1, SelectionMode::Weighted, &DensityBackends::empty())
            .unwrap();
        cycle.record(0, true);
        cycle.record(0, false);
        cycle.record(0, false);
        let summary = cycle.summary();
        assert_eq!(summary[0].used, 3);
        assert_eq!(summary[0].accepted, 1);
        assert_relative_eq!(summary[0].acceptance_ratio.unwrap(), 1. / 3.);
    }

    #[test]
    fn setting_differences_name_changed_settings() {
        let build = |preset: &str, mode, target| {
            let mut cycle = ProposalCycleBuilder::preset(preset)
                .unwrap()
                .build(2, mode, &DensityBackends::empty())
                .unwrap();
            cycle.set_target_acceptance(target);
            cycle
        };
        let base = build("gaussian", SelectionMode::Weighted, 0.234);
        assert_eq!(base.target_acceptance(), Some(0.234));
        assert!(base
            .setting_differences(&build("gaussian", SelectionMode::Weighted, 0.234))
            .is_empty());
        assert_eq!(
            base.setting_differences(&build("gaussian", SelectionMode::Weighted, 0.4)),
            vec!["target_acceptance"]
        );
        assert_eq!(
            base.setting_differences(&build("default", SelectionMode::RoundRobin, 0.234)),
            vec!["proposal_cycle", "selection"]
        );
    }

    proptest! {
        #[test]
        fn remove_keeps_total_and_proportions(
            weights in prop::collection::vec(0.1f64..10., 4),
            removed in 0usize..4,
        ) {
            let kinds = [
                ProposalKind::Prior,
                ProposalKind::AdaptiveGaussian,
                ProposalKind::DifferentialEvolution,
                ProposalKind::Kde,
            ];
            let specs: Vec<ProposalSpec> = kinds
                .iter()
                .zip(weights.iter())
                .map(|(&kind, &weight)| ProposalSpec::new(kind, weight))
                .collect();
            let builder = ProposalCycleBuilder::explicit(specs.clone()).unwrap();
            let total = builder.total_weight();
            let reduced = builder.remove(kinds[removed].name()).unwrap();
            prop_assert!((reduced.total_weight() - total).abs() < 1e-9 * total);

            let kept: Vec<&ProposalSpec> =
                specs.iter().filter(|spec| spec.kind != kinds[removed]).collect();
            prop_assert_eq!(kept.len(), reduced.specs().len());
            let ratio = reduced.specs()[0].weight / kept[0].weight;
            for (old, new) in kept.iter().zip(reduced.specs()) {
                prop_assert!((new.weight / old.weight - ratio).abs() < 1e-9);
            }
        }
    }
}
