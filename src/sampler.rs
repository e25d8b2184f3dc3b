//! The run controller: rounds of chain updates, exchanges, adaptation,
//! convergence checks and checkpoints.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    checkpoint::{Checkpoint, CHECKPOINT_VERSION},
    error::{Result, SamplerError},
    evidence::{self, EvidenceEstimate},
    model::{Likelihood, Prior},
    pool::{geometric_ladder, ChainPool},
    proposal::{DensityBackends, ProposalCycleBuilder},
    sampler_stats::{Diagnostics, Progress},
    settings::Settings,
};

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplerState {
    Initializing,
    BurnIn,
    Sampling,
    Converged,
    /// Stopped with a checkpoint on disk, the run can be resumed.
    Checkpointed,
    /// Stopped without writing a checkpoint, the run can only be continued
    /// by this `Sampler`.
    Stopped,
    Failed,
}

impl SamplerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SamplerState::Converged | SamplerState::Failed)
    }
}

/// Callbacks for progress reporting. Every method has an empty default.
pub trait SamplerObserver: Send {
    fn on_state_change(&mut self, _from: SamplerState, _to: SamplerState) {}
    fn on_round(&mut self, _round: u64) {}
    fn on_progress(&mut self, _progress: &Progress) {}
    fn on_checkpoint(&mut self, _path: &Path, _diagnostics: &Diagnostics) {}
    fn on_finish(&mut self, _output: &SamplerOutput) {}
}

/// Reports through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl SamplerObserver for LogObserver {
    fn on_state_change(&mut self, from: SamplerState, to: SamplerState) {
        log::info!("Sampler state changed from {:?} to {:?}", from, to);
    }

    fn on_progress(&mut self, progress: &Progress) {
        log::info!("{}", progress);
    }

    fn on_checkpoint(&mut self, path: &Path, diagnostics: &Diagnostics) {
        log::info!("Wrote checkpoint to {}", path.display());
        for proposal in diagnostics.proposals.iter() {
            log::debug!("  {}", proposal);
        }
    }

    fn on_finish(&mut self, output: &SamplerOutput) {
        log::info!(
            "Finished in state {:?} after {} rounds with {} samples",
            output.state,
            output.rounds,
            output.samples.len()
        );
        for proposal in output.diagnostics.proposals.iter() {
            log::info!("  {}", proposal);
        }
        if let Some(evidence) = output.evidence {
            log::info!(
                "ln Z = {:.3} +/- {:.3} (stepping stone {:.3})",
                evidence.log_evidence,
                evidence.log_evidence_error,
                evidence.stepping_stone
            );
        }
    }
}

/// Posterior samples and summary statistics of a run.
#[derive(Debug, Clone, Serialize)]
pub struct SamplerOutput {
    pub state: SamplerState,
    pub names: Vec<String>,
    /// Post burn-in samples of the target chains, thinned by the
    /// autocorrelation time.
    pub samples: Vec<Box<[f64]>>,
    pub log_likelihoods: Vec<f64>,
    pub act: f64,
    pub burn_in: usize,
    pub independent_samples: usize,
    pub evidence: Option<EvidenceEstimate>,
    /// Evidence relative to the noise-only model of the likelihood.
    pub log_bayes_factor: Option<f64>,
    pub diagnostics: Diagnostics,
    pub rounds: u64,
    pub elapsed: Duration,
}

pub struct Sampler<L: Likelihood, P: Prior> {
    likelihood: L,
    prior: P,
    settings: Settings,
    backends: DensityBackends,
    names: Vec<String>,
    bounds: Box<[(f64, f64)]>,
    pool: ChainPool,
    state: SamplerState,
    round: u64,
    /// Wall time of all completed rounds, including earlier runs.
    elapsed: Duration,
    thread_pool: ThreadPool,
    stop: Arc<AtomicBool>,
    observer: Box<dyn SamplerObserver>,
}

/// Proposal settings that differ from a checkpoint are ignored on resume, the
/// checkpointed cycles keep their adapted state.
fn warn_ignored_settings(
    settings: &Settings,
    pool: &ChainPool,
    dim: usize,
    backends: &DensityBackends,
) {
    let requested = ProposalCycleBuilder::from_spec(&settings.proposal_cycle)
        .and_then(|builder| builder.build(dim, settings.selection, backends));
    let ignored = match requested {
        Ok(mut requested) => {
            requested.set_target_acceptance(settings.target_acceptance);
            pool.chain(0, 0).cycle().setting_differences(&requested)
        }
        Err(_) => vec!["proposal_cycle"],
    };
    if !ignored.is_empty() {
        log::warn!(
            "Resuming with the checkpointed proposals, ignoring the new {}",
            ignored.join(", ")
        );
    }
}

fn build_thread_pool(n_pool: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(n_pool)
        .thread_name(|i| format!("ptmcmc-worker-{}", i))
        .build()
        .map_err(|err| SamplerError::Initialization(format!("Could not start thread pool: {err}")))
}

impl<L: Likelihood, P: Prior> Sampler<L, P> {
    /// Set up a run with the default density backends.
    pub fn new(likelihood: L, prior: P, settings: Settings) -> Result<Self> {
        Self::with_backends(likelihood, prior, settings, DensityBackends::default())
    }

    /// Set up a run. If `settings.resume` is set and a checkpoint exists at
    /// `settings.checkpoint_path`, the run continues from there.
    pub fn with_backends(
        likelihood: L,
        prior: P,
        settings: Settings,
        backends: DensityBackends,
    ) -> Result<Self> {
        settings.validate()?;
        let existing = settings
            .checkpoint_path
            .clone()
            .filter(|path| settings.resume && path.exists());
        if let Some(path) = existing {
            log::info!("Resuming from checkpoint {}", path.display());
            match Checkpoint::load(&path) {
                Ok(checkpoint) => {
                    return Self::resume(likelihood, prior, settings, backends, checkpoint)
                }
                // The unreadable file is left alone until the first checkpoint write.
                Err(err) => log::warn!("{:#}, starting a fresh run", anyhow::Error::new(err)),
            }
        }

        let names = prior.names().to_vec();
        if names.is_empty() {
            return Err(SamplerError::config("The prior has no parameters"));
        }
        let bounds = prior.bounds();
        let thread_pool = build_thread_pool(settings.n_pool)?;

        let mut cycle = ProposalCycleBuilder::from_spec(&settings.proposal_cycle)?.build(
            names.len(),
            settings.selection,
            &backends,
        )?;
        cycle.set_target_acceptance(settings.target_acceptance);
        let betas = geometric_ladder(settings.n_temperatures, settings.max_temperature);
        let pool = thread_pool.install(|| {
            ChainPool::new(
                &likelihood,
                &prior,
                betas,
                settings.n_ensemble,
                &cycle,
                settings.seed,
            )
        })?;

        let mut sampler = Self {
            likelihood,
            prior,
            settings,
            backends,
            names,
            bounds,
            pool,
            state: SamplerState::Initializing,
            round: 0,
            elapsed: Duration::ZERO,
            thread_pool,
            stop: Arc::new(AtomicBool::new(false)),
            observer: Box::new(LogObserver),
        };
        sampler.transition(SamplerState::BurnIn);
        Ok(sampler)
    }

    /// Continue a run from a checkpoint.
    ///
    /// The settings may differ in everything but the shape of the pool.
    pub fn resume(
        likelihood: L,
        prior: P,
        settings: Settings,
        backends: DensityBackends,
        checkpoint: Checkpoint,
    ) -> Result<Self> {
        settings.validate()?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(SamplerError::config(format!(
                "Unsupported checkpoint version {}",
                checkpoint.version
            )));
        }
        let names = prior.names().to_vec();
        if checkpoint.names != names {
            return Err(SamplerError::config(format!(
                "Checkpoint parameters {:?} do not match the prior parameters {:?}",
                checkpoint.names, names
            )));
        }
        let mut pool = checkpoint.pool;
        if pool.n_temperatures() != settings.n_temperatures
            || pool.n_ensemble() != settings.n_ensemble
        {
            return Err(SamplerError::config(format!(
                "Checkpoint has {} temperatures with {} chains each, the settings ask for {} with {}",
                pool.n_temperatures(),
                pool.n_ensemble(),
                settings.n_temperatures,
                settings.n_ensemble
            )));
        }
        let thread_pool = build_thread_pool(settings.n_pool)?;
        pool.attach_backends(&backends);
        warn_ignored_settings(&settings, &pool, names.len(), &backends);

        Ok(Self {
            bounds: prior.bounds(),
            likelihood,
            prior,
            settings,
            backends,
            names,
            pool,
            state: checkpoint.state,
            round: checkpoint.round,
            elapsed: checkpoint.elapsed,
            thread_pool,
            stop: Arc::new(AtomicBool::new(false)),
            observer: Box::new(LogObserver),
        })
    }

    pub fn set_observer(&mut self, observer: impl SamplerObserver + 'static) {
        self.observer = Box::new(observer);
    }

    /// Setting the returned flag makes the run checkpoint and return after
    /// the current round.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn rounds(&self) -> u64 {
        self.round
    }

    pub fn pool(&self) -> &ChainPool {
        &self.pool
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn backends(&self) -> &DensityBackends {
        &self.backends
    }

    pub fn progress(&self) -> Progress {
        Progress::new(
            &self.pool,
            self.state,
            self.round,
            self.elapsed,
            self.settings.thin_by_nact,
            self.settings.n_independent_samples,
        )
    }

    /// The phase a resumed run continues in.
    fn active_state(&self) -> SamplerState {
        match self.state {
            SamplerState::Initializing | SamplerState::Checkpointed | SamplerState::Stopped => {
                if self.pool.is_burned_in() {
                    SamplerState::Sampling
                } else {
                    SamplerState::BurnIn
                }
            }
            state => state,
        }
    }

    pub fn checkpoint_state(&self) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            round: self.round,
            state: self.active_state(),
            elapsed: self.elapsed,
            names: self.names.clone(),
            pool: self.pool.clone(),
        }
    }

    fn transition(&mut self, to: SamplerState) {
        if self.state != to {
            let from = self.state;
            self.state = to;
            self.observer.on_state_change(from, to);
        }
    }

    /// Write a checkpoint if a path is configured. Failures are logged and
    /// the run continues.
    fn write_checkpoint(&mut self) -> bool {
        let Some(path) = self.settings.checkpoint_path.clone() else {
            return false;
        };
        match self.checkpoint_state().store(&path) {
            Ok(()) => {
                let diagnostics = Diagnostics::new(&self.pool);
                self.observer.on_checkpoint(&path, &diagnostics);
                true
            }
            Err(err) => {
                log::warn!("{:#}", anyhow::Error::new(err));
                false
            }
        }
    }

    /// Advance every chain by one round and exchange between temperatures.
    ///
    /// Returns whether the autocorrelation times were updated.
    fn step_round(&mut self) -> Result<bool> {
        let steps = self.settings.internal_steps_per_round;
        let timeout = self.settings.round_timeout;
        let likelihood = &self.likelihood;
        let prior: &dyn Prior = &self.prior;
        let bounds = &self.bounds;
        let pool = &mut self.pool;

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let failures = self
            .thread_pool
            .install(|| pool.advance(likelihood, prior, bounds, steps, deadline, None));
        let mut retry = Vec::new();
        for (id, err) in failures {
            match err {
                SamplerError::Timeout { .. } => retry.push(id),
                err => return Err(err),
            }
        }
        if !retry.is_empty() {
            log::warn!("Chains {:?} exceeded the round timeout, retrying", retry);
            let deadline = timeout.map(|timeout| Instant::now() + timeout);
            let only = Some(retry.as_slice());
            let failures = self
                .thread_pool
                .install(|| pool.advance(likelihood, prior, bounds, steps, deadline, only));
            if let Some((_, err)) = failures.into_iter().next() {
                return Err(err);
            }
        }

        let rates = pool.swap_step();
        self.round += 1;
        if self.state == SamplerState::BurnIn && self.settings.adapt_temperatures {
            pool.adapt_ladder(&rates);
        }

        let act_due = self.round % self.settings.act_interval_rounds == 0;
        if act_due {
            let options = self.settings.act_options();
            self.thread_pool.install(|| pool.update_act(&options));
        }
        if self.round % self.settings.training_interval_rounds == 0 {
            let (window, min_samples) = (
                self.settings.training_window,
                self.settings.min_training_samples,
            );
            self.thread_pool
                .install(|| pool.train_learned(window, min_samples));
        }
        self.observer.on_round(self.round);
        Ok(act_due)
    }

    fn update_phase(&mut self) {
        if self.state == SamplerState::BurnIn && self.pool.is_burned_in() {
            self.transition(SamplerState::Sampling);
        }
        if self.state == SamplerState::Sampling
            && self.pool.thinned_sample_count(self.settings.thin_by_nact)
                >= self.settings.n_independent_samples
        {
            self.transition(SamplerState::Converged);
        }
    }

    fn pause(&mut self, reason: &str) {
        log::info!("Stopping the run: {}", reason);
        if self.write_checkpoint() {
            self.transition(SamplerState::Checkpointed);
        } else {
            self.transition(SamplerState::Stopped);
        }
    }

    /// Run rounds until convergence, a stop condition or `limit` rounds.
    fn run_until(&mut self, limit: Option<u64>) -> Result<SamplerState> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }
        self.stop.store(false, Ordering::SeqCst);
        let next = self.active_state();
        self.transition(next);

        let start = Instant::now();
        let base = self.elapsed;
        let mut last_print = start;
        let mut last_checkpoint = start;
        let mut completed = 0u64;

        loop {
            self.elapsed = base + start.elapsed();
            if self.stop.load(Ordering::SeqCst) {
                self.pause("stop requested");
                break;
            }
            if self
                .settings
                .max_run_time
                .is_some_and(|max| self.elapsed >= max)
            {
                self.pause("maximum run time reached");
                break;
            }
            if self.settings.max_rounds.is_some_and(|max| self.round >= max) {
                self.pause("maximum number of rounds reached");
                break;
            }
            if limit.is_some_and(|limit| completed >= limit) {
                break;
            }

            let act_updated = match self.step_round() {
                Ok(act_updated) => act_updated,
                Err(err) => {
                    self.elapsed = base + start.elapsed();
                    log::error!("Sampling failed in round {}: {}", self.round + 1, err);
                    self.transition(SamplerState::Failed);
                    return Err(err);
                }
            };
            completed += 1;
            self.elapsed = base + start.elapsed();

            if act_updated {
                self.update_phase();
            }
            if self.state == SamplerState::Converged {
                let progress = self.progress();
                self.observer.on_progress(&progress);
                self.write_checkpoint();
                break;
            }
            if last_print.elapsed() >= self.settings.print_interval {
                let progress = self.progress();
                self.observer.on_progress(&progress);
                last_print = Instant::now();
            }
            if last_checkpoint.elapsed() >= self.settings.checkpoint_interval {
                self.write_checkpoint();
                last_checkpoint = Instant::now();
            }
        }
        Ok(self.state)
    }

    /// Sample until convergence or until a stop condition checkpoints the run.
    pub fn run(&mut self) -> Result<SamplerOutput> {
        self.run_until(None)?;
        let output = self.output();
        self.observer.on_finish(&output);
        Ok(output)
    }

    /// Run at most `rounds` rounds and return the state afterwards.
    pub fn run_rounds(&mut self, rounds: u64) -> Result<SamplerState> {
        self.run_until(Some(rounds))
    }

    /// Collect the current samples and estimates.
    pub fn output(&self) -> SamplerOutput {
        let thin = self.settings.thin_by_nact;
        let (samples, log_likelihoods): (Vec<_>, Vec<_>) = self
            .pool
            .target_chains()
            .iter()
            .flat_map(|chain| chain.thinned_samples(thin))
            .map(|sample| (sample.position.clone(), sample.log_likelihood))
            .unzip();
        let evidence = evidence::estimate(&self.pool);
        let log_bayes_factor = evidence
            .zip(self.likelihood.log_noise_evidence())
            .map(|(evidence, noise)| evidence.log_evidence - noise);

        SamplerOutput {
            state: self.state,
            names: self.names.clone(),
            samples,
            log_likelihoods,
            act: self.pool.max_act(),
            burn_in: self.pool.max_burn_in(),
            independent_samples: self.pool.thinned_sample_count(thin),
            evidence,
            log_bayes_factor,
            diagnostics: Diagnostics::new(&self.pool),
            rounds: self.round,
            elapsed: self.elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        sync::{atomic::AtomicUsize, Mutex},
        thread::sleep,
    };

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        proposal::CycleSpec,
        test_support::{BoxPrior, FailingLikelihood, NormalLikelihood, TestError},
    };

    fn settings() -> Settings {
        Settings {
            n_independent_samples: 50,
            proposal_cycle: CycleSpec::Preset("gaussian".to_string()),
            internal_steps_per_round: 50,
            act_interval_rounds: 2,
            seed: 3,
            ..Settings::default()
        }
    }

    /// Settings that keep the run in burn-in.
    fn unconverged() -> Settings {
        Settings {
            burn_in_fixed_discard: 1_000_000,
            ..settings()
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        states: Arc<Mutex<Vec<(SamplerState, SamplerState)>>>,
        rounds: Arc<AtomicUsize>,
        checkpoints: Arc<AtomicUsize>,
    }

    impl SamplerObserver for Recorder {
        fn on_state_change(&mut self, from: SamplerState, to: SamplerState) {
            self.states.lock().unwrap().push((from, to));
        }

        fn on_round(&mut self, _round: u64) {
            self.rounds.fetch_add(1, Ordering::Relaxed);
        }

        fn on_checkpoint(&mut self, _path: &Path, _diagnostics: &Diagnostics) {
            self.checkpoints.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn converges_through_phases() {
        let mut sampler =
            Sampler::new(NormalLikelihood::new(1, 1.), BoxPrior::new(1, -10., 10.), settings())
                .unwrap();
        assert_eq!(sampler.state(), SamplerState::BurnIn);
        let recorder = Recorder::default();
        sampler.set_observer(recorder.clone());

        let output = sampler.run().unwrap();
        assert_eq!(output.state, SamplerState::Converged);
        assert!(output.independent_samples >= 50);
        assert_eq!(output.samples.len(), output.log_likelihoods.len());
        assert!(output.evidence.is_none());
        assert_eq!(
            *recorder.states.lock().unwrap(),
            vec![
                (SamplerState::BurnIn, SamplerState::Sampling),
                (SamplerState::Sampling, SamplerState::Converged),
            ]
        );
        assert_eq!(
            recorder.rounds.load(Ordering::Relaxed) as u64,
            sampler.rounds()
        );

        // a finished run stays finished
        assert_eq!(sampler.run_rounds(5).unwrap(), SamplerState::Converged);
    }

    #[test]
    fn max_rounds_writes_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let settings = Settings {
            checkpoint_path: Some(path.clone()),
            max_rounds: Some(3),
            ..unconverged()
        };
        let mut sampler =
            Sampler::new(NormalLikelihood::new(1, 1.), BoxPrior::new(1, -10., 10.), settings)
                .unwrap();
        let recorder = Recorder::default();
        sampler.set_observer(recorder.clone());
        let output = sampler.run().unwrap();

        assert_eq!(output.state, SamplerState::Checkpointed);
        assert_eq!(output.rounds, 3);
        assert_eq!(recorder.checkpoints.load(Ordering::Relaxed), 1);
        let checkpoint = Checkpoint::load(&path).unwrap();
        assert_eq!(checkpoint.round, 3);
        assert_eq!(checkpoint.state, SamplerState::BurnIn);
    }

    #[test]
    fn stop_handle_pauses_run() {
        let mut sampler =
            Sampler::new(NormalLikelihood::new(1, 1.), BoxPrior::new(1, -10., 10.), unconverged())
                .unwrap();
        sampler.stop_handle().store(true, Ordering::SeqCst);
        // the flag is cleared when a run starts
        assert_eq!(sampler.run_rounds(2).unwrap(), SamplerState::BurnIn);
        assert_eq!(sampler.rounds(), 2);

        struct StopAfter(Arc<AtomicBool>, u64);
        impl SamplerObserver for StopAfter {
            fn on_round(&mut self, round: u64) {
                if round >= self.1 {
                    self.0.store(true, Ordering::SeqCst);
                }
            }
        }
        sampler.set_observer(StopAfter(sampler.stop_handle(), 4));
        // no checkpoint path, so nothing is written
        assert_eq!(sampler.run_rounds(10).unwrap(), SamplerState::Stopped);
        assert_eq!(sampler.rounds(), 4);

        // resuming continues from the same place
        sampler.set_observer(LogObserver);
        assert_eq!(sampler.run_rounds(1).unwrap(), SamplerState::BurnIn);
        assert_eq!(sampler.rounds(), 5);
    }

    #[test]
    fn failed_write_stops_without_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blocker"), "").unwrap();
        let path = dir.path().join("blocker").join("run.json");
        let settings = Settings {
            checkpoint_path: Some(path.clone()),
            max_rounds: Some(2),
            ..unconverged()
        };
        let mut sampler =
            Sampler::new(NormalLikelihood::new(1, 1.), BoxPrior::new(1, -10., 10.), settings)
                .unwrap();
        let recorder = Recorder::default();
        sampler.set_observer(recorder.clone());
        let output = sampler.run().unwrap();

        assert_eq!(output.state, SamplerState::Stopped);
        assert_eq!(output.rounds, 2);
        assert_eq!(recorder.checkpoints.load(Ordering::Relaxed), 0);
        assert!(!path.exists());
    }

    /// Removes a file once a round is reached.
    struct ClearAfter {
        blocker: PathBuf,
        round: u64,
        recorder: Recorder,
    }

    impl SamplerObserver for ClearAfter {
        fn on_round(&mut self, round: u64) {
            self.recorder.on_round(round);
            if round >= self.round && self.blocker.is_file() {
                std::fs::remove_file(&self.blocker).unwrap();
            }
        }

        fn on_checkpoint(&mut self, path: &Path, diagnostics: &Diagnostics) {
            self.recorder.on_checkpoint(path, diagnostics);
        }
    }

    #[test]
    fn failed_periodic_checkpoint_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let path = blocker.join("run.json");
        let settings = Settings {
            checkpoint_path: Some(path.clone()),
            checkpoint_interval: Duration::ZERO,
            ..settings()
        };
        let mut sampler =
            Sampler::new(NormalLikelihood::new(1, 1.), BoxPrior::new(1, -10., 10.), settings)
                .unwrap();
        let recorder = Recorder::default();
        sampler.set_observer(ClearAfter {
            blocker,
            round: 2,
            recorder: recorder.clone(),
        });
        let output = sampler.run().unwrap();

        assert_eq!(output.state, SamplerState::Converged);
        assert!(output.rounds >= 2);
        // the first round could not be written, every later one was
        assert_eq!(
            recorder.checkpoints.load(Ordering::Relaxed) as u64,
            output.rounds - 1
        );
        let checkpoint = Checkpoint::load(&path).unwrap();
        assert_eq!(checkpoint.round, output.rounds);
        assert_eq!(checkpoint.state, SamplerState::Converged);
    }

    #[test]
    fn unreadable_checkpoint_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, "{ not json").unwrap();
        let settings = Settings {
            checkpoint_path: Some(path.clone()),
            resume: true,
            max_rounds: Some(2),
            ..unconverged()
        };
        let mut sampler =
            Sampler::new(NormalLikelihood::new(1, 1.), BoxPrior::new(1, -10., 10.), settings)
                .unwrap();
        assert_eq!(sampler.rounds(), 0);
        assert_eq!(sampler.state(), SamplerState::BurnIn);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");

        assert_eq!(sampler.run_rounds(5).unwrap(), SamplerState::Checkpointed);
        assert_eq!(Checkpoint::load(&path).unwrap().round, 2);
    }

    #[test]
    fn fatal_error_fails_without_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let settings = Settings {
            checkpoint_path: Some(path.clone()),
            ..settings()
        };
        let likelihood = FailingLikelihood {
            threshold: 0.,
            recoverable: false,
        };
        let prior = BoxPrior::new(1, -1., 1.);
        let mut sampler = match Sampler::new(likelihood, prior, settings) {
            Ok(sampler) => sampler,
            // the initial draw already hit the failing region
            Err(err) => {
                assert!(matches!(err, SamplerError::LikelihoodEvaluation(_)));
                return;
            }
        };
        let err = sampler.run().unwrap_err();
        assert!(matches!(err, SamplerError::LikelihoodEvaluation(_)));
        assert_eq!(sampler.state(), SamplerState::Failed);
        assert!(!path.exists());
    }

    struct SlowLikelihood;

    impl Likelihood for SlowLikelihood {
        type Error = TestError;

        fn log_likelihood(&self, params: &[f64]) -> std::result::Result<f64, TestError> {
            sleep(Duration::from_millis(5));
            Ok(-0.5 * params.iter().map(|x| x * x).sum::<f64>())
        }
    }

    #[test]
    fn repeated_timeout_fails() {
        let settings = Settings {
            round_timeout: Some(Duration::from_millis(1)),
            ..settings()
        };
        let mut sampler =
            Sampler::new(SlowLikelihood, BoxPrior::new(1, -5., 5.), settings).unwrap();
        let err = sampler.run_rounds(1).unwrap_err();
        assert!(matches!(err, SamplerError::Timeout { chain: 0 }));
        assert_eq!(sampler.state(), SamplerState::Failed);
        assert_eq!(sampler.rounds(), 0);
    }

    #[test]
    fn resume_rejects_other_parameters() {
        let sampler =
            Sampler::new(NormalLikelihood::new(1, 1.), BoxPrior::new(1, -10., 10.), settings())
                .unwrap();
        let checkpoint = sampler.checkpoint_state();
        let err = Sampler::resume(
            NormalLikelihood::new(2, 1.),
            BoxPrior::new(2, -10., 10.),
            settings(),
            DensityBackends::default(),
            checkpoint.clone(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, SamplerError::Configuration(_)));

        let err = Sampler::resume(
            NormalLikelihood::new(1, 1.),
            BoxPrior::new(1, -10., 10.),
            Settings {
                n_temperatures: 3,
                ..settings()
            },
            DensityBackends::default(),
            checkpoint,
        )
        .err()
        .unwrap();
        assert!(matches!(err, SamplerError::Configuration(_)));
    }
}
