//! Debounced background execution of [`Simulation`]s.
//!
//! The host polls [`SimulationScheduler::tick`] once per frame and calls
//! [`SimulationScheduler::request`] whenever it wants fresh numbers. At most
//! one run is in flight; requests made meanwhile collapse into one pending
//! request that is served after the run finishes.

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use color_eyre::eyre;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::{
    resources::ResourceTable,
    simulation::{SimConditions, Simulation},
    stage::Stage,
    vessel::{VesselSnapshot, VesselSource},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Lower bound on the delay between runs (ms)
    pub min_delay_ms: u64,
    /// The delay between runs is this multiple of the last run's duration.
    pub delay_multiplier: u32,
    /// Dump every prepared part tree at debug level.
    pub log_snapshot: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 0,
            delay_multiplier: 10,
            log_snapshot: false,
        }
    }
}

impl SchedulerConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    fn delay_after(&self, run: Duration) -> Duration {
        (run * self.delay_multiplier).max(self.min_delay())
    }
}

/// The outcome of the most recent completed run.
#[derive(Clone, Debug, PartialEq)]
pub enum SimulationResults {
    Stages(Arc<[Stage]>),
    Failed(String),
}

impl SimulationResults {
    pub fn stages(&self) -> Option<&[Stage]> {
        match self {
            Self::Stages(stages) => Some(stages),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            Self::Stages(_) => None,
            Self::Failed(message) => Some(message),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Requested,
    /// `requested` is set when a request came in during the run.
    Running { requested: bool },
}

struct State {
    phase: Phase,
    /// Started by the first request after a run starts.
    timer: Option<Instant>,
    delay: Duration,
    time_taken: Duration,
}

type ReadyCallback = Arc<dyn Fn() + Send + Sync>;

pub struct SimulationScheduler {
    config: SchedulerConfig,
    table: Arc<ResourceTable>,
    conditions: SimConditions,
    state: Arc<Mutex<State>>,
    results: Arc<RwLock<Option<SimulationResults>>>,
    on_ready: Option<ReadyCallback>,
    worker: Option<JoinHandle<()>>,
}

impl SimulationScheduler {
    pub fn new(config: SchedulerConfig, table: Arc<ResourceTable>) -> Self {
        let delay = config.min_delay();
        Self {
            config,
            table,
            conditions: SimConditions::default(),
            state: Arc::new(Mutex::new(State {
                phase: Phase::Idle,
                timer: None,
                delay,
                time_taken: Duration::ZERO,
            })),
            results: Arc::new(RwLock::new(None)),
            on_ready: None,
            worker: None,
        }
    }

    /// Called from the worker thread after every published result.
    #[must_use]
    pub fn with_on_ready(mut self, on_ready: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Arc::new(on_ready));
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn conditions(&self) -> SimConditions {
        self.conditions
    }

    /// Conditions for runs started from now on.
    pub fn set_conditions(&mut self, conditions: SimConditions) {
        self.conditions = conditions;
    }

    /// Asks for a new run. Repeated requests before the run starts are
    /// coalesced.
    pub fn request(&self) {
        let mut state = self.state.lock();
        state.phase = match state.phase {
            Phase::Idle | Phase::Requested => Phase::Requested,
            Phase::Running { .. } => Phase::Running { requested: true },
        };
        if state.timer.is_none() {
            state.timer = Some(Instant::now());
        }
    }

    /// Starts a run if one is pending, none is in flight, `source` has a
    /// vessel and the adaptive delay has passed. Returns whether a run was
    /// started.
    pub fn tick(&mut self, source: &dyn VesselSource) -> bool {
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Requested || !source.has_vessel() {
                return false;
            }
            if state.timer.map_or(true, |t| t.elapsed() <= state.delay) {
                return false;
            }
            state.phase = Phase::Running { requested: false };
            state.timer = None;
        }

        match source.snapshot() {
            Ok(snapshot) => self.start(snapshot),
            Err(e) => {
                error!("SimulationScheduler::tick: could not read vessel: {e:#}");
                *self.results.write() = Some(SimulationResults::Failed(format!("{e:#}")));
                finish(&self.state, &self.config, Duration::ZERO);
                if let Some(on_ready) = &self.on_ready {
                    on_ready();
                }
            }
        }
        true
    }

    fn start(&mut self, snapshot: VesselSnapshot) {
        debug!(
            "SimulationScheduler::start: {} parts, conditions {:?}",
            snapshot.parts.len(),
            self.conditions
        );

        let table = self.table.clone();
        let conditions = self.conditions;
        let config = self.config.clone();
        let state = self.state.clone();
        let results = self.results.clone();
        let on_ready = self.on_ready.clone();

        self.worker = Some(thread::spawn(move || {
            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                run_once(&snapshot, table, conditions, config.log_snapshot)
            }));
            let elapsed = started.elapsed();

            let published = match outcome {
                Ok(Ok(stages)) => SimulationResults::Stages(stages.into()),
                Ok(Err(e)) => {
                    error!("SimulationScheduler: simulation failed: {e:#}");
                    SimulationResults::Failed(format!("{e:#}"))
                }
                Err(panic) => {
                    let message = panic_message(&*panic);
                    error!("SimulationScheduler: simulation panicked: {message}");
                    SimulationResults::Failed(message)
                }
            };
            *results.write() = Some(published);
            finish(&state, &config, elapsed);
            debug!("SimulationScheduler: run took {elapsed:?}");

            if let Some(on_ready) = on_ready {
                on_ready();
            }
        }));
    }

    /// Is no run in flight?
    pub fn results_ready(&self) -> bool {
        !matches!(self.state.lock().phase, Phase::Running { .. })
    }

    /// The most recently completed run, if any.
    pub fn results(&self) -> Option<SimulationResults> {
        self.results.read().clone()
    }

    pub fn stages(&self) -> Option<Arc<[Stage]>> {
        match &*self.results.read() {
            Some(SimulationResults::Stages(stages)) => Some(stages.clone()),
            _ => None,
        }
    }

    pub fn failure_message(&self) -> Option<String> {
        self.results
            .read()
            .as_ref()
            .and_then(|r| r.failure().map(ToOwned::to_owned))
    }

    /// The highest-numbered stage of the last result, the one that fires
    /// next.
    pub fn last_stage(&self) -> Option<Stage> {
        self.results
            .read()
            .as_ref()
            .and_then(SimulationResults::stages)
            .and_then(|stages| stages.last().copied())
    }

    /// Wall clock duration of the last run.
    pub fn time_taken(&self) -> Duration {
        self.state.lock().time_taken
    }

    /// Current delay between a request and the run it starts.
    pub fn delay(&self) -> Duration {
        self.state.lock().delay
    }
}

impl fmt::Debug for SimulationScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulationScheduler")
            .field("config", &self.config)
            .field("conditions", &self.conditions)
            .field("phase", &state.phase)
            .field("delay", &state.delay)
            .finish_non_exhaustive()
    }
}

impl Drop for SimulationScheduler {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if !worker.is_finished() {
                debug!("SimulationScheduler: dropped with a run in flight, leaving it detached");
            }
        }
    }
}

fn run_once(
    snapshot: &VesselSnapshot,
    table: Arc<ResourceTable>,
    conditions: SimConditions,
    log_snapshot: bool,
) -> eyre::Result<Vec<Stage>> {
    let mut sim = Simulation::prepare(snapshot, table, conditions)?;
    if log_snapshot {
        sim.log_parts();
    }
    sim.run()
}

fn finish(state: &Mutex<State>, config: &SchedulerConfig, elapsed: Duration) {
    let mut state = state.lock();
    state.time_taken = elapsed;
    state.delay = config.delay_after(elapsed);
    state.phase = match state.phase {
        Phase::Running { requested: true } => Phase::Requested,
        _ => Phase::Idle,
    };
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "simulation panicked".to_owned()
    }
}
