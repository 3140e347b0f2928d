use std::{future::Future, io, sync::Arc, time::Instant};

use chrono::Utc;
use futures::future;
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::{
    aggregation::{AggregationState, WaitOutcome},
    config::{Mode, RunConfig},
    dataset::Dataset,
    early_stopping::EarlyStopping,
    error::{CoordinatorErr, Result},
    model::Model,
    registry::NodeRegistry,
    run_log::{Accuracy, RunLog, ValidationLossRecord},
    service::WorkerClient,
};

/// The lifecycle of a run, it only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Initializing,
    Running,
    Stopping,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundEnd {
    Completed,
    EpochsDone,
}

/// Drives a run round by round, from registering the workers to building the run log.
///
/// The model is only ever mutated here, inbound calls only reach the aggregation state.
pub struct Orchestrator<C, M> {
    config: Arc<RunConfig>,
    registry: NodeRegistry,
    clients: Vec<C>,
    state: Arc<AggregationState>,
    model: M,
    monitor: EarlyStopping,
    validation: Dataset,
    token: CancellationToken,
    phase: Phase,
    round: usize,
    losses: Vec<ValidationLossRecord>,
}

impl<C, M> Orchestrator<C, M>
where
    C: WorkerClient,
    M: Model + Send,
{
    /// Creates a new `Orchestrator`.
    ///
    /// # Arguments
    /// * `config` - The run's configuration.
    /// * `registry` - The fixed set of workers.
    /// * `clients` - One client per worker, in registry order.
    /// * `state` - The state shared with the coordination service.
    /// * `model` - The coordinator's copy of the model.
    /// * `validation` - The held out samples to evaluate on.
    /// * `token` - Cancelling it aborts the run at the next wait or broadcast.
    ///
    /// # Returns
    /// A new orchestrator or an error if the clients don't match the registry.
    pub fn new(
        config: Arc<RunConfig>,
        registry: NodeRegistry,
        clients: Vec<C>,
        state: Arc<AggregationState>,
        model: M,
        validation: Dataset,
        token: CancellationToken,
    ) -> Result<Self> {
        if clients.len() != registry.len() || state.workers() != registry.len() {
            return Err(CoordinatorErr::InvalidConfig(format!(
                "{} workers registered but got {} clients and state for {}",
                registry.len(),
                clients.len(),
                state.workers()
            )));
        }

        Ok(Self {
            monitor: EarlyStopping::new(config.persistence),
            config,
            registry,
            clients,
            state,
            model,
            validation,
            token,
            phase: Phase::Initializing,
            round: 0,
            losses: Vec::new(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The amount of rounds completed so far.
    pub fn round(&self) -> usize {
        self.round
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn losses(&self) -> &[ValidationLossRecord] {
        &self.losses
    }

    /// Sends every worker its network information.
    ///
    /// # Returns
    /// An error naming the first worker that could not be registered, no worker
    /// may be started in that case.
    pub async fn register_nodes(&mut self) -> Result<()> {
        let Self {
            registry,
            clients,
            token,
            ..
        } = self;

        let infos: Vec<_> = (0..registry.len())
            .map(|id| registry.network_info(id))
            .collect();

        let calls = clients
            .iter_mut()
            .zip(&infos)
            .map(|(client, info)| client.register_node(info));

        let results = interruptible(token, future::join_all(calls)).await?;

        for (addr, result) in registry.workers().iter().zip(results) {
            result.map_err(|source| CoordinatorErr::Registration {
                addr: addr.clone(),
                source,
            })?;
        }

        info!(workers = registry.len(); "every worker registered");
        Ok(())
    }

    /// Starts every worker's local training, the run is running once all of them acknowledged.
    pub async fn start_workers(&mut self) -> Result<()> {
        let spec = self.config.start_spec(self.model.dimension());
        self.broadcast("start_sgd", 0, |client| client.start_sgd(&spec))
            .await?;

        self.enter(Phase::Running);
        Ok(())
    }

    /// Runs rounds until every worker finished its epochs or the validation loss stops improving.
    ///
    /// # Returns
    /// The run log, or `CoordinatorErr::Cancelled` if the run was interrupted.
    pub async fn train(&mut self) -> Result<RunLog> {
        let start_time = Utc::now();
        let clock = Instant::now();

        let stopped_early = loop {
            let end = match self.config.mode {
                Mode::Synchronous => self.sync_round().await?,
                Mode::Asynchronous => self.async_round().await?,
            };

            if end == RoundEnd::EpochsDone {
                info!(round = self.round; "every worker finished its epochs");
                break false;
            }

            if self.evaluate() {
                info!(round = self.round; "validation loss stopped improving");
                break true;
            }
        };

        if stopped_early {
            self.enter(Phase::Stopping);
            let round = self.round;
            self.broadcast("push_stop", round, |client| client.push_stop())
                .await?;
        }

        if self.config.mode == Mode::Asynchronous {
            let rest = self.state.drain();
            debug!(entries = rest.len(); "folding the remaining deltas");
            self.model.update_weights(&rest);
        }

        self.enter(Phase::Terminated);

        let predictions = self.model.predict(&self.validation);
        let accuracy = Accuracy::measure(self.validation.labels(), &predictions);
        info!("final accuracy {:?}", accuracy);

        Ok(RunLog {
            start_time,
            end_time: Utc::now(),
            running_time: clock.elapsed().as_secs_f64(),
            n_workers: self.registry.len(),
            running_mode: self.config.mode,
            accuracy: accuracy.overall,
            accuracy_positive: accuracy.positive,
            accuracy_negative: accuracy.negative,
            losses_val: self.losses.clone(),
            tag: self.config.tag.clone(),
        })
    }

    /// Two barriers, one for the deltas and one for the workers' readiness.
    async fn sync_round(&mut self) -> Result<RoundEnd> {
        let outcome = interruptible(&self.token, self.state.wait_for_updates()).await?;
        if outcome == WaitOutcome::AllEpochsDone {
            return Ok(RoundEnd::EpochsDone);
        }

        let round = self.round + 1;
        let aggregate = self.state.drain();
        let entries = aggregate.to_entries();
        self.broadcast("push_weight_update", round, |client| {
            client.push_weight_update(&entries)
        })
        .await?;

        self.model.update_weights(&aggregate);

        let outcome = interruptible(&self.token, self.state.wait_for_ready()).await?;
        if outcome == WaitOutcome::Reached {
            self.state.reset_ready();
            self.broadcast("push_ready_to_go", round, |client| client.push_ready_to_go())
                .await?;
        }

        Ok(RoundEnd::Completed)
    }

    /// Folds whatever accumulated once there is enough of it, workers are never blocked.
    async fn async_round(&mut self) -> Result<RoundEnd> {
        let threshold = self.config.volume_threshold();
        let outcome = interruptible(&self.token, self.state.wait_for_volume(threshold)).await?;
        if outcome == WaitOutcome::AllEpochsDone {
            return Ok(RoundEnd::EpochsDone);
        }

        let aggregate = self.state.drain();
        self.model.update_weights(&aggregate);
        Ok(RoundEnd::Completed)
    }

    /// Records the validation loss of the current round.
    ///
    /// # Returns
    /// Whether training should stop.
    fn evaluate(&mut self) -> bool {
        let loss = self.model.loss(&self.validation);
        self.losses.push(ValidationLossRecord::now(loss));
        info!(round = self.round, loss = loss; "validation loss");

        self.round += 1;
        self.monitor.evaluate(loss)
    }

    /// Issues the same call to every worker concurrently.
    ///
    /// # Arguments
    /// * `step` - The name of the call, used in errors.
    /// * `round` - The round in progress, zero before the first one.
    /// * `call` - Issues the call on a single client.
    ///
    /// # Returns
    /// An error naming a worker that failed, only once every call finished.
    async fn broadcast<'c, F, Fut>(
        &'c mut self,
        step: &'static str,
        round: usize,
        call: F,
    ) -> Result<()>
    where
        F: FnMut(&'c mut C) -> Fut,
        Fut: Future<Output = io::Result<()>>,
    {
        let Self {
            config,
            registry,
            clients,
            token,
            ..
        } = self;

        debug!(step = step, round = round; "broadcasting");
        let results = interruptible(token, future::join_all(clients.iter_mut().map(call))).await?;

        for (addr, result) in registry.workers().iter().zip(results) {
            result.map_err(|source| CoordinatorErr::Transport {
                addr: addr.clone(),
                step,
                round,
                mode: config.mode,
                source,
            })?;
        }

        Ok(())
    }

    fn enter(&mut self, phase: Phase) {
        info!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

/// Races `fut` against the cancellation of `token`.
async fn interruptible<F: Future>(token: &CancellationToken, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(CoordinatorErr::Cancelled),
        output = fut => Ok(output),
    }
}
