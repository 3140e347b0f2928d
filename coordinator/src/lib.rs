pub mod aggregation;
pub mod config;
pub mod dataset;
pub mod early_stopping;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod run_log;
pub mod service;

use std::sync::Arc;

use futures::future;
use log::{info, warn};
use rand::{SeedableRng, rngs::StdRng};
use tokio::net::{
    TcpListener,
    tcp::{OwnedReadHalf, OwnedWriteHalf},
};
use tokio_util::sync::CancellationToken;

use crate::{
    aggregation::AggregationState,
    config::RunConfig,
    dataset::Dataset,
    error::{CoordinatorErr, Result},
    model::LinearSvm,
    orchestrator::Orchestrator,
    registry::NodeRegistry,
    run_log::RunLog,
    service::{CoordinationService, RemoteWorker},
};

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunLog),
    /// The run was cancelled, partial state was discarded and there is no log.
    Aborted,
}

/// Runs a whole training session against the configured workers.
///
/// # Arguments
/// * `config` - The run's configuration.
/// * `dataset` - The full training data, the coordinator keeps the validation part.
/// * `token` - Cancelling it aborts the run without any further calls to the workers.
///
/// # Returns
/// The outcome of the run, or the error that ended it.
pub async fn run(
    config: RunConfig,
    dataset: Dataset,
    token: CancellationToken,
) -> Result<RunOutcome> {
    match drive(config, dataset, &token).await {
        Ok(log) => Ok(RunOutcome::Completed(log)),
        Err(CoordinatorErr::Cancelled) => {
            warn!("run cancelled, discarding partial state");
            Ok(RunOutcome::Aborted)
        }
        Err(e) => Err(e),
    }
}

async fn drive(config: RunConfig, dataset: Dataset, token: &CancellationToken) -> Result<RunLog> {
    config.validate()?;
    let config = Arc::new(config);

    let dim = dataset.dimension();
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let split = dataset.split(config.validation_split, &mut rng);
    info!(
        dim = dim,
        train = split.train_len,
        validation = split.val_indices.len();
        "dataset split"
    );

    let listener = TcpListener::bind(config.bind_address()).await?;
    let coordinator_address = match &config.coordinator_address {
        Some(addr) => addr.clone(),
        None => listener.local_addr()?.to_string(),
    };

    let registry = NodeRegistry::new(
        coordinator_address,
        config.worker_addresses.clone(),
        split.val_indices,
    )?;

    let clients = connect_all(&registry, &config, token).await?;
    let state = Arc::new(AggregationState::new(config.mode, registry.len(), dim));
    let model = LinearSvm::new(config.lambda_reg, dim);

    let mut orchestrator = Orchestrator::new(
        Arc::clone(&config),
        registry,
        clients,
        Arc::clone(&state),
        model,
        split.validation,
        token.clone(),
    )?;

    orchestrator.register_nodes().await?;

    let service_token = token.child_token();
    let service = CoordinationService::new(
        listener,
        state,
        config.max_connections,
        service_token.clone(),
    );
    let serving = tokio::spawn(service.run());

    let trained = match orchestrator.start_workers().await {
        Ok(()) => orchestrator.train().await,
        Err(e) => Err(e),
    };

    service_token.cancel();
    match serving.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("coordination service failed: {e}"),
        Err(e) => warn!("coordination service task failed: {e}"),
    }

    trained
}

/// Connects to every worker, the run can't start unless all of them are reachable.
async fn connect_all(
    registry: &NodeRegistry,
    config: &RunConfig,
    token: &CancellationToken,
) -> Result<Vec<RemoteWorker<OwnedReadHalf, OwnedWriteHalf>>> {
    let backoff = config.connect_backoff();
    let connections = registry
        .workers()
        .iter()
        .map(|addr| RemoteWorker::connect(addr, config.connect_retries, backoff));

    let results = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(CoordinatorErr::Cancelled),
        results = future::join_all(connections) => results,
    };

    registry
        .workers()
        .iter()
        .zip(results)
        .map(|(addr, result)| {
            result.map_err(|source| CoordinatorErr::Registration {
                addr: addr.clone(),
                source,
            })
        })
        .collect()
}
