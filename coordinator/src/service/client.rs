use std::io;

use comms::specs::{DeltaEntry, NetworkInfo, StartSpec};

/// The outbound side of the protocol, one client per worker.
///
/// Every call completes only once the worker acknowledged it.
#[trait_variant::make(WorkerClient: Send)]
pub trait WorkerClientTemplate {
    /// The address of the worker behind this client.
    fn addr(&self) -> &str;

    /// Tells the worker who its coordinator and peers are.
    ///
    /// # Arguments
    /// * `info` - The worker's network information.
    async fn register_node(&mut self, info: &NetworkInfo) -> io::Result<()>;

    /// Starts the worker's local training loop.
    ///
    /// # Arguments
    /// * `spec` - The hyperparameters shared by every worker.
    async fn start_sgd(&mut self, spec: &StartSpec) -> io::Result<()>;

    /// Sends the aggregated delta of a synchronous round.
    ///
    /// # Arguments
    /// * `delta` - The summed delta, ordered by index.
    async fn push_weight_update(&mut self, delta: &[DeltaEntry]) -> io::Result<()>;

    /// Releases the worker into the next synchronous round.
    async fn push_ready_to_go(&mut self) -> io::Result<()>;

    /// Instructs the worker to stop training.
    async fn push_stop(&mut self) -> io::Result<()>;
}
