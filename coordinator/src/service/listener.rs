use std::{io, net::SocketAddr, sync::Arc};

use log::{debug, info, warn};
use tokio::{net::TcpListener, sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

use super::handler::serve_connection;
use crate::aggregation::AggregationState;

/// The inbound side of the protocol, accepts worker connections and feeds their
/// calls into the aggregation state.
pub struct CoordinationService {
    listener: TcpListener,
    state: Arc<AggregationState>,
    permits: Arc<Semaphore>,
    token: CancellationToken,
}

impl CoordinationService {
    /// Creates a new `CoordinationService`.
    ///
    /// # Arguments
    /// * `listener` - An already bound listener.
    /// * `state` - The state every inbound call mutates.
    /// * `max_connections` - The maximum amount of connections served at once.
    /// * `token` - Cancelling it closes the listener and every connection.
    pub fn new(
        listener: TcpListener,
        state: Arc<AggregationState>,
        max_connections: usize,
        token: CancellationToken,
    ) -> Self {
        Self {
            listener,
            state,
            permits: Arc::new(Semaphore::new(max_connections)),
            token,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts and serves connections until the token is cancelled.
    ///
    /// # Returns
    /// An io error if the listener itself failed.
    pub async fn run(self) -> io::Result<()> {
        let Self {
            listener,
            state,
            permits,
            token,
        } = self;

        let mut tasks: JoinSet<Result<(), (SocketAddr, io::Error)>> = JoinSet::new();
        info!(addr = listener.local_addr()?.to_string().as_str(); "coordination service listening");

        loop {
            while let Some(joined) = tasks.try_join_next() {
                match joined {
                    Ok(Err((peer, e))) => {
                        warn!(peer = peer.to_string().as_str(); "connection closed: {e}")
                    }
                    Err(e) if e.is_panic() => warn!("connection task panicked: {e}"),
                    _ => {}
                }
            }

            let permit = tokio::select! {
                _ = token.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => permit.map_err(io::Error::other)?,
            };

            let (stream, peer) = tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };

            stream.set_nodelay(true)?;
            debug!(peer = peer.to_string().as_str(); "worker connected");

            let (rx, tx) = stream.into_split();
            let (rx, tx) = comms::channel(rx, tx);
            let state = Arc::clone(&state);
            let token = token.clone();

            tasks.spawn(async move {
                let _permit = permit;
                serve_connection(rx, tx, &state, &token, peer)
                    .await
                    .map_err(|e| (peer, e))
            });
        }

        tasks.shutdown().await;
        info!("coordination service stopped");
        Ok(())
    }
}
