use std::{borrow::Cow, error::Error, fmt, io, net::SocketAddr};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::aggregation::{AggregationErr, AggregationState};

/// Why an inbound message was answered with an error.
#[derive(Debug, Clone, PartialEq)]
pub enum CallErr {
    /// The message is not something a worker may send to the coordinator.
    Unexpected(&'static str),
    Rejected(AggregationErr),
}

impl fmt::Display for CallErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unexpected(kind) => write!(f, "the coordinator does not handle {kind}"),
            Self::Rejected(e) => write!(f, "rejected: {e}"),
        }
    }
}

impl Error for CallErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Rejected(e) => Some(e),
            Self::Unexpected(_) => None,
        }
    }
}

impl From<AggregationErr> for CallErr {
    fn from(value: AggregationErr) -> Self {
        Self::Rejected(value)
    }
}

/// Applies a single inbound worker message to the aggregation state.
///
/// # Arguments
/// * `state` - The shared aggregation state.
/// * `msg` - The decoded message.
///
/// # Returns
/// An error if the message was rejected, the state is left untouched in that case.
pub fn dispatch(state: &AggregationState, msg: Msg<'_>) -> Result<(), CallErr> {
    match msg {
        Msg::Data(Payload::SubmitUpdate { worker_id, delta }) => {
            state.submit_update(worker_id as usize, delta)?
        }
        Msg::Control(Command::SubmitReadyToGo { worker_id }) => state.submit_ready(worker_id)?,
        Msg::Control(Command::SubmitEpochDone { worker_id }) => {
            state.submit_epoch_done(worker_id)?
        }
        other => return Err(CallErr::Unexpected(other.kind())),
    }

    Ok(())
}

/// Serves one worker connection until it closes or the token is cancelled.
///
/// Every request is answered with exactly one `Ack` or error frame.
pub(super) async fn serve_connection<R, W>(
    mut rx: OnoReceiver<R>,
    mut tx: OnoSender<W>,
    state: &AggregationState,
    token: &CancellationToken,
    peer: SocketAddr,
) -> io::Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut rx_buf: Vec<u32> = Vec::new();

    loop {
        let received = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            received = rx.recv_into::<Msg, _>(&mut rx_buf) => received,
        };

        let msg = match received {
            Ok(msg) => msg,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!(peer = peer.to_string().as_str(); "worker disconnected");
                return Ok(());
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData && !comms::is_frame_too_large(&e) => {
                // The whole frame was read, only this call fails.
                warn!(peer = peer.to_string().as_str(); "malformed message: {e}");
                let detail = format!("malformed message: {e}");
                tx.send(&Msg::Err(Cow::Borrowed(&detail))).await?;
                continue;
            }
            Err(e) => {
                // The body of an oversized frame was never read, the stream can't be trusted anymore.
                let detail = format!("malformed message: {e}");
                let _ = tx.send(&Msg::Err(Cow::Borrowed(&detail))).await;
                return Err(e);
            }
        };

        let kind = msg.kind();
        debug!(peer = peer.to_string().as_str(), kind = kind; "received call");

        let reply = match dispatch(state, msg) {
            Ok(()) => Msg::Control(Command::Ack),
            Err(e) => {
                warn!(peer = peer.to_string().as_str(), kind = kind; "{e}");
                Msg::Err(Cow::Owned(e.to_string()))
            }
        };

        tx.send(&reply).await?;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use comms::{MAX_FRAME_LEN, Serialize, specs::DeltaEntry};
    use tokio::{
        io::{self as tio, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf},
        task::JoinHandle,
    };

    use super::*;
    use crate::{aggregation::Counters, config::Mode};

    /// The worker end of a served connection, frames are written raw so
    /// malformed ones can be sent too.
    struct Peer {
        rx: OnoReceiver<ReadHalf<DuplexStream>>,
        raw_tx: WriteHalf<DuplexStream>,
        rx_buf: Vec<u32>,
    }

    impl Peer {
        async fn send_body(&mut self, body: &[u8]) -> io::Result<()> {
            self.raw_tx
                .write_all(&(body.len() as u64).to_be_bytes())
                .await?;
            self.raw_tx.write_all(body).await
        }

        async fn send(&mut self, msg: &Msg<'_>) -> io::Result<()> {
            let mut body = Vec::new();
            let tail = msg.serialize(&mut body)?;
            body.extend_from_slice(tail.unwrap_or_default());
            self.send_body(&body).await
        }

        /// Waits for the reply, `None` stands for an ack.
        async fn reply(&mut self) -> io::Result<Option<String>> {
            match self.rx.recv_into(&mut self.rx_buf).await? {
                Msg::Control(Command::Ack) => Ok(None),
                Msg::Err(detail) => Ok(Some(detail.into_owned())),
                other => panic!("unexpected reply {other:?}"),
            }
        }
    }

    fn serve(state: Arc<AggregationState>) -> (Peer, JoinHandle<io::Result<()>>) {
        let (one, two) = tio::duplex(4096);
        let (rx1, tx1) = tio::split(one);
        let (rx2, tx2) = tio::split(two);
        let (rx, tx) = comms::channel(rx2, tx2);
        let peer = "127.0.0.1:40000".parse().unwrap();

        let handle = tokio::spawn(async move {
            let token = CancellationToken::new();
            serve_connection(rx, tx, &state, &token, peer).await
        });

        let (rx, _) = comms::channel(rx1, tio::sink());
        let peer = Peer {
            rx,
            raw_tx: tx1,
            rx_buf: Vec::new(),
        };

        (peer, handle)
    }

    #[test]
    fn worker_calls_reach_the_state() {
        let state = AggregationState::new(Mode::Synchronous, 2, 4);
        let delta = [DeltaEntry::new(1, 0.5)];

        dispatch(
            &state,
            Msg::Data(Payload::SubmitUpdate {
                worker_id: 1,
                delta: &delta,
            }),
        )
        .unwrap();
        dispatch(&state, Msg::Control(Command::SubmitReadyToGo { worker_id: 0 })).unwrap();
        dispatch(&state, Msg::Control(Command::SubmitEpochDone { worker_id: 0 })).unwrap();

        let counters = state.counters();
        assert_eq!(counters.sync_update_counter, 1);
        assert_eq!(counters.sync_ready_counter, 1);
        assert_eq!(counters.epochs_done_counter, 1);
    }

    #[test]
    fn coordinator_bound_messages_are_unexpected() {
        let state = AggregationState::new(Mode::Synchronous, 1, 1);

        assert_eq!(
            dispatch(&state, Msg::Control(Command::PushStop)),
            Err(CallErr::Unexpected("control/push_stop"))
        );
        assert_eq!(
            dispatch(&state, Msg::Data(Payload::PushUpdate(&[]))),
            Err(CallErr::Unexpected("data/push_update"))
        );
    }

    #[test]
    fn out_of_range_updates_are_rejected() {
        let state = AggregationState::new(Mode::Asynchronous, 1, 4);
        let delta = [DeltaEntry::new(4, 1.0)];

        let err = dispatch(
            &state,
            Msg::Data(Payload::SubmitUpdate {
                worker_id: 0,
                delta: &delta,
            }),
        )
        .unwrap_err();

        assert_eq!(
            err,
            CallErr::Rejected(AggregationErr::IndexOutOfRange { index: 4, dim: 4 })
        );
        assert_eq!(state.counters().volume, 0);
    }

    #[tokio::test]
    async fn malformed_frames_only_fail_their_own_call() -> io::Result<()> {
        let state = Arc::new(AggregationState::new(Mode::Synchronous, 1, 4));
        let (mut peer, handle) = serve(Arc::clone(&state));

        // A submitted update whose entries stop halfway through.
        let ragged = [2u32.to_be_bytes(), 0u32.to_be_bytes(), 1u32.to_be_bytes()].concat();
        peer.send_body(&ragged).await?;
        let detail = peer.reply().await?.expect("an error reply");
        assert!(detail.contains("malformed"), "{detail}");

        peer.send(&Msg::Control(Command::SubmitEpochDone { worker_id: 0 }))
            .await?;
        assert_eq!(peer.reply().await?, None);
        assert_eq!(state.counters().epochs_done_counter, 1);

        drop(peer);
        handle.await.unwrap()
    }

    #[tokio::test]
    async fn rejected_calls_are_answered_with_an_error_frame() -> io::Result<()> {
        let state = Arc::new(AggregationState::new(Mode::Asynchronous, 1, 4));
        let (mut peer, handle) = serve(Arc::clone(&state));

        let delta = [DeltaEntry::new(0, 1.0), DeltaEntry::new(9, 1.0)];
        peer.send(&Msg::Data(Payload::SubmitUpdate {
            worker_id: 0,
            delta: &delta,
        }))
        .await?;
        let detail = peer.reply().await?.expect("an error reply");
        assert!(detail.contains("out of range"), "{detail}");

        peer.send(&Msg::Control(Command::SubmitReadyToGo { worker_id: 0 }))
            .await?;
        let detail = peer.reply().await?.expect("an error reply");
        assert!(detail.contains("asynchronous"), "{detail}");

        assert_eq!(state.counters(), Counters::default());

        drop(peer);
        handle.await.unwrap()
    }

    #[tokio::test]
    async fn oversized_frames_close_the_connection() {
        let state = Arc::new(AggregationState::new(Mode::Synchronous, 1, 4));
        let (mut peer, handle) = serve(state);

        peer.raw_tx
            .write_all(&(MAX_FRAME_LEN as u64 + 1).to_be_bytes())
            .await
            .unwrap();

        let detail = peer.reply().await.unwrap().expect("an error reply");
        assert!(detail.contains("exceeds"), "{detail}");

        let err = handle.await.unwrap().unwrap_err();
        assert!(comms::is_frame_too_large(&err));
    }
}
