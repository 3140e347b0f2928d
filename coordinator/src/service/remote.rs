use std::{io, time::Duration};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
    specs::{DeltaEntry, NetworkInfo, StartSpec},
};
use log::{debug, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use super::WorkerClient;

/// A worker reached over a `comms` channel.
pub struct RemoteWorker<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    addr: String,
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
    rx_buf: Vec<u32>,
}

impl RemoteWorker<OwnedReadHalf, OwnedWriteHalf> {
    /// Connects to a worker over TCP, retrying a bounded amount of times.
    ///
    /// # Arguments
    /// * `addr` - The worker's address.
    /// * `retries` - How many times to retry after the first failed attempt.
    /// * `backoff` - How long to wait between attempts.
    ///
    /// # Returns
    /// A connected worker or the last connection error.
    pub async fn connect(addr: &str, retries: usize, backoff: Duration) -> io::Result<Self> {
        let mut attempt = 0;

        let stream = loop {
            match TcpStream::connect(addr).await {
                Ok(stream) => break stream,
                Err(e) if attempt < retries => {
                    attempt += 1;
                    warn!(addr = addr, attempt = attempt; "failed to connect to worker: {e}");
                    time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        };

        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);
        Ok(Self::new(addr.to_string(), rx, tx))
    }
}

impl<R, W> RemoteWorker<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a new `RemoteWorker` over an already established channel.
    ///
    /// # Arguments
    /// * `addr` - The worker's address, used in logs and errors.
    /// * `rx` - The receiving end of the channel.
    /// * `tx` - The sending end of the channel.
    pub fn new(addr: String, rx: OnoReceiver<R>, tx: OnoSender<W>) -> Self {
        Self {
            addr,
            rx,
            tx,
            rx_buf: Vec::new(),
        }
    }

    /// Sends a request and waits for its acknowledgement.
    async fn call(&mut self, msg: &Msg<'_>) -> io::Result<()> {
        let kind = msg.kind();
        debug!(addr = self.addr.as_str(), kind = kind; "calling worker");

        self.tx.send(msg).await?;

        match self.rx.recv_into(&mut self.rx_buf).await? {
            Msg::Control(Command::Ack) => Ok(()),
            Msg::Err(detail) => Err(io::Error::other(format!(
                "worker {} rejected {kind}: {detail}",
                self.addr
            ))),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "worker {} answered {kind} with {}, expected an ack",
                    self.addr,
                    other.kind()
                ),
            )),
        }
    }
}

impl<R, W> WorkerClient for RemoteWorker<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn register_node(&mut self, info: &NetworkInfo) -> io::Result<()> {
        let msg = Msg::Control(Command::RegisterNode(info.clone()));
        self.call(&msg).await
    }

    async fn start_sgd(&mut self, spec: &StartSpec) -> io::Result<()> {
        let msg = Msg::Control(Command::StartSgd(*spec));
        self.call(&msg).await
    }

    async fn push_weight_update(&mut self, delta: &[DeltaEntry]) -> io::Result<()> {
        let msg = Msg::Data(Payload::PushUpdate(delta));
        self.call(&msg).await
    }

    async fn push_ready_to_go(&mut self) -> io::Result<()> {
        self.call(&Msg::Control(Command::PushReadyToGo)).await
    }

    async fn push_stop(&mut self) -> io::Result<()> {
        self.call(&Msg::Control(Command::PushStop)).await
    }
}
