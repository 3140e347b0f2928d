use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{FRAME_LEN_SIZE, FrameLen, MAX_FRAME_LEN, Serialize, frame_too_large};

/// The sending end of a framed channel.
///
/// The frame buffer is reused between sends, only borrowed tails are written separately.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
    max_frame_len: usize,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Overrides the largest frame this sender will write, it should match the peer's bound.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Frames and writes `msg`, then flushes.
    ///
    /// # Arguments
    /// * `msg` - A serializable message.
    ///
    /// # Returns
    /// An `InvalidInput` error, with nothing written, if the frame exceeds the bound,
    /// or the writer's error.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self {
            tx,
            buf,
            max_frame_len,
        } = self;

        buf.clear();
        buf.resize(FRAME_LEN_SIZE, 0);

        let tail = msg.serialize(buf)?;
        let len = buf.len() - FRAME_LEN_SIZE + tail.map_or(0, <[u8]>::len);
        if len > *max_frame_len {
            return Err(frame_too_large(
                len as FrameLen,
                *max_frame_len,
                io::ErrorKind::InvalidInput,
            ));
        }

        buf[..FRAME_LEN_SIZE].copy_from_slice(&(len as FrameLen).to_be_bytes());
        tx.write_all(buf).await?;

        if let Some(tail) = tail {
            tx.write_all(tail).await?;
        }

        tx.flush().await
    }
}
