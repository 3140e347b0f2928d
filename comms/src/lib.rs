//! Length prefixed framing between the coordinator and its workers.
//!
//! Every frame is a big endian `u64` body length followed by the body. Bodies
//! start with a `u32` kind header, control commands travel as JSON and weight
//! deltas as packed `(u32, f32)` entries so they can be borrowed without copying.

mod codec;
pub mod msg;
mod receiver;
mod sender;
pub mod specs;

use std::{error::Error, fmt, io};

use tokio::io::{AsyncRead, AsyncWrite};

pub use codec::{Align4, Deserialize, Serialize};
pub use receiver::OnoReceiver;
pub use sender::OnoSender;

pub type FrameLen = u64;
const FRAME_LEN_SIZE: usize = size_of::<FrameLen>();

/// The largest frame body accepted by default on either end, dense deltas over
/// high dimensional sparse text features must fit in it.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Wraps a reader and a writer into both ends of a framed channel.
///
/// # Arguments
/// * `rx` - An async readable, usually the read half of a TCP stream.
/// * `tx` - An async writable, usually the write half of the same stream.
///
/// # Returns
/// The receiving and sending ends, both bounded by `MAX_FRAME_LEN`.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}

/// The payload of the error returned for a frame over the length bound.
///
/// The receiving side rejects such a frame before reading its body, so the
/// stream can't be resynchronized afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTooLarge {
    pub len: FrameLen,
    pub max: usize,
}

impl fmt::Display for FrameTooLarge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame of {} bytes exceeds the {} bytes limit",
            self.len, self.max
        )
    }
}

impl Error for FrameTooLarge {}

/// Whether `err` is a frame rejected for its length rather than for its content.
pub fn is_frame_too_large(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.is::<FrameTooLarge>())
}

fn frame_too_large(len: FrameLen, max: usize, kind: io::ErrorKind) -> io::Error {
    io::Error::new(kind, FrameTooLarge { len, max })
}
