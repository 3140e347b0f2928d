use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Align4, Deserialize, FRAME_LEN_SIZE, FrameLen, MAX_FRAME_LEN, frame_too_large};

/// The receiving end of a framed channel.
pub struct OnoReceiver<R: AsyncRead + Unpin> {
    rx: R,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> OnoReceiver<R> {
    pub(super) fn new(rx: R) -> Self {
        Self {
            rx,
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Overrides the largest frame this receiver accepts.
    ///
    /// # Arguments
    /// * `max_frame_len` - The maximum body length in bytes.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Waits for the next frame and decodes it.
    ///
    /// # Arguments
    /// * `buf` - The buffer the frame body is read into, the returned `T` may
    ///   borrow from it.
    ///
    /// # Returns
    /// The decoded message, `UnexpectedEof` if the peer closed the stream, or
    /// `InvalidData` if the frame exceeds the bound or is malformed. An oversized
    /// frame is rejected before its body is read, so the stream can't be used afterwards.
    pub async fn recv_into<'buf, T, B>(&mut self, buf: &'buf mut Vec<B>) -> io::Result<T>
    where
        T: Deserialize<'buf>,
        B: Align4,
    {
        let mut prefix = [0; FRAME_LEN_SIZE];
        self.rx.read_exact(&mut prefix).await?;
        let len = FrameLen::from_be_bytes(prefix);

        let len = match usize::try_from(len) {
            Ok(len) if len <= self.max_frame_len => len,
            _ => {
                return Err(frame_too_large(
                    len,
                    self.max_frame_len,
                    io::ErrorKind::InvalidData,
                ));
            }
        };

        buf.clear();
        buf.resize(len.div_ceil(size_of::<B>()), B::zeroed());

        let body = &mut bytemuck::cast_slice_mut::<B, u8>(buf.as_mut_slice())[..len];
        self.rx.read_exact(body).await?;

        T::deserialize(body)
    }
}
