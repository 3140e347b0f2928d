use std::io;

/// Element types a receive buffer can be made of.
///
/// Frames are read into buffers of 4 byte aligned words so that the packed
/// `DeltaEntry` slices following a frame header can be borrowed in place.
pub trait Align4: bytemuck::Pod {}

impl Align4 for u32 {}
impl Align4 for f32 {}

/// Encodes a message into a frame body.
pub trait Serialize<'a> {
    /// Writes the owned part of the message into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame under construction, already holding the length prefix.
    ///
    /// # Returns
    /// An optional borrowed tail that is written right after `buf` without copying it.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}

/// Decodes a message out of a frame body, possibly borrowing from it.
pub trait Deserialize<'a>: Sized {
    /// # Arguments
    /// * `buf` - Exactly one frame body, without its length prefix.
    ///
    /// # Returns
    /// The decoded message or an `InvalidData` error if the body is malformed.
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
