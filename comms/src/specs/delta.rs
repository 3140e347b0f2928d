use bytemuck::{Pod, Zeroable};

/// A single sparse weight change, packed so whole slices of it travel zero-copy.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DeltaEntry {
    pub index: u32,
    pub value: f32,
}

impl DeltaEntry {
    /// Creates a new `DeltaEntry`.
    ///
    /// # Arguments
    /// * `index` - The weight index this change applies to.
    /// * `value` - The amount to add to that weight.
    pub fn new(index: u32, value: f32) -> Self {
        Self { index, value }
    }
}
