use std::collections::BTreeMap;

use comms::specs::DeltaEntry;

/// A sparse weight delta, a mapping from weight index to the amount it should change.
///
/// Combining deltas is vector addition, so the result never depends on the order they arrive in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightDelta(BTreeMap<u32, f32>);

impl WeightDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a delta from wire entries, repeated indices are summed.
    pub fn from_entries(entries: &[DeltaEntry]) -> Self {
        let mut delta = Self::new();
        delta.add_entries(entries);
        delta
    }

    /// Adds `value` to the change at `index`.
    pub fn add(&mut self, index: u32, value: f32) {
        *self.0.entry(index).or_default() += value;
    }

    pub fn add_entries(&mut self, entries: &[DeltaEntry]) {
        for entry in entries {
            self.add(entry.index, entry.value);
        }
    }

    /// Adds every change of `other` to this delta.
    pub fn merge(&mut self, other: &WeightDelta) {
        for (index, value) in other.iter() {
            self.add(index, value);
        }
    }

    /// The amount of distinct indices touched.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The change at `index`, zero when untouched.
    pub fn get(&self, index: u32) -> f32 {
        self.0.get(&index).copied().unwrap_or(0.0)
    }

    /// Iterates the changes ordered by index.
    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.0.iter().map(|(&i, &v)| (i, v))
    }

    /// Converts this delta into wire entries, ordered by index.
    pub fn to_entries(&self) -> Vec<DeltaEntry> {
        self.iter().map(|(i, v)| DeltaEntry::new(i, v)).collect()
    }
}

impl FromIterator<(u32, f32)> for WeightDelta {
    fn from_iter<I: IntoIterator<Item = (u32, f32)>>(iter: I) -> Self {
        let mut delta = Self::new();
        for (index, value) in iter {
            delta.add(index, value);
        }
        delta
    }
}
