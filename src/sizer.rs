//! Worst-case key size estimation.

/// Sentinel charged for key sizes that cannot be statically bounded, such as
/// a type that can contain itself. Any computed size at or above this value
/// is only nominally bounded.
pub const UNBOUNDED_KEY_SIZE: u64 = 1_000_000_000;

/// Accumulates a worst-case upper bound on the size of a type's key
/// encoding, including CDR alignment padding.
///
/// Machines call [`MaxSizeFinder::increase`] with their own width and
/// alignment; container machines measure one element and multiply. All
/// arithmetic saturates so unbounded sentinels never wrap.
#[derive(Debug, Default)]
pub struct MaxSizeFinder {
    pub(crate) size: u64,
}

impl MaxSizeFinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The accumulated bound in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Rounds the accumulated size up to a multiple of `alignment`.
    pub fn align(&mut self, alignment: usize) {
        let alignment = alignment as u64;
        let rem = self.size % alignment;
        if rem != 0 {
            self.size = self.size.saturating_add(alignment - rem);
        }
    }

    /// Aligns, then charges `bytes`.
    pub fn increase(&mut self, bytes: u64, alignment: usize) {
        self.align(alignment);
        self.size = self.size.saturating_add(bytes);
    }
}
