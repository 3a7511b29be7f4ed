//! Decaying shift-register confidence.

/// Number of evidence bits in the register.
pub const NUM_CONF_BITS: u32 = 7;

/// Scalar confidence in [0,1] backed by a 7-bit shift register.
///
/// Each observation shifts the register right and writes the newest bit into
/// the most significant position, so recent evidence dominates exponentially
/// in bits of evidence, not wall-clock time. A fresh `Conf` is the optimistic
/// prior: all ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Conf {
    raw: u8,
}

impl Conf {
    /// All-ones register, the highest confidence representable.
    pub const MAX: u8 = 0x7F;

    /// Most significant register bit, written by `adjust`.
    const MOST_SIG: u8 = 0x40;

    /// Optimistic prior: starts at `MAX`.
    pub fn new() -> Self {
        Self { raw: Self::MAX }
    }

    /// Register with a given raw value, clamped to the 7-bit range.
    pub fn from_raw(raw: u8) -> Self {
        Self { raw: raw & Self::MAX }
    }

    /// Shift one observation into the register.
    pub fn adjust(&mut self, observed_true: bool) {
        self.raw >>= 1;
        if observed_true {
            self.raw |= Self::MOST_SIG;
        }
    }

    /// Confidence as a fraction of the maximum register value, in [0,1].
    pub fn value(&self) -> f64 {
        self.raw as f64 / Self::MAX as f64
    }

    /// Raw register contents.
    pub fn raw(&self) -> u8 {
        self.raw
    }
}

impl Default for Conf {
    fn default() -> Self {
        Self::new()
    }
}
