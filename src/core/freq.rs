//! Corpus document-frequency statistics for sensor bits.

/// Per-bit frequency of `true` across every sensor vector the agent has
/// observed. Feeds the relevance weights in [`CondSet::match_score`]: a bit
/// that is almost always on (or off) across the whole corpus carries little
/// information, so agreement on it should count for less.
///
/// [`CondSet::match_score`]: crate::core::CondSet::match_score
#[derive(Clone, Debug, Default)]
pub struct BitFreq {
    ones: Vec<u64>,
    total: u64,
}

impl BitFreq {
    /// Tracker for a fixed sensor width.
    pub fn new(width: usize) -> Self {
        Self {
            ones: vec![0; width],
            total: 0,
        }
    }

    /// Record one observed sensor vector.
    pub fn record(&mut self, sensors: &[bool]) {
        debug_assert_eq!(sensors.len(), self.ones.len());
        for (count, &bit) in self.ones.iter_mut().zip(sensors) {
            if bit {
                *count += 1;
            }
        }
        self.total += 1;
    }

    /// Document frequency of bit `i`: fraction of recorded vectors in which
    /// it was true. 0.0 before any observation or out of range.
    pub fn df(&self, i: usize) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        match self.ones.get(i) {
            Some(&count) => count as f64 / self.total as f64,
            None => 0.0,
        }
    }

    /// Number of vectors recorded so far.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Tracked sensor width.
    pub fn width(&self) -> usize {
        self.ones.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_corpus_df_zero() {
        let freq = BitFreq::new(3);
        assert_eq!(freq.df(0), 0.0);
        assert_eq!(freq.df(2), 0.0);
    }

    #[test]
    fn test_df_counts_fraction() {
        let mut freq = BitFreq::new(2);
        freq.record(&[true, false]);
        freq.record(&[true, true]);
        freq.record(&[false, true]);
        freq.record(&[true, false]);
        assert_eq!(freq.df(0), 0.75);
        assert_eq!(freq.df(1), 0.5);
        assert_eq!(freq.total(), 4);
    }

    #[test]
    fn test_out_of_range_df_zero() {
        let mut freq = BitFreq::new(1);
        freq.record(&[true]);
        assert_eq!(freq.df(5), 0.0);
    }
}
