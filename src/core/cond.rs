//! Condition sets: fixed-width bit patterns with per-bit confidence.

use std::fmt;

use super::{BitFreq, Conf};

/// One side (LHS or RHS) of a rule: a fixed-width boolean pattern plus one
/// [`Conf`] per bit.
///
/// The `base` bits are captured at construction and never change; the
/// confidences track how reliably each base bit has been re-observed since.
///
/// Equality is defined on `base` only: two sets with identical bits but
/// different confidences compare equal. Comparisons between sets of
/// different widths are always defined (score 0.0 / not-equal), never
/// undefined.
#[derive(Clone, Debug)]
pub struct CondSet {
    base: Vec<bool>,
    confs: Vec<Conf>,
}

impl CondSet {
    /// Capture a sensor vector with fresh max-confidence per bit.
    pub fn from_sensors(sensors: &[bool]) -> Self {
        Self {
            base: sensors.to_vec(),
            confs: vec![Conf::new(); sensors.len()],
        }
    }

    /// Number of conditions.
    pub fn width(&self) -> usize {
        self.base.len()
    }

    /// Base value of bit `i`.
    pub fn bit(&self, i: usize) -> bool {
        self.base[i]
    }

    /// Confidence of bit `i`.
    pub fn conf(&self, i: usize) -> Conf {
        self.confs[i]
    }

    /// Shift one observation into every bit's confidence register.
    ///
    /// Confidence tracks the reliability of the *fixed* base value, not the
    /// raw input: a bit observes `true` when the sensor still agrees with it.
    pub fn update(&mut self, sensors: &[bool]) {
        debug_assert_eq!(sensors.len(), self.base.len());
        let n = self.base.len().min(sensors.len());
        for i in 0..n {
            self.confs[i].adjust(sensors[i] == self.base[i]);
        }
    }

    /// Approximate-match score against another set, in [0,1].
    ///
    /// ```text
    /// score = Σ over agreeing bits (evidence_i · relevance_i)
    ///         ─────────────────────────────────────────────
    ///         Σ over all bits (relevance_i)
    ///
    /// evidence_i  = this set's confidence in bit i
    /// relevance_i = |evidence_i − corpus document frequency of bit i|
    /// ```
    ///
    /// A bit whose confidence merely mirrors how often the whole corpus sees
    /// it on carries no information and is weighted out. Width mismatch and a
    /// zero relevance denominator both yield exactly 0.0, never NaN.
    pub fn match_score(&self, other: &CondSet, freq: &BitFreq) -> f64 {
        if self.width() != other.width() {
            return 0.0;
        }

        let mut num = 0.0;
        let mut den = 0.0;
        for i in 0..self.width() {
            let evidence = self.confs[i].value();
            let relevance = (evidence - freq.df(i)).abs();
            den += relevance;
            if self.base[i] == other.base[i] {
                num += evidence * relevance;
            }
        }

        if den == 0.0 {
            return 0.0;
        }
        num / den
    }

    /// Fraction of disagreeing positions, ignoring confidence entirely.
    ///
    /// 0.0 means bit-identical. Used only for exact/near-duplicate
    /// detection, never for planning. Sets of different widths are never
    /// duplicates, so the mismatch case reports full disagreement.
    pub fn cardinality_match(&self, other: &CondSet) -> f64 {
        if self.width() != other.width() || self.width() == 0 {
            return 1.0;
        }
        let disagree = self
            .base
            .iter()
            .zip(&other.base)
            .filter(|(a, b)| a != b)
            .count();
        disagree as f64 / self.width() as f64
    }

    /// Destructively merge another set into this one.
    ///
    /// Where bits disagree, the higher-confidence side's bit wins and the
    /// merged confidence is the raw confidence delta (near-ties leave the
    /// surviving bit nearly unbelieved). Where bits agree, the confidences
    /// are averaged.
    pub fn merge(&mut self, other: &CondSet) {
        debug_assert_eq!(self.width(), other.width());
        let n = self.width().min(other.width());
        for i in 0..n {
            let a = self.confs[i].raw();
            let b = other.confs[i].raw();
            if self.base[i] == other.base[i] {
                self.confs[i] = Conf::from_raw(((a as u16 + b as u16) / 2) as u8);
            } else {
                if b > a {
                    self.base[i] = other.base[i];
                }
                self.confs[i] = Conf::from_raw(a.abs_diff(b));
            }
        }
    }

    /// Mean per-bit confidence, the tie-break weight for match results.
    pub fn mean_conf(&self) -> f64 {
        if self.confs.is_empty() {
            return 0.0;
        }
        self.confs.iter().map(|c| c.value()).sum::<f64>() / self.confs.len() as f64
    }

    /// Diagnostic rendering of the base bits, e.g. `0110`.
    pub fn bit_string(&self) -> String {
        self.base.iter().map(|&b| if b { '1' } else { '0' }).collect()
    }
}

impl PartialEq for CondSet {
    fn eq(&self, other: &Self) -> bool {
        self.base == other.base
    }
}

impl Eq for CondSet {}

impl fmt::Display for CondSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.bit_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(width: usize, vectors: &[&[bool]]) -> BitFreq {
        let mut freq = BitFreq::new(width);
        for v in vectors {
            freq.record(v);
        }
        freq
    }

    #[test]
    fn test_exact_match_scores_one() {
        let freq = corpus(2, &[&[false, false], &[false, true]]);
        let a = CondSet::from_sensors(&[false, true]);
        let b = CondSet::from_sensors(&[false, true]);
        assert_eq!(a.match_score(&b, &freq), 1.0);
    }

    #[test]
    fn test_complete_mismatch_scores_zero() {
        let freq = corpus(2, &[&[false, false], &[true, true]]);
        let a = CondSet::from_sensors(&[false, false]);
        let b = CondSet::from_sensors(&[true, true]);
        assert_eq!(a.match_score(&b, &freq), 0.0);
    }

    #[test]
    fn test_zero_denominator_scores_zero_not_nan() {
        // Fresh confidences are all 1.0; a corpus where every bit is always
        // on makes every relevance |1.0 - 1.0| = 0.
        let freq = corpus(2, &[&[true, true], &[true, true]]);
        let a = CondSet::from_sensors(&[true, true]);
        let b = CondSet::from_sensors(&[true, true]);
        let score = a.match_score(&b, &freq);
        assert_eq!(score, 0.0);
        assert!(!score.is_nan());
    }

    #[test]
    fn test_width_mismatch_defined() {
        let freq = corpus(2, &[&[false, true]]);
        let a = CondSet::from_sensors(&[false, true]);
        let b = CondSet::from_sensors(&[false, true, false]);
        assert_eq!(a.match_score(&b, &freq), 0.0);
        assert_ne!(a, b);
        assert_eq!(a.cardinality_match(&b), 1.0);
    }

    #[test]
    fn test_update_tracks_base_not_input() {
        let mut a = CondSet::from_sensors(&[true, false]);
        // Sensor keeps agreeing with base bit 0 and contradicting bit 1.
        for _ in 0..8 {
            a.update(&[true, true]);
        }
        assert_eq!(a.conf(0).value(), 1.0);
        assert_eq!(a.conf(1).value(), 0.0);
        // Base itself never moves.
        assert!(a.bit(0));
        assert!(!a.bit(1));
    }

    #[test]
    fn test_equality_ignores_confidence() {
        let a = CondSet::from_sensors(&[true, false]);
        let mut b = CondSet::from_sensors(&[true, false]);
        for _ in 0..5 {
            b.update(&[false, true]);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn test_cardinality_match_counts_disagreements() {
        let a = CondSet::from_sensors(&[true, false, true, false]);
        let b = CondSet::from_sensors(&[true, true, true, true]);
        assert_eq!(a.cardinality_match(&b), 0.5);
        assert_eq!(a.cardinality_match(&a), 0.0);
    }

    #[test]
    fn test_merge_agreeing_bits_average() {
        let mut a = CondSet::from_sensors(&[true]);
        let mut b = CondSet::from_sensors(&[true]);
        for _ in 0..7 {
            b.update(&[false]); // b's confidence decays to 0
        }
        a.merge(&b);
        assert!(a.bit(0));
        assert_eq!(a.conf(0).raw(), Conf::MAX / 2);
    }

    #[test]
    fn test_merge_disagreeing_bits_keep_stronger() {
        let mut weak = CondSet::from_sensors(&[false]);
        for _ in 0..7 {
            weak.update(&[true]); // contradicted: confidence 0
        }
        let strong = CondSet::from_sensors(&[true]);

        weak.merge(&strong);
        assert!(weak.bit(0), "higher-confidence bit wins");
        assert_eq!(weak.conf(0).raw(), Conf::MAX, "confidence delta");
    }
}
