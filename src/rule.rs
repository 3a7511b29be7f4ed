//! Predictive condition→outcome rules and their arena store.
//!
//! A rule associates an LHS sensor pattern and an action with the RHS pattern
//! that followed. Rules chain: a rule of depth d may only apply immediately
//! after one of its predecessor rules (depth d−1) applied, so a depth-d rule
//! encodes d+1 timesteps of context. All cross-rule references are arena ids,
//! never pointers: predecessors may be merged away at any time, and the store
//! redirects surviving references when that happens.

use std::fmt;

use tracing::debug;

use crate::core::{BitFreq, CondSet};
use crate::{Error, Result};

/// Handle into a [`RuleStore`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RuleId(usize);

impl RuleId {
    /// Raw arena slot.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuleId({})", self.0)
    }
}

/// One (rule, score) pair from an index query. Lists of these are
/// conventionally sorted best-first.
#[derive(Clone, Copy, Debug)]
pub struct MatchResult {
    pub rule: RuleId,
    pub score: f64,
}

/// Width of the per-bit recent-outcome window, in observations.
pub const OUTCOME_WINDOW_BITS: u32 = 8;

/// One sensing+action→sensing association.
#[derive(Clone, Debug)]
pub struct Rule {
    lhs: CondSet,
    /// Action ordinal into the configured alphabet.
    action: usize,
    rhs: CondSet,
    /// Legal predecessors: rules of depth `depth − 1` this rule may follow.
    prev: Vec<RuleId>,
    /// Length of the predecessor chain (0 = context-free).
    depth: usize,
    /// Per-RHS-bit shift window of recent prediction outcomes, independent
    /// of the CondSet confidences so accuracy can track a non-stationary
    /// environment.
    outcome_window: Vec<u8>,
}

impl Rule {
    pub fn lhs(&self) -> &CondSet {
        &self.lhs
    }

    pub fn rhs(&self) -> &CondSet {
        &self.rhs
    }

    pub fn action(&self) -> usize {
        self.action
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn prev(&self) -> &[RuleId] {
        &self.prev
    }

    /// Fraction of ones in a bit's recent-outcome window.
    pub fn recent_accuracy(&self, bit: usize) -> f64 {
        self.outcome_window[bit].count_ones() as f64 / OUTCOME_WINDOW_BITS as f64
    }
}

/// Arena owner of every rule an agent has induced.
///
/// Slots of merged-away rules become `None`; ids are never reused within one
/// store's lifetime.
pub struct RuleStore {
    rules: Vec<Option<Rule>>,
    live: usize,
    action_labels: Vec<char>,
    max_depth: usize,
    min_match_score: f64,
}

impl RuleStore {
    pub fn new(action_labels: Vec<char>, max_depth: usize, min_match_score: f64) -> Self {
        Self {
            rules: Vec::new(),
            live: 0,
            action_labels,
            max_depth,
            min_match_score,
        }
    }

    /// Number of live rules.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.0).and_then(|slot| slot.as_ref())
    }

    /// Panics on a dead or out-of-range id; internal paths only pass live ids.
    fn rule(&self, id: RuleId) -> &Rule {
        self.rules[id.0].as_ref().expect("live rule id")
    }

    /// Iterate live (id, rule) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (RuleId, &Rule)> {
        self.rules
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|r| (RuleId(i), r)))
    }

    /// Create a rule from one experience.
    ///
    /// Depth is the predecessor's depth plus one (0 without one). Chaining
    /// past the configured maximum is a recoverable typed error; the caller
    /// keeps the shallower rule instead.
    pub fn create(
        &mut self,
        lhs: CondSet,
        action: usize,
        rhs: CondSet,
        prev: Option<RuleId>,
    ) -> Result<RuleId> {
        let (prev, depth) = match prev {
            Some(p) => {
                let depth = self.rule(p).depth + 1;
                if depth > self.max_depth {
                    return Err(Error::DepthExceeded {
                        depth,
                        max: self.max_depth,
                    });
                }
                (vec![p], depth)
            }
            None => (Vec::new(), 0),
        };

        let window = vec![0u8; rhs.width()];
        let id = RuleId(self.rules.len());
        self.rules.push(Some(Rule {
            lhs,
            action,
            rhs,
            prev,
            depth,
            outcome_window: window,
        }));
        self.live += 1;
        Ok(id)
    }

    // ========== Scoring ==========

    /// Full match score of a rule against a queried context + LHS (+ RHS).
    ///
    /// The action is presumed to match already. LHS and RHS bit scores
    /// early-out to 0.0 below the minimum worthwhile score; the predecessor
    /// chains are compared recursively (bounded by the depth cap).
    pub fn score(
        &self,
        id: RuleId,
        context: &[RuleId],
        lhs: &CondSet,
        rhs: Option<&CondSet>,
        freq: &BitFreq,
    ) -> f64 {
        let rule = self.rule(id);

        let mut score = rule.lhs.match_score(lhs, freq);
        if score < self.min_match_score {
            return 0.0;
        }
        if let Some(rhs) = rhs {
            score *= rule.rhs.match_score(rhs, freq);
            if score < self.min_match_score {
                return 0.0;
            }
        }

        score * self.context_factor(rule, context, freq)
    }

    /// Match score with the action check: an action mismatch forces 0
    /// regardless of bit similarity.
    pub fn matches(
        &self,
        id: RuleId,
        context: &[RuleId],
        lhs: &CondSet,
        action: usize,
        freq: &BitFreq,
    ) -> f64 {
        if self.rule(id).action != action {
            return 0.0;
        }
        self.score(id, context, lhs, None, freq)
    }

    /// Whether a rule predicts an outcome: LHS matches above the threshold
    /// and, when an RHS is given, the base bits agree exactly on it. A
    /// `None` rhs tests the LHS only.
    pub fn predicts(
        &self,
        id: RuleId,
        lhs: &CondSet,
        action: usize,
        rhs: Option<&CondSet>,
        freq: &BitFreq,
    ) -> bool {
        let rule = self.rule(id);
        if rule.action != action {
            return false;
        }
        if rule.lhs.match_score(lhs, freq) < self.min_match_score {
            return false;
        }
        match rhs {
            Some(rhs) => rule.rhs == *rhs,
            None => true,
        }
    }

    /// Rule-vs-rule similarity: `a` scored against `b`'s context, LHS and
    /// RHS combined. Used to pick merge candidates.
    pub fn pair_score(&self, a: RuleId, b: RuleId, freq: &BitFreq) -> f64 {
        let other = self.rule(b);
        self.score(a, &other.prev, &other.lhs, Some(&other.rhs), freq)
    }

    /// How well a queried context satisfies a rule's predecessor requirement.
    ///
    /// Depth-0 rules need no context (1.0). A depth-1+ rule against an empty
    /// context can never apply (0.0). A shared rule id is a perfect match;
    /// otherwise the best pairwise predecessor similarity is used. Recursion
    /// walks strictly down the chains, so it is bounded by the depth cap.
    fn context_factor(&self, rule: &Rule, context: &[RuleId], freq: &BitFreq) -> f64 {
        if rule.depth == 0 {
            return 1.0;
        }
        if context.is_empty() {
            return 0.0;
        }
        for c in context {
            if rule.prev.contains(c) {
                return 1.0;
            }
        }

        let mut best = 0.0;
        for &c in context {
            for &p in &rule.prev {
                let s = self.pair_score(c, p, freq);
                if s > best {
                    best = s;
                }
            }
        }
        best
    }

    // ========== Runtime updates ==========

    /// Shift one fired-prediction outcome into a bit's recent window.
    pub fn push_observation(&mut self, id: RuleId, bit: usize, observed: bool) {
        let rule = self.rules[id.0].as_mut().expect("live rule id");
        let w = &mut rule.outcome_window[bit];
        *w = (*w << 1) | observed as u8;
    }

    /// Adjust a rule's CondSets after its prediction was tested against what
    /// actually happened.
    pub fn tune(&mut self, id: RuleId, prev_sensors: &[bool], curr_sensors: &[bool]) {
        let rule = self.rules[id.0].as_mut().expect("live rule id");
        rule.lhs.update(prev_sensors);
        rule.rhs.update(curr_sensors);
    }

    /// Record another legal predecessor on an existing rule. Idempotent.
    pub fn add_predecessor(&mut self, id: RuleId, prev: RuleId) {
        debug_assert_eq!(self.rule(prev).depth + 1, self.rule(id).depth);
        let rule = self.rules[id.0].as_mut().expect("live rule id");
        if !rule.prev.contains(&prev) {
            rule.prev.push(prev);
        }
    }

    /// Merge `victim` into `survivor` and retire the victim's slot.
    ///
    /// Only legal within one (depth, action) class. CondSets merge bitwise,
    /// predecessor lists union, and every other rule's predecessor reference
    /// to the victim is redirected to the survivor.
    pub fn merge(&mut self, survivor: RuleId, victim: RuleId) {
        debug_assert_ne!(survivor, victim);
        let removed = self.rules[victim.0].take().expect("live rule id");
        self.live -= 1;

        let kept = self.rules[survivor.0].as_mut().expect("live rule id");
        debug_assert_eq!(kept.depth, removed.depth);
        debug_assert_eq!(kept.action, removed.action);
        kept.lhs.merge(&removed.lhs);
        kept.rhs.merge(&removed.rhs);
        for p in removed.prev {
            if !kept.prev.contains(&p) {
                kept.prev.push(p);
            }
        }

        // Redirect every surviving predecessor reference.
        for slot in self.rules.iter_mut() {
            if let Some(rule) = slot {
                let had = rule.prev.contains(&victim);
                if had {
                    rule.prev.retain(|&p| p != victim);
                    if !rule.prev.contains(&survivor) {
                        rule.prev.push(survivor);
                    }
                }
            }
        }

        debug!(
            survivor = survivor.0,
            victim = victim.0,
            live = self.live,
            "merged rules"
        );
    }

    // ========== Diagnostics ==========

    /// Diagnostic rendering: `#3:(1,2)0110a -> 0111 (depth 1)`.
    pub fn render(&self, id: RuleId) -> String {
        let rule = self.rule(id);
        let prevs: Vec<String> = rule.prev.iter().map(|p| p.0.to_string()).collect();
        let label = self
            .action_labels
            .get(rule.action)
            .copied()
            .unwrap_or('?');
        format!(
            "#{}:({}){}{} -> {} (depth {})",
            id.0,
            prevs.join(","),
            rule.lhs.bit_string(),
            label,
            rule.rhs.bit_string(),
            rule.depth
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cond(bits: &[bool]) -> CondSet {
        CondSet::from_sensors(bits)
    }

    fn freq_for(width: usize, vectors: &[&[bool]]) -> BitFreq {
        let mut f = BitFreq::new(width);
        for v in vectors {
            f.record(v);
        }
        f
    }

    fn basic_store() -> RuleStore {
        RuleStore::new(vec!['a', 'b'], 3, 0.5)
    }

    #[test]
    fn test_depth_chain_and_overflow() {
        let mut store = basic_store();
        let mut prev = None;
        for expected_depth in 0..=3 {
            let id = store
                .create(cond(&[false, false]), 0, cond(&[false, true]), prev)
                .unwrap();
            assert_eq!(store.get(id).unwrap().depth(), expected_depth);
            prev = Some(id);
        }
        // One past the cap is a typed, recoverable error.
        let err = store
            .create(cond(&[false, false]), 0, cond(&[false, true]), prev)
            .unwrap_err();
        assert_eq!(err, Error::DepthExceeded { depth: 4, max: 3 });
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_action_mismatch_forces_zero() {
        let mut store = basic_store();
        let freq = freq_for(2, &[&[false, false], &[false, true]]);
        let id = store
            .create(cond(&[false, false]), 0, cond(&[false, true]), None)
            .unwrap();
        assert_eq!(store.matches(id, &[], &cond(&[false, false]), 1, &freq), 0.0);
        assert_eq!(store.matches(id, &[], &cond(&[false, false]), 0, &freq), 1.0);
    }

    #[test]
    fn test_predicts_rhs_subset() {
        let mut store = basic_store();
        let freq = freq_for(2, &[&[false, false], &[false, true]]);
        let id = store
            .create(cond(&[false, false]), 0, cond(&[false, true]), None)
            .unwrap();

        assert!(store.predicts(id, &cond(&[false, false]), 0, None, &freq));
        assert!(store.predicts(id, &cond(&[false, false]), 0, Some(&cond(&[false, true])), &freq));
        assert!(!store.predicts(id, &cond(&[false, false]), 0, Some(&cond(&[true, true])), &freq));
        assert!(!store.predicts(id, &cond(&[true, true]), 0, None, &freq));
    }

    #[test]
    fn test_context_factor_gates_deep_rules() {
        let mut store = basic_store();
        let freq = freq_for(2, &[&[false, false], &[false, true]]);
        let base = store
            .create(cond(&[false, false]), 0, cond(&[false, true]), None)
            .unwrap();
        let deep = store
            .create(cond(&[false, true]), 1, cond(&[false, false]), Some(base))
            .unwrap();

        // A depth-1 rule cannot apply without context.
        assert_eq!(store.matches(deep, &[], &cond(&[false, true]), 1, &freq), 0.0);
        // With its predecessor in context it applies at full score.
        assert_eq!(
            store.matches(deep, &[base], &cond(&[false, true]), 1, &freq),
            1.0
        );
    }

    #[test]
    fn test_outcome_window_tracks_recent_accuracy() {
        let mut store = basic_store();
        let id = store
            .create(cond(&[false, false]), 0, cond(&[false, true]), None)
            .unwrap();

        assert_eq!(store.get(id).unwrap().recent_accuracy(1), 0.0);
        for _ in 0..4 {
            store.push_observation(id, 1, true);
        }
        assert_eq!(store.get(id).unwrap().recent_accuracy(1), 0.5);
        for _ in 0..8 {
            store.push_observation(id, 1, true);
        }
        assert_eq!(store.get(id).unwrap().recent_accuracy(1), 1.0);
        store.push_observation(id, 1, false);
        assert!(store.get(id).unwrap().recent_accuracy(1) < 1.0);
    }

    #[test]
    fn test_merge_redirects_predecessors() {
        let mut store = basic_store();
        let a = store
            .create(cond(&[false, false]), 0, cond(&[false, true]), None)
            .unwrap();
        let b = store
            .create(cond(&[true, false]), 0, cond(&[false, true]), None)
            .unwrap();
        let child = store
            .create(cond(&[false, true]), 0, cond(&[false, false]), Some(b))
            .unwrap();

        store.merge(a, b);
        assert_eq!(store.len(), 2);
        assert!(store.get(b).is_none());
        assert_eq!(store.get(child).unwrap().prev(), &[a]);
    }

    #[test]
    fn test_tune_moves_confidence_not_base() {
        let mut store = basic_store();
        let freq = freq_for(2, &[&[false, false], &[true, true]]);
        let id = store
            .create(cond(&[false, false]), 0, cond(&[false, true]), None)
            .unwrap();

        // Repeatedly contradict the LHS; its evidence drains and the match
        // score against the original pattern decays with it.
        for _ in 0..7 {
            store.tune(id, &[true, true], &[false, true]);
        }
        let score = store.matches(id, &[], &cond(&[false, false]), 0, &freq);
        assert!(score < 1.0);
        assert_eq!(store.get(id).unwrap().lhs().bit_string(), "00");
    }

    #[test]
    fn test_render() {
        let mut store = basic_store();
        let id = store
            .create(cond(&[false, true]), 1, cond(&[true, true]), None)
            .unwrap();
        assert_eq!(store.render(id), "#0:()01b -> 11 (depth 0)");
    }
}
