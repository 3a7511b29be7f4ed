//! Goal-path planning over the learned rules.
//!
//! A search tree is rebuilt from scratch whenever the agent needs a plan:
//! the root is the current situation, and each child applies one matching
//! rule, predicting the sensor vector its RHS describes. Iterative
//! deepening expands the tree one ply at a time up to the configured cap;
//! expansion is cached on the nodes, so re-walking shallow plies is cheap.
//!
//! Path quality is the product of every rule match score along the way,
//! discounted by path length:
//!
//! ```text
//! quality = (Π step scores) · 1 / path_len
//! ```
//!
//! so a short confident path beats a long confident one, and only a path
//! whose every step clears the exploration baseline is worth following at
//! all.

use tracing::debug;

use crate::core::{BitFreq, CondSet};
use crate::index::RuleIndex;
use crate::rule::{RuleId, RuleStore};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum NodeState {
    Unexpanded,
    Expanded,
    Goal,
    DeadEnd,
}

struct SearchNode {
    parent: Option<usize>,
    /// Action ordinal taken from the parent. `None` at the root.
    action: Option<usize>,
    /// Predicted sensor vector in this node's situation.
    sensors: Vec<bool>,
    /// Internal-state context for matching the next ply.
    context: Vec<RuleId>,
    /// Product of match scores from the root.
    confidence: f64,
    depth: usize,
    children: Vec<usize>,
    state: NodeState,
}

/// One planning episode. Borrows the agent's knowledge immutably; the agent
/// rebuilds a fresh tree per plan rather than patching a stale one.
pub struct SearchTree<'a> {
    index: &'a RuleIndex,
    store: &'a RuleStore,
    freq: &'a BitFreq,
    goal_bit: usize,
    num_actions: usize,
    /// Minimum per-step score worth planning with; steps at or below it are
    /// no better than acting randomly.
    baseline: f64,
    nodes: Vec<SearchNode>,
}

impl<'a> SearchTree<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: &'a RuleIndex,
        store: &'a RuleStore,
        freq: &'a BitFreq,
        goal_bit: usize,
        num_actions: usize,
        baseline: f64,
        sensors: &[bool],
        context: &[RuleId],
    ) -> Self {
        let state = if sensors[goal_bit] {
            NodeState::Goal
        } else {
            NodeState::Unexpanded
        };
        Self {
            index,
            store,
            freq,
            goal_bit,
            num_actions,
            baseline,
            nodes: vec![SearchNode {
                parent: None,
                action: None,
                sensors: sensors.to_vec(),
                context: context.to_vec(),
                confidence: 1.0,
                depth: 0,
                children: Vec::new(),
                state,
            }],
        }
    }

    /// Iterative-deepening search for the highest-quality goal path.
    ///
    /// Returns the action ordinals root→goal, or `None` when no path whose
    /// every step beats the baseline reaches the goal within the cap. An
    /// empty vec means the root already satisfies the goal.
    pub fn find_best_goal_path(&mut self, max_depth: usize) -> Option<Vec<usize>> {
        if self.nodes[0].state == NodeState::Goal {
            return Some(Vec::new());
        }

        let mut best: Option<(f64, usize)> = None;
        for limit in 1..=max_depth {
            let frontier_cut = self.dfs(0, limit, &mut best);
            if !frontier_cut {
                break; // tree fully explored before the cap
            }
        }

        let (quality, goal) = best?;
        let mut path = Vec::new();
        let mut at = goal;
        while let Some(parent) = self.nodes[at].parent {
            path.push(self.nodes[at].action.expect("non-root has an action"));
            at = parent;
        }
        path.reverse();
        debug!(quality, len = path.len(), "planned goal path");
        Some(path)
    }

    /// Depth-limited walk. Returns true when the limit cut off unexplored
    /// nodes, i.e. a deeper pass could still find something new.
    fn dfs(&mut self, idx: usize, limit: usize, best: &mut Option<(f64, usize)>) -> bool {
        match self.nodes[idx].state {
            NodeState::Goal => {
                let node = &self.nodes[idx];
                let quality = node.confidence / node.depth as f64;
                if best.map_or(true, |(b, _)| quality > b) {
                    *best = Some((quality, idx));
                }
                return false;
            }
            NodeState::DeadEnd => return false,
            NodeState::Unexpanded | NodeState::Expanded => {}
        }
        if self.nodes[idx].depth == limit {
            return true;
        }

        if self.nodes[idx].state == NodeState::Unexpanded {
            self.expand(idx);
        }
        let children = self.nodes[idx].children.clone();
        let mut cut = false;
        for child in children {
            cut |= self.dfs(child, limit, best);
        }
        cut
    }

    /// Grow one node: for every action, every rule matching the node's
    /// predicted situation above the baseline contributes a child. A node no
    /// rule applies to is a dead end.
    fn expand(&mut self, idx: usize) {
        let sensors = self.nodes[idx].sensors.clone();
        let context = self.nodes[idx].context.clone();
        let confidence = self.nodes[idx].confidence;
        let depth = self.nodes[idx].depth;
        let lhs = CondSet::from_sensors(&sensors);

        let mut children = Vec::new();
        for action in 0..self.num_actions {
            for m in self
                .index
                .find_matches(self.store, &context, &lhs, action, None, self.freq)
            {
                if m.score <= self.baseline {
                    continue; // sorted best-first, but keep the scan simple
                }
                let rule = self.store.get(m.rule).expect("live rule id");
                let predicted: Vec<bool> =
                    (0..rule.rhs().width()).map(|i| rule.rhs().bit(i)).collect();
                let state = if predicted[self.goal_bit] {
                    NodeState::Goal
                } else {
                    NodeState::Unexpanded
                };
                let child = self.nodes.len();
                self.nodes.push(SearchNode {
                    parent: Some(idx),
                    action: Some(action),
                    sensors: predicted,
                    context: vec![m.rule],
                    confidence: confidence * m.score,
                    depth: depth + 1,
                    children: Vec::new(),
                    state,
                });
                children.push(child);
            }
        }

        let node = &mut self.nodes[idx];
        node.state = if children.is_empty() {
            NodeState::DeadEnd
        } else {
            NodeState::Expanded
        };
        node.children = children;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    fn cond(bits: &[bool]) -> CondSet {
        CondSet::from_sensors(bits)
    }

    fn bits(n: u8, width: usize) -> Vec<bool> {
        (0..width).map(|i| (n >> i) & 1 == 1).collect()
    }

    /// Store + index + freq with one rule: `00 -a-> 01` (bit 1 is the goal).
    fn single_rule_world() -> (RuleStore, RuleIndex, BitFreq) {
        let config = AgentConfig::default();
        let mut store = RuleStore::new(config.actions.clone(), config.max_depth, 0.5);
        let mut index = RuleIndex::new(&config).unwrap();
        let mut freq = BitFreq::new(2);
        freq.record(&[false, false]);
        freq.record(&[false, true]);
        let id = store
            .create(cond(&[false, false]), 0, cond(&[false, true]), None)
            .unwrap();
        index.insert(&store, id);
        (store, index, freq)
    }

    #[test]
    fn test_one_step_path_to_goal() {
        let (store, index, freq) = single_rule_world();
        let mut tree =
            SearchTree::new(&index, &store, &freq, 1, 2, 0.5, &[false, false], &[]);
        assert_eq!(tree.find_best_goal_path(3), Some(vec![0]));
    }

    #[test]
    fn test_root_at_goal_is_empty_path() {
        let (store, index, freq) = single_rule_world();
        let mut tree =
            SearchTree::new(&index, &store, &freq, 1, 2, 0.5, &[false, true], &[]);
        assert_eq!(tree.find_best_goal_path(3), Some(Vec::new()));
    }

    #[test]
    fn test_no_rules_means_no_path() {
        let config = AgentConfig::default();
        let store = RuleStore::new(config.actions.clone(), config.max_depth, 0.5);
        let index = RuleIndex::new(&config).unwrap();
        let freq = BitFreq::new(2);
        let mut tree =
            SearchTree::new(&index, &store, &freq, 1, 2, 0.5, &[false, false], &[]);
        assert_eq!(tree.find_best_goal_path(5), None);
    }

    #[test]
    fn test_baseline_gates_weak_steps() {
        let (store, index, freq) = single_rule_world();
        // A baseline at the perfect score: nothing beats it.
        let mut tree =
            SearchTree::new(&index, &store, &freq, 1, 2, 1.0, &[false, false], &[]);
        assert_eq!(tree.find_best_goal_path(3), None);
    }

    #[test]
    fn test_depth_cap_respected() {
        // Goal sits two steps away: 00 -a-> 10 -a-> 01.
        let config = AgentConfig::default();
        // 0.6 keeps half-matching LHS patterns from offering shortcuts.
        let mut store = RuleStore::new(config.actions.clone(), config.max_depth, 0.6);
        let mut index = RuleIndex::new(&config).unwrap();
        let mut freq = BitFreq::new(2);
        for v in [[false, false], [true, false], [false, true]] {
            freq.record(&v);
        }
        for (lhs, rhs) in [
            ([false, false], [true, false]),
            ([true, false], [false, true]),
        ] {
            let id = store.create(cond(&lhs), 0, cond(&rhs), None).unwrap();
            index.insert(&store, id);
        }

        let mut short =
            SearchTree::new(&index, &store, &freq, 1, 2, 0.4, &[false, false], &[]);
        assert_eq!(short.find_best_goal_path(1), None);
        let mut long =
            SearchTree::new(&index, &store, &freq, 1, 2, 0.4, &[false, false], &[]);
        assert_eq!(long.find_best_goal_path(2), Some(vec![0, 0]));
    }

    #[test]
    fn test_length_penalty_prefers_short_path() {
        // Two routes to the goal bit (bit 3): a two-step 'a' chain and a
        // four-step 'b' chain, every step a perfect match. The length
        // discount must pick the 'a' chain.
        let config = AgentConfig {
            actions: vec!['a', 'b'],
            sensor_width: 4,
            goal_bit: 3,
            min_match_score: 0.8,
            ..AgentConfig::default()
        };
        let mut store =
            RuleStore::new(config.actions.clone(), config.max_depth, config.min_match_score);
        let mut index = RuleIndex::new(&config).unwrap();
        let mut freq = BitFreq::new(4);
        freq.record(&bits(0b0000, 4));
        freq.record(&bits(0b1111, 4));

        let a_chain = [(0b0000u8, 0b0111u8), (0b0111, 0b1000)];
        for (lhs, rhs) in a_chain {
            let id = store
                .create(cond(&bits(lhs, 4)), 0, cond(&bits(rhs, 4)), None)
                .unwrap();
            index.insert(&store, id);
        }
        let b_chain = [
            (0b0000u8, 0b0001u8),
            (0b0001, 0b0010),
            (0b0010, 0b0100),
            (0b0100, 0b1000),
        ];
        for (lhs, rhs) in b_chain {
            let id = store
                .create(cond(&bits(lhs, 4)), 1, cond(&bits(rhs, 4)), None)
                .unwrap();
            index.insert(&store, id);
        }

        let mut tree =
            SearchTree::new(&index, &store, &freq, 3, 2, 0.4, &bits(0b0000, 4), &[]);
        assert_eq!(tree.find_best_goal_path(6), Some(vec![0, 0]));
    }
}
