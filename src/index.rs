//! Hierarchical self-balancing rule store.
//!
//! The index is a tree over an arena of nodes. The root fans out by rule
//! depth, the next level by action ordinal, and every level below that
//! bisects on one chosen sensor bit over the combined LHS+RHS bit space.
//! Leaves hold unordered rule buckets.
//!
//! ```text
//! root ── depth 0 ── action a ── leaf
//!      ├─ depth 1 ── action b ── split(bit 3) ── leaf
//!      │                                      └─ leaf
//!      └─ ...
//! ```
//!
//! Two invariants hold after every insert: the total leaf count never
//! exceeds the configured ceiling, and among leaves at or above the minimum
//! population the largest/smallest ratio stays within bounds (a violation
//! triggers an immediate split, unless the ceiling forbids one — then leaves
//! simply grow). An ascending-by-population leaf list, owned by this index
//! instance, gives near-O(1) smallest/largest lookups.

use tracing::debug;

use crate::config::AgentConfig;
use crate::core::{BitFreq, CondSet};
use crate::rule::{MatchResult, Rule, RuleId, RuleStore};
use crate::{Error, Result, MAX_SIZE_RATIO, MIN_SMALLEST};

/// Handle into the index node arena.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
struct NodeId(usize);

enum NodeKind {
    /// Levels 0 (per rule depth) and 1 (per action ordinal).
    Fan { children: Vec<NodeId> },
    /// Level ≥2 interior: bisects on one combined-space bit.
    Split { bit: usize, children: [NodeId; 2] },
    /// Terminal bucket. `used` records the bits split on along the path.
    Leaf { rules: Vec<RuleId>, used: Vec<usize> },
}

struct IndexNode {
    level: usize,
    kind: NodeKind,
}

/// Depth/action/sensor-indexed store of rules with approximate-match
/// queries, bounded size, and similarity-driven merging.
pub struct RuleIndex {
    nodes: Vec<IndexNode>,
    root: NodeId,
    /// Leaf ids ascending by population.
    leaves: Vec<NodeId>,
    sensor_width: usize,
    goal_bit: usize,
    num_actions: usize,
    max_depth: usize,
    max_leaf_nodes: usize,
    min_match_score: f64,
}

impl RuleIndex {
    /// Build the fixed depth×action skeleton.
    ///
    /// The leaf ceiling must at least cover that skeleton; a config that
    /// cannot is rejected outright.
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let initial_leaves = (config.max_depth + 1) * config.actions.len();
        if initial_leaves > config.max_leaf_nodes {
            return Err(Error::InvalidConfig(format!(
                "max_leaf_nodes {} cannot cover {} depth x action leaves",
                config.max_leaf_nodes, initial_leaves
            )));
        }

        let mut index = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            leaves: Vec::new(),
            sensor_width: config.sensor_width,
            goal_bit: config.goal_bit,
            num_actions: config.actions.len(),
            max_depth: config.max_depth,
            max_leaf_nodes: config.max_leaf_nodes,
            min_match_score: config.min_match_score,
        };

        let mut depth_children = Vec::with_capacity(config.max_depth + 1);
        for _ in 0..=config.max_depth {
            let mut action_children = Vec::with_capacity(index.num_actions);
            for _ in 0..index.num_actions {
                let leaf = index.push_node(IndexNode {
                    level: 2,
                    kind: NodeKind::Leaf {
                        rules: Vec::new(),
                        used: Vec::new(),
                    },
                });
                index.leaves.push(leaf);
                action_children.push(leaf);
            }
            let action_node = index.push_node(IndexNode {
                level: 1,
                kind: NodeKind::Fan {
                    children: action_children,
                },
            });
            depth_children.push(action_node);
        }
        index.root = index.push_node(IndexNode {
            level: 0,
            kind: NodeKind::Fan {
                children: depth_children,
            },
        });

        Ok(index)
    }

    fn push_node(&mut self, node: IndexNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Current leaf count.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Leaf populations, smallest first.
    pub fn leaf_populations(&self) -> Vec<usize> {
        self.leaves.iter().map(|&l| self.leaf_len(l)).collect()
    }

    fn leaf_len(&self, id: NodeId) -> usize {
        match &self.nodes[id.0].kind {
            NodeKind::Leaf { rules, .. } => rules.len(),
            _ => 0,
        }
    }

    /// Bit of a rule in the combined LHS+RHS space: indices below the sensor
    /// width address the LHS, the rest address the RHS.
    fn combined_bit(&self, rule: &Rule, idx: usize) -> bool {
        if idx < self.sensor_width {
            rule.lhs().bit(idx)
        } else {
            rule.rhs().bit(idx - self.sensor_width)
        }
    }

    /// Walk depth → action → split bits to the owning leaf.
    fn descend(&self, store: &RuleStore, id: RuleId) -> NodeId {
        let rule = store.get(id).expect("live rule id");
        let mut node = self.root;
        loop {
            match &self.nodes[node.0].kind {
                NodeKind::Fan { children } => {
                    node = if self.nodes[node.0].level == 0 {
                        children[rule.depth()]
                    } else {
                        children[rule.action()]
                    };
                }
                NodeKind::Split { bit, children } => {
                    node = children[self.combined_bit(rule, *bit) as usize];
                }
                NodeKind::Leaf { .. } => return node,
            }
        }
    }

    // ========== Insert & balance ==========

    /// Insert a rule, then restore the balance invariant if the insert broke
    /// it. When the leaf ceiling would be exceeded the split is skipped and
    /// the bucket grows instead; the insert itself never fails.
    pub fn insert(&mut self, store: &RuleStore, id: RuleId) {
        debug_assert_eq!(
            store.get(id).expect("live rule id").lhs().width(),
            self.sensor_width
        );

        let leaf = self.descend(store, id);
        match &mut self.nodes[leaf.0].kind {
            NodeKind::Leaf { rules, .. } => rules.push(id),
            _ => unreachable!("descend ends at a leaf"),
        }
        self.resort_leaf(leaf);
        self.rebalance(store);

        debug!(rule = id.index(), leaves = self.leaves.len(), "inserted rule");
    }

    /// Split the largest leaf until the ratio invariant holds again, the
    /// ceiling is reached, or no leaf can be divided.
    fn rebalance(&mut self, store: &RuleStore) {
        loop {
            let Some(&smallest) = self
                .leaves
                .iter()
                .find(|&&l| self.leaf_len(l) >= MIN_SMALLEST)
            else {
                return; // too few rules to balance
            };
            let &largest = self.leaves.last().expect("leaves never empty");

            if self.leaf_len(largest) / self.leaf_len(smallest) <= MAX_SIZE_RATIO {
                return;
            }
            if self.leaves.len() >= self.max_leaf_nodes {
                return; // ceiling: let the bucket grow
            }
            if !self.split(store, largest) {
                return; // nothing divides this bucket
            }
        }
    }

    /// Turn a leaf into a split node with two child leaves. Returns false
    /// when no usable bit divides the bucket.
    fn split(&mut self, store: &RuleStore, leaf: NodeId) -> bool {
        let (rules, used, level) = match &self.nodes[leaf.0].kind {
            NodeKind::Leaf { rules, used } => {
                (rules.clone(), used.clone(), self.nodes[leaf.0].level)
            }
            _ => return false,
        };
        debug_assert!(!rules.is_empty(), "never split an empty leaf");

        let Some(bit) = self.choose_split_bit(store, &rules, &used, level) else {
            return false;
        };

        let mut buckets = [Vec::new(), Vec::new()];
        for &id in &rules {
            let rule = store.get(id).expect("live rule id");
            buckets[self.combined_bit(rule, bit) as usize].push(id);
        }

        let mut child_used = used;
        child_used.push(bit);
        let [zeros, ones] = buckets;
        let child0 = self.push_node(IndexNode {
            level: level + 1,
            kind: NodeKind::Leaf {
                rules: zeros,
                used: child_used.clone(),
            },
        });
        let child1 = self.push_node(IndexNode {
            level: level + 1,
            kind: NodeKind::Leaf {
                rules: ones,
                used: child_used,
            },
        });

        self.nodes[leaf.0].kind = NodeKind::Split {
            bit,
            children: [child0, child1],
        };
        self.leaves.retain(|&l| l != leaf);
        self.insert_leaf_sorted(child0);
        self.insert_leaf_sorted(child1);

        debug!(bit, leaves = self.leaves.len(), "split leaf");
        true
    }

    /// Splitting criterion: the first split under an action subtree always
    /// tries the RHS goal bit; after that (or when the goal bit fails to
    /// divide) the bit with the most even 0/1 division of the bucket wins,
    /// skipping bits already split on along the path. A bit that does not
    /// divide the bucket is never chosen.
    fn choose_split_bit(
        &self,
        store: &RuleStore,
        rules: &[RuleId],
        used: &[usize],
        level: usize,
    ) -> Option<usize> {
        let goal_idx = self.sensor_width + self.goal_bit;
        if level == 2 && self.divides(store, rules, goal_idx) {
            return Some(goal_idx);
        }

        let n = rules.len();
        let mut best: Option<(usize, usize)> = None; // (imbalance, bit)
        for idx in 0..2 * self.sensor_width {
            if used.contains(&idx) || idx == goal_idx && level == 2 {
                continue;
            }
            let ones = rules
                .iter()
                .filter(|&&id| self.combined_bit(store.get(id).expect("live rule id"), idx))
                .count();
            if ones == 0 || ones == n {
                continue;
            }
            let imbalance = ones.abs_diff(n / 2);
            if best.map_or(true, |(b, _)| imbalance < b) {
                best = Some((imbalance, idx));
            }
        }
        best.map(|(_, bit)| bit)
    }

    fn divides(&self, store: &RuleStore, rules: &[RuleId], idx: usize) -> bool {
        let ones = rules
            .iter()
            .filter(|&&id| self.combined_bit(store.get(id).expect("live rule id"), idx))
            .count();
        ones > 0 && ones < rules.len()
    }

    /// Re-place a leaf whose population changed into the ascending list.
    fn resort_leaf(&mut self, leaf: NodeId) {
        self.leaves.retain(|&l| l != leaf);
        self.insert_leaf_sorted(leaf);
    }

    fn insert_leaf_sorted(&mut self, leaf: NodeId) {
        let len = self.leaf_len(leaf);
        let pos = self
            .leaves
            .iter()
            .position(|&l| self.leaf_len(l) >= len)
            .unwrap_or(self.leaves.len());
        self.leaves.insert(pos, leaf);
    }

    // ========== Queries ==========

    /// Approximate-match query across every rule depth under one action.
    ///
    /// Longer chains are more specific when present, so all depths
    /// 0..=max_depth are considered. Results are sorted best-first; ties
    /// break toward greater rule depth, then higher mean RHS confidence.
    /// Scores below the minimum worthwhile threshold are dropped (the store
    /// zeroes them during scoring). An empty result is a normal outcome.
    pub fn find_matches(
        &self,
        store: &RuleStore,
        context: &[RuleId],
        lhs: &CondSet,
        action: usize,
        rhs: Option<&CondSet>,
        freq: &BitFreq,
    ) -> Vec<MatchResult> {
        debug_assert_eq!(lhs.width(), self.sensor_width);
        debug_assert!(action < self.num_actions);

        let mut results = Vec::new();
        let NodeKind::Fan { children } = &self.nodes[self.root.0].kind else {
            unreachable!("root is a depth fan");
        };
        for &depth_child in children {
            let NodeKind::Fan { children } = &self.nodes[depth_child.0].kind else {
                unreachable!("level 1 is an action fan");
            };
            self.collect_matches(
                store,
                children[action],
                context,
                lhs,
                rhs,
                freq,
                &mut results,
            );
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let (ra, rb) = (
                        store.get(a.rule).expect("live rule id"),
                        store.get(b.rule).expect("live rule id"),
                    );
                    rb.depth().cmp(&ra.depth()).then(
                        rb.rhs()
                            .mean_conf()
                            .partial_cmp(&ra.rhs().mean_conf())
                            .unwrap_or(std::cmp::Ordering::Equal),
                    )
                })
        });
        results
    }

    fn collect_matches(
        &self,
        store: &RuleStore,
        node: NodeId,
        context: &[RuleId],
        lhs: &CondSet,
        rhs: Option<&CondSet>,
        freq: &BitFreq,
        out: &mut Vec<MatchResult>,
    ) {
        match &self.nodes[node.0].kind {
            NodeKind::Leaf { rules, .. } => {
                for &id in rules {
                    let score = store.score(id, context, lhs, rhs, freq);
                    if score > 0.0 {
                        out.push(MatchResult { rule: id, score });
                    }
                }
            }
            NodeKind::Split { children, .. } => {
                for &child in children {
                    self.collect_matches(store, child, context, lhs, rhs, freq, out);
                }
            }
            NodeKind::Fan { children } => {
                for &child in children {
                    self.collect_matches(store, child, context, lhs, rhs, freq, out);
                }
            }
        }
    }

    // ========== Merging ==========

    /// Merge the two most similar rules anywhere in the index, shrinking the
    /// population by one.
    ///
    /// The first two index levels already partition rules by (depth, action)
    /// — the only classes merging is legal within — so candidate pairs are
    /// scanned leaf-locally by combined LHS+RHS similarity. Returns the
    /// (survivor, victim) pair, or `None` when no leaf holds a mergeable
    /// pair.
    pub fn reduce(
        &mut self,
        store: &mut RuleStore,
        freq: &BitFreq,
    ) -> Option<(RuleId, RuleId)> {
        let mut best: Option<(f64, NodeId, RuleId, RuleId)> = None;
        for &leaf in &self.leaves {
            let NodeKind::Leaf { rules, .. } = &self.nodes[leaf.0].kind else {
                continue;
            };
            for i in 0..rules.len() {
                for j in (i + 1)..rules.len() {
                    let score = store.pair_score(rules[i], rules[j], freq);
                    if best.map_or(true, |(b, ..)| score > b) {
                        best = Some((score, leaf, rules[i], rules[j]));
                    }
                }
            }
        }

        let (score, leaf, survivor, victim) = best?;
        store.merge(survivor, victim);
        match &mut self.nodes[leaf.0].kind {
            NodeKind::Leaf { rules, .. } => rules.retain(|&r| r != victim),
            _ => unreachable!("merge candidates live in leaves"),
        }
        self.resort_leaf(leaf);

        debug!(
            survivor = survivor.index(),
            victim = victim.index(),
            score,
            "reduced rule population"
        );
        Some((survivor, victim))
    }

    // ========== Diagnostics ==========

    /// Indented text dump of the whole tree. Diagnostic only, not part of
    /// the functional contract.
    pub fn dump(&self, store: &RuleStore) -> String {
        let mut out = String::new();
        self.dump_node(store, self.root, &mut out);
        out
    }

    fn dump_node(&self, store: &RuleStore, node: NodeId, out: &mut String) {
        let level = self.nodes[node.0].level;
        let pad = "  ".repeat(level);
        match &self.nodes[node.0].kind {
            NodeKind::Fan { children } => {
                let label = if level == 0 { "by depth" } else { "by action" };
                out.push_str(&format!("{pad}+-({label})\n"));
                for &child in children {
                    self.dump_node(store, child, out);
                }
            }
            NodeKind::Split { bit, children } => {
                out.push_str(&format!("{pad}+-(split bit {bit})\n"));
                for &child in children {
                    self.dump_node(store, child, out);
                }
            }
            NodeKind::Leaf { rules, .. } => {
                if rules.is_empty() {
                    return;
                }
                out.push_str(&format!("{pad}+-(leaf, {} rules)\n", rules.len()));
                for &id in rules {
                    out.push_str(&format!("{pad}    {}\n", store.render(id)));
                }
            }
        }
    }
}
