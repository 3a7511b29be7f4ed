//! The decision cycle: observe, learn, plan, act.
//!
//! One [`Agent::step`] call is one timestep. The agent digests the episode
//! that just completed (previous sensors + previous action → current
//! sensors), reuses or creates rules for it at every chain depth, keeps the
//! rule population under its ceiling by merging, then either follows the
//! remainder of a planned path or plans afresh, falling back to random
//! exploration when no plan beats acting randomly.
//!
//! The exploration baseline is the agent's own measured success rate of
//! random actions. It starts at 1.0 (pure exploration) and decays as random
//! actions fail to reach the goal, so planning takes over exactly when the
//! learned rules predict better than chance.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::AgentConfig;
use crate::core::{BitFreq, CondSet};
use crate::index::RuleIndex;
use crate::rule::{MatchResult, RuleId, RuleStore};
use crate::search::SearchTree;
use crate::{Error, Result};

/// A single-threaded learning agent. Owns its rules, index, and statistics
/// outright; two agents never share state.
pub struct Agent {
    config: AgentConfig,
    store: RuleStore,
    index: RuleIndex,
    freq: BitFreq,
    /// Rules that matched the episode completed this timestep. Context for
    /// deeper chaining and for the next plan.
    curr_internal: Vec<RuleId>,
    prev_external: Option<Vec<bool>>,
    prev_action: Option<usize>,
    /// Rules that predicted an outcome for the action just taken; tuned
    /// against reality next timestep.
    predicting: Vec<MatchResult>,
    /// Remaining action ordinals of the current plan.
    path_remaining: VecDeque<usize>,
    /// Random-exploration success statistics; their ratio is the planning
    /// baseline.
    rand_actions: f64,
    rand_successes: f64,
    last_action_random: bool,
    rng: StdRng,
    timestep: u64,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        config.validate()?;
        let index = RuleIndex::new(&config)?;
        let store = RuleStore::new(
            config.actions.clone(),
            config.max_depth,
            config.min_match_score,
        );
        let freq = BitFreq::new(config.sensor_width);
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            config,
            store,
            index,
            freq,
            curr_internal: Vec::new(),
            prev_external: None,
            prev_action: None,
            predicting: Vec::new(),
            path_remaining: VecDeque::new(),
            rand_actions: 1.0,
            rand_successes: 1.0,
            last_action_random: false,
            rng,
            timestep: 0,
        })
    }

    /// One timestep: take in the current sensors, give back the next action.
    ///
    /// The sensor vector must match the configured width; anything else is a
    /// typed error and the agent's state is left untouched.
    pub fn step(&mut self, sensors: &[bool]) -> Result<char> {
        if sensors.len() != self.config.sensor_width {
            return Err(Error::WidthMismatch {
                expected: self.config.sensor_width,
                got: sensors.len(),
            });
        }
        self.timestep += 1;
        self.freq.record(sensors);

        self.digest_episode(sensors)?;
        self.update_goal_stats(sensors);

        if !sensors[self.config.goal_bit] && self.path_remaining.is_empty() {
            self.plan(sensors);
        }
        let ordinal = match self.path_remaining.pop_front() {
            Some(a) => {
                self.last_action_random = false;
                a
            }
            None => {
                self.rand_actions += 1.0;
                self.last_action_random = true;
                self.rng.gen_range(0..self.config.actions.len())
            }
        };

        self.predicting = self.index.find_matches(
            &self.store,
            &self.curr_internal,
            &CondSet::from_sensors(sensors),
            ordinal,
            None,
            &self.freq,
        );
        self.prev_external = Some(sensors.to_vec());
        self.prev_action = Some(ordinal);
        Ok(self.config.actions[ordinal])
    }

    // ========== Learning ==========

    /// Fold the completed episode into the rule population: tune the rules
    /// that predicted it, then reuse or create a rule for it at depth 0 and
    /// at every depth reachable from last timestep's internal state.
    fn digest_episode(&mut self, sensors: &[bool]) -> Result<()> {
        let (Some(prev), Some(action)) = (self.prev_external.take(), self.prev_action.take())
        else {
            return Ok(()); // first timestep: no episode yet
        };

        for m in std::mem::take(&mut self.predicting) {
            if self.store.get(m.rule).is_none() {
                continue; // merged away since it predicted
            }
            let rhs_bits: Vec<bool> = {
                let rhs = self.store.get(m.rule).expect("live rule id").rhs();
                (0..rhs.width()).map(|i| rhs.bit(i)).collect()
            };
            for (i, &predicted) in rhs_bits.iter().enumerate() {
                self.store
                    .push_observation(m.rule, i, predicted == sensors[i]);
            }
            self.store.tune(m.rule, &prev, sensors);
        }

        let lhs = CondSet::from_sensors(&prev);
        let rhs = CondSet::from_sensors(sensors);
        let last_internal = std::mem::take(&mut self.curr_internal);

        let mut fired = vec![self.find_or_create(lhs.clone(), action, rhs.clone(), None)?];
        for &p in &last_internal {
            match self.find_or_create(lhs.clone(), action, rhs.clone(), Some(p)) {
                Ok(id) => fired.push(id),
                // chains stop growing at the cap; keep the shallower rules
                Err(Error::DepthExceeded { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        fired.sort_by_key(|id| id.index());
        fired.dedup();
        self.curr_internal = fired;

        self.enforce_rule_ceiling();
        Ok(())
    }

    /// Reuse a bit-identical rule of the same action and depth, recording the
    /// new predecessor link; otherwise create and index a fresh one.
    fn find_or_create(
        &mut self,
        lhs: CondSet,
        action: usize,
        rhs: CondSet,
        prev: Option<RuleId>,
    ) -> Result<RuleId> {
        let depth = match prev {
            Some(p) => self.store.get(p).expect("live rule id").depth() + 1,
            None => 0,
        };
        let found = self
            .store
            .iter()
            .find(|(_, r)| {
                r.action() == action && r.depth() == depth && *r.lhs() == lhs && *r.rhs() == rhs
            })
            .map(|(id, _)| id);
        if let Some(id) = found {
            if let Some(p) = prev {
                self.store.add_predecessor(id, p);
            }
            return Ok(id);
        }

        let id = self.store.create(lhs, action, rhs, prev)?;
        self.index.insert(&self.store, id);
        debug!(rule = id.index(), depth, "created rule");
        Ok(id)
    }

    /// Merge most-similar rules until the population fits its ceiling. Ids
    /// held in the agent's internal state follow the survivor.
    fn enforce_rule_ceiling(&mut self) {
        while self.store.len() > self.config.max_num_rules {
            let Some((survivor, victim)) = self.index.reduce(&mut self.store, &self.freq)
            else {
                break; // every remaining leaf is a singleton
            };
            for id in self.curr_internal.iter_mut() {
                if *id == victim {
                    *id = survivor;
                }
            }
            self.curr_internal.sort_by_key(|id| id.index());
            self.curr_internal.dedup();
        }
    }

    // ========== Planning ==========

    fn update_goal_stats(&mut self, sensors: &[bool]) {
        if !sensors[self.config.goal_bit] {
            return;
        }
        if self.last_action_random {
            self.rand_successes += 1.0;
        }
        self.path_remaining.clear();
        debug!(timestep = self.timestep, "goal reached");
    }

    fn plan(&mut self, sensors: &[bool]) {
        let baseline = self.rand_successes / self.rand_actions;
        let mut tree = SearchTree::new(
            &self.index,
            &self.store,
            &self.freq,
            self.config.goal_bit,
            self.config.actions.len(),
            baseline,
            sensors,
            &self.curr_internal,
        );
        if let Some(path) = tree.find_best_goal_path(self.config.max_search_depth) {
            self.path_remaining = path.into();
        }
    }

    // ========== Introspection ==========

    /// Live rule count.
    pub fn rule_count(&self) -> usize {
        self.store.len()
    }

    /// Timesteps processed so far.
    pub fn timestep(&self) -> u64 {
        self.timestep
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Text dump of the whole rule index, for debugging a trained agent.
    pub fn dump_rules(&self) -> String {
        self.index.dump(&self.store)
    }
}
