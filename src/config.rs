//! Agent configuration.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Engine configuration.
///
/// Constructed literally (all fields are public) and checked once via
/// [`AgentConfig::validate`] when the agent is built. Invalid configurations
/// are rejected with a typed error, never silently defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Action alphabet, one char label per action.
    pub actions: Vec<char>,
    /// Width of the boolean sensor vector.
    pub sensor_width: usize,
    /// Index of the designated goal sensor.
    pub goal_bit: usize,
    /// Maximum predecessor-chain depth a rule may carry.
    pub max_depth: usize,
    /// Hard ceiling on index leaf count.
    pub max_leaf_nodes: usize,
    /// Hard ceiling on the rule population; exceeding it triggers merging.
    pub max_num_rules: usize,
    /// Minimum worthwhile match score; weaker matches are discarded.
    pub min_match_score: f64,
    /// Iterative-deepening cap for path planning.
    pub max_search_depth: usize,
    /// Seed for the exploration RNG; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            actions: vec!['a', 'b'],
            sensor_width: 2,
            goal_bit: 1,
            max_depth: 7,
            max_leaf_nodes: 100,
            max_num_rules: 5000,
            min_match_score: 0.5,
            max_search_depth: 7,
            rng_seed: None,
        }
    }
}

impl AgentConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.actions.is_empty() {
            return Err(Error::InvalidConfig("empty action alphabet".into()));
        }
        if self.sensor_width == 0 {
            return Err(Error::InvalidConfig("zero-width sensor vector".into()));
        }
        if self.goal_bit >= self.sensor_width {
            return Err(Error::InvalidConfig(format!(
                "goal bit {} outside sensor width {}",
                self.goal_bit, self.sensor_width
            )));
        }
        if self.max_leaf_nodes == 0 {
            return Err(Error::InvalidConfig("max_leaf_nodes must be positive".into()));
        }
        if self.max_num_rules == 0 {
            return Err(Error::InvalidConfig("max_num_rules must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.min_match_score) {
            return Err(Error::InvalidConfig(format!(
                "min_match_score {} outside [0,1]",
                self.min_match_score
            )));
        }
        if self.max_search_depth == 0 {
            return Err(Error::InvalidConfig("max_search_depth must be positive".into()));
        }
        Ok(())
    }

    /// Ordinal of an action char, if it belongs to the alphabet.
    pub fn action_ordinal(&self, action: char) -> Option<usize> {
        self.actions.iter().position(|&a| a == action)
    }
}
