//! # ruledex
//!
//! Online rule induction and confidence-weighted path planning over boolean
//! sensor streams. An agent in an unknown finite-state environment feeds each
//! timestep's (action, sensor-vector) experience into the engine, which:
//!
//! - builds and bounds a population of predictive condition→outcome rules,
//! - scores new experience against existing rules to decide reuse vs. creation,
//! - merges the most similar rules when the population hits its ceiling,
//! - searches forward through chains of rules for the cheapest predicted path
//!   to the goal sensor becoming true.
//!
//! ## Architecture
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         RULEDEX                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │   Conf      → 7-bit decaying shift register ∈ [0,1]          │
//! │   CondSet   → base bits + per-bit Conf, TF-IDF-like match    │
//! │   Rule      → LHS ─action→ RHS, bounded predecessor chains   │
//! │   RuleIndex → depth → action → sensor-bit bisection tree,    │
//! │               self-balancing under a leaf-count ceiling      │
//! │   Search    → lazily expanded hypothesis tree, iterative     │
//! │               deepening, shortness-weighted best path        │
//! │   Agent     → insert-then-search decision cycle, random      │
//! │               exploration fallback                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//! ```rust
//! use ruledex::{Agent, AgentConfig};
//!
//! let config = AgentConfig {
//!     actions: vec!['a', 'b'],
//!     sensor_width: 2,
//!     goal_bit: 1,
//!     ..AgentConfig::default()
//! };
//! let mut agent = Agent::new(config).unwrap();
//!
//! // Each timestep: hand the engine the current sensors, take its action.
//! let action = agent.step(&[false, false]).unwrap();
//! assert!(action == 'a' || action == 'b');
//! ```
//!
//! One decision cycle is strictly insert-then-search; every `Agent` owns its
//! rule store, index, and statistics outright, so independent agents never
//! share state.

// === Core modules ===
pub mod core;
pub mod config;
pub mod rule;
pub mod index;
pub mod search;
pub mod agent;

// === Re-exports for convenience ===

pub use crate::core::{BitFreq, CondSet, Conf};
pub use crate::config::AgentConfig;
pub use crate::rule::{MatchResult, Rule, RuleId, RuleStore};
pub use crate::index::RuleIndex;
pub use crate::search::SearchTree;
pub use crate::agent::Agent;

// === Error types ===

/// Crate-level error type
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("rule depth {depth} exceeds maximum {max}")]
    DepthExceeded { depth: usize, max: usize },

    #[error("sensor width mismatch: expected {expected}, got {got}")]
    WidthMismatch { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

// === Constants ===

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A leaf must hold at least this many rules before it counts toward the
/// balance ratio check.
pub const MIN_SMALLEST: usize = 2;

/// Maximum allowed ratio between the largest and smallest qualifying leaf
/// populations before a split is forced.
pub const MAX_SIZE_RATIO: usize = 3;
