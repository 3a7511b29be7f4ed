//! Core primitives: confidence, condition sets, corpus bit statistics.

pub mod conf;
pub mod cond;
pub mod freq;

pub use conf::Conf;
pub use cond::CondSet;
pub use freq::BitFreq;
