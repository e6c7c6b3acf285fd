//! Runtime statistics.
//!
//! Operators can see what the agent has been doing, and whether detection is
//! degraded, without reading logs.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_stats, create_shared_stats_with_persistence, AgentStats, SharedAgentStats,
    StatsSnapshot,
};
