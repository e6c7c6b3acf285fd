//! Watchpost - single-node monitoring agent.
//!
//! This library turns camera and microphone streams into durable,
//! reviewable security alerts with attached evidence clips.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Watchpost Agent                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Capture   │──▶│  Detection  │──▶│   Alerts    │       │
//! │  │ (per stream)│   │  (workers)  │   │   (store)   │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         │                 │                  ▲              │
//! │         ▼                 ▼                  │              │
//! │  ┌─────────────┐   ┌─────────────┐          │              │
//! │  │  Evidence   │──▶│   Clips     │──────────┘              │
//! │  │  buffers    │   │ (gif / wav) │                         │
//! │  └─────────────┘   └─────────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use watchpost_agent::{Agent, Config};
//!
//! let config = Config::load().expect("Failed to load config");
//! let mut agent = Agent::from_config(config).expect("Failed to set up agent");
//!
//! agent.start().expect("Failed to start agent");
//! // ... alerts accumulate in agent.store() ...
//! agent.stop();
//! ```

pub mod agent;
pub mod alerts;
pub mod capture;
pub mod config;
pub mod detection;
pub mod stats;

// Re-export key types at crate root for convenience
pub use agent::{Agent, AgentMode, StartError};
pub use alerts::{Alert, AlertFilter, AlertKind, AlertStore, NewAlert, SharedAlertStore, StoreError};
pub use capture::{AudioChunk, CaptureError, RollingEvidenceBuffer, StreamCapture, VideoFrame};
pub use config::{Config, ConfigError};
pub use detection::{
    load_capabilities, Capabilities, CapabilityError, Detection, DetectionError,
    DetectionPipeline, ObjectPresenceTracker,
};
pub use stats::{AgentStats, SharedAgentStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
