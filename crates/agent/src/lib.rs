//! Persona agent runtime for Anima.
//!
//! This crate turns candidate items from a social platform into
//! persona-consistent replies:
//!
//! - [`persona`]: persona definition, engagement decisions, generation and
//!   adherence scoring
//! - [`reflection`]: daily and post-interaction reflections
//! - [`cycle`]: the per-cycle state machine ([`CycleController`])
//! - [`shared`]: a lock-serialized handle for multiple triggers
//!
//! # Architecture
//!
//! ```text
//!  timer / webhook
//!        │
//!        ▼
//! ┌──────────────┐
//! │ SharedAgent  │  one cycle at a time
//! └──────┬───────┘
//!        ▼
//! ┌────────────────┐     ┌───────────────┐
//! │CycleController │────►│ PersonaEngine │──► GenerativeService
//! └──┬──────────┬──┘     └───────────────┘
//!    │          │
//!    ▼          ▼
//! PlatformClient  AgentMemory ──► MemoryStore
//! ```

pub mod bootstrap;
pub mod config;
pub mod cycle;
pub mod metrics;
pub mod observation;
pub mod persona;
pub mod publish;
pub mod reflection;
pub mod shared;
pub mod state;

pub use bootstrap::build_controller;
pub use config::{AgentConfig, AgentSettings};
pub use cycle::{
    AgentStats, Collaborators, CycleController, GeneratedResponse, InteractionResult, SkipReason,
    reason,
};
pub use metrics::{CycleMetrics, JsonlMetricsSink, MemoryMetricsSink, MetricsSink};
pub use observation::{ResponseRecord, SimulationLogger};
pub use persona::{AdherenceCheck, EngagementDecision, Persona, PersonaEngine};
pub use publish::{PublishRetryConfig, publish_with_retry};
pub use reflection::ReflectionEngine;
pub use shared::SharedAgent;
pub use state::CycleState;
