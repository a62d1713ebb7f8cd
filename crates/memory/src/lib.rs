//! Scoped, deduplicated memory for Anima agents.
//!
//! Records are stored under one of two identity scopes:
//!
//! - **Agent**: the persona's own replies, posts, summaries, reflections and
//!   skip audits
//! - **Participant**: content written by someone the agent observed or
//!   talked to
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     AgentMemory                             │
//! │                                                             │
//! │  dedup:     exact item id (observations)                    │
//! │             similarity >= threshold (agent-authored)        │
//! │  retrieval: merge own scopes (+ participant) by id,         │
//! │             rank by (score, recency), render context        │
//! └─────────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    MemoryAdapter                            │
//! │  timestamps writes, normalizes reads, absorbs failures      │
//! └─────────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼
//! ┌──────────────────────┐      ┌──────────────────────────────┐
//! │    InMemoryStore     │      │         QdrantStore          │
//! │  (tests, dry runs)   │      │   (REST, survives restarts)  │
//! └──────────────────────┘      └──────────────────────────────┘
//! ```

pub mod adapter;
pub mod agent;
pub mod dedup;
pub mod embedding;
pub mod error;
pub mod qdrant;
pub mod retrieval;
pub mod store;
pub mod types;

pub use adapter::MemoryAdapter;
pub use agent::AgentMemory;
pub use embedding::{Embedder, HashingEmbedder, OpenAiEmbedder, build_embedder};
pub use error::MemoryError;
pub use qdrant::QdrantStore;
pub use retrieval::merge_by_id;
pub use store::{InMemoryStore, MemoryStore, build_memory_store};
pub use types::{
    EmbeddingConfig, InteractionRecord, MemoryConfig, MemoryEntry, MemoryScope, MemoryStats,
    MemoryType, MessageRole, Metadata, MetadataFilter, StoredRecord,
};
