//! Common types shared across Anima crates.
//!
//! This crate provides the foundational pieces every other crate builds on:
//! the error taxonomy, the candidate item model, and the injectable clock.

pub mod clock;
pub mod error;
pub mod item;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{AnimaError, LlmError, PlatformError, Result};
pub use item::CandidateItem;
