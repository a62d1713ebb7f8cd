//! Social platform collaborator: the `PlatformClient` contract, the Threads
//! Graph API implementation, and an in-memory mock.

pub mod client;
pub mod config;
pub mod mock;
pub mod threads;

pub use anima_common::PlatformError;
pub use client::{PlatformClient, PlatformResult, QuotaStatus, UserProfile};
pub use config::{PlatformConfig, build_platform_client};
pub use mock::{MockPlatform, Published};
pub use threads::ThreadsClient;
