use async_trait::async_trait;
use anima_common::{CandidateItem, PlatformError};
use serde::{Deserialize, Serialize};

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Publishing quota for the current 24h window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub quota_usage: u32,
    pub quota_total: u32,
    pub reply_quota_usage: u32,
    pub reply_quota_total: u32,
}

impl Default for QuotaStatus {
    fn default() -> Self {
        Self {
            quota_usage: 0,
            quota_total: 250,
            reply_quota_usage: 0,
            reply_quota_total: 1000,
        }
    }
}

impl QuotaStatus {
    pub fn can_publish(&self) -> bool {
        self.quota_usage < self.quota_total
    }

    pub fn can_reply(&self) -> bool {
        self.reply_quota_usage < self.reply_quota_total
    }
}

/// The social platform as seen by the agent.
///
/// Every call is a suspension point and may fail with a [`PlatformError`]
/// whose kind tells the caller whether retrying makes sense.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn open(&self) -> PlatformResult<()> {
        Ok(())
    }

    async fn close(&self) -> PlatformResult<()> {
        Ok(())
    }

    async fn quota_status(&self) -> PlatformResult<QuotaStatus>;

    async fn can_reply(&self) -> PlatformResult<bool> {
        Ok(self.quota_status().await?.can_reply())
    }

    async fn can_publish(&self) -> PlatformResult<bool> {
        Ok(self.quota_status().await?.can_publish())
    }

    async fn get_user_profile(&self) -> PlatformResult<UserProfile>;

    /// Fails with a 404 error when the post is gone or private.
    async fn get_post(&self, id: &str) -> PlatformResult<CandidateItem>;

    /// Publish a top-level post; returns the new post id.
    async fn create_post(&self, text: &str) -> PlatformResult<String>;

    /// Publish a reply under `target_id`; returns the reply id.
    async fn reply_to_post(&self, target_id: &str, text: &str) -> PlatformResult<String>;

    /// Replies other users left under the agent's most recent posts.
    async fn fetch_replies_to_own_posts(
        &self,
        max_posts: usize,
        max_replies_per_post: usize,
    ) -> PlatformResult<Vec<CandidateItem>>;

    /// Keyword search over public posts.
    async fn search(&self, query: &str, limit: usize) -> PlatformResult<Vec<CandidateItem>>;
}
