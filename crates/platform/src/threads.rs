//! Threads Graph API client.

use std::time::Duration;

use async_trait::async_trait;
use anima_common::{CandidateItem, PlatformError};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::{PlatformClient, PlatformResult, QuotaStatus, UserProfile};

pub const DEFAULT_BASE_URL: &str = "https://graph.threads.net/v1.0";

const POST_FIELDS: &str = "id,text,timestamp,permalink,username,is_reply";
const REPLY_FIELDS: &str = "id,text,timestamp,username";
const SEARCH_FIELDS: &str = "id,text,permalink,timestamp,username,is_reply";
const MAX_SEARCH_LIMIT: usize = 100;
const REPLY_FETCH_PAUSE: Duration = Duration::from_millis(200);

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ThreadsPost {
    id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    is_reply: Option<bool>,
}

impl ThreadsPost {
    fn into_item(self) -> CandidateItem {
        let timestamp = self
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(Utc::now);
        CandidateItem {
            id: self.id,
            text: self.text.unwrap_or_default(),
            author: self.username,
            timestamp,
            is_reply: self.is_reply.unwrap_or(false),
            replied_to_id: None,
            permalink: self.permalink,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QuotaRecord {
    #[serde(default)]
    quota_usage: u32,
    #[serde(default)]
    reply_quota_usage: u32,
    #[serde(default)]
    config: Option<QuotaConfig>,
    #[serde(default)]
    reply_config: Option<QuotaConfig>,
}

#[derive(Debug, Deserialize)]
struct QuotaConfig {
    #[serde(default)]
    quota_total: Option<u32>,
}

/// The Graph API sends `+0000` offsets; accept RFC 3339 as well.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z"))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Build a [`PlatformError`] from a non-success response body.
fn error_from_body(status: u16, body: &str) -> PlatformError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}: {body}"));
    let mut err = PlatformError::with_status(message, status);
    if let Some(code) = error.and_then(|e| e.get("code")).and_then(Value::as_i64) {
        err = err.with_code(code);
    }
    err
}

pub struct ThreadsClient {
    base_url: String,
    access_token: String,
    user_id: String,
    http_client: reqwest::Client,
}

impl ThreadsClient {
    pub fn new(
        base_url: Option<String>,
        access_token: String,
        user_id: String,
        timeout: Duration,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            access_token,
            user_id,
            http_client,
        }
    }

    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> PlatformResult<T> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(method = %method, endpoint = endpoint, "Threads API request");

        let response = self
            .http_client
            .request(method.clone(), &url)
            .query(params)
            .query(&[("access_token", self.access_token.as_str())])
            .send()
            .await
            .map_err(|e| PlatformError::transport(format!("Threads request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = error_from_body(status.as_u16(), &body);
            warn!(
                status_code = status.as_u16(),
                error_code = ?err.error_code,
                endpoint = endpoint,
                method = %method,
                error = %err.message,
                "Threads API error"
            );
            return Err(err);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PlatformError::new(format!("Failed to parse Threads response: {e}")))
    }

    /// Two-step publish: create a container, then publish it.
    async fn publish(&self, text: &str, reply_to_id: Option<&str>) -> PlatformResult<String> {
        let mut params = vec![
            ("media_type", "TEXT".to_string()),
            ("text", text.to_string()),
        ];
        if let Some(target) = reply_to_id {
            params.push(("reply_to_id", target.to_string()));
        }
        let container: IdResponse = self
            .request(Method::POST, &format!("{}/threads", self.user_id), &params)
            .await?;

        let published: IdResponse = self
            .request(
                Method::POST,
                &format!("{}/threads_publish", self.user_id),
                &[("creation_id", container.id)],
            )
            .await?;
        Ok(published.id)
    }

    async fn own_posts(&self, limit: usize) -> PlatformResult<Vec<CandidateItem>> {
        let page: Page<ThreadsPost> = self
            .request(
                Method::GET,
                &format!("{}/threads", self.user_id),
                &[("fields", POST_FIELDS.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        Ok(page.data.into_iter().map(ThreadsPost::into_item).collect())
    }

    async fn replies_to(&self, post_id: &str, limit: usize) -> PlatformResult<Vec<CandidateItem>> {
        let page: Page<ThreadsPost> = self
            .request(
                Method::GET,
                &format!("{post_id}/replies"),
                &[("fields", REPLY_FIELDS.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        Ok(page
            .data
            .into_iter()
            .map(|p| p.into_item().as_reply_to(post_id))
            .collect())
    }
}

#[async_trait]
impl PlatformClient for ThreadsClient {
    async fn quota_status(&self) -> PlatformResult<QuotaStatus> {
        let page: Page<QuotaRecord> = self
            .request(
                Method::GET,
                &format!("{}/threads_publishing_limit", self.user_id),
                &[(
                    "fields",
                    "quota_usage,config,reply_quota_usage,reply_config".to_string(),
                )],
            )
            .await?;

        let defaults = QuotaStatus::default();
        let Some(record) = page.data.into_iter().next() else {
            return Ok(defaults);
        };
        Ok(QuotaStatus {
            quota_usage: record.quota_usage,
            quota_total: record
                .config
                .and_then(|c| c.quota_total)
                .unwrap_or(defaults.quota_total),
            reply_quota_usage: record.reply_quota_usage,
            reply_quota_total: record
                .reply_config
                .and_then(|c| c.quota_total)
                .unwrap_or(defaults.reply_quota_total),
        })
    }

    async fn get_user_profile(&self) -> PlatformResult<UserProfile> {
        self.request(
            Method::GET,
            &self.user_id,
            &[("fields", "id,username,name".to_string())],
        )
        .await
    }

    async fn get_post(&self, id: &str) -> PlatformResult<CandidateItem> {
        let post: ThreadsPost = self
            .request(Method::GET, id, &[("fields", POST_FIELDS.to_string())])
            .await?;
        Ok(post.into_item())
    }

    async fn create_post(&self, text: &str) -> PlatformResult<String> {
        let id = self.publish(text, None).await?;
        info!(post_id = %id, "Post created");
        Ok(id)
    }

    async fn reply_to_post(&self, target_id: &str, text: &str) -> PlatformResult<String> {
        let id = self.publish(text, Some(target_id)).await?;
        info!(reply_id = %id, parent_id = target_id, "Reply created");
        Ok(id)
    }

    async fn fetch_replies_to_own_posts(
        &self,
        max_posts: usize,
        max_replies_per_post: usize,
    ) -> PlatformResult<Vec<CandidateItem>> {
        let posts = self.own_posts(max_posts).await?;
        let mut replies = Vec::new();
        for post in &posts {
            match self.replies_to(&post.id, max_replies_per_post).await {
                Ok(batch) => replies.extend(batch),
                Err(e) => {
                    warn!(post_id = %post.id, error = %e, "Failed to fetch replies");
                    continue;
                }
            }
            tokio::time::sleep(REPLY_FETCH_PAUSE).await;
        }
        info!(
            total = replies.len(),
            posts_checked = posts.len(),
            "Replies fetched"
        );
        Ok(replies)
    }

    async fn search(&self, query: &str, limit: usize) -> PlatformResult<Vec<CandidateItem>> {
        let page: Page<ThreadsPost> = self
            .request(
                Method::GET,
                "keyword_search",
                &[
                    ("q", query.to_string()),
                    ("search_type", "TOP".to_string()),
                    ("search_mode", "KEYWORD".to_string()),
                    ("limit", limit.min(MAX_SEARCH_LIMIT).to_string()),
                    ("fields", SEARCH_FIELDS.to_string()),
                ],
            )
            .await?;
        Ok(page.data.into_iter().map(ThreadsPost::into_item).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_graph_api_timestamps() {
        let ts = parse_timestamp("2026-02-03T10:20:30+0000").unwrap();
        assert_eq!(ts.hour(), 10);
        let ts = parse_timestamp("2026-02-03T10:20:30+08:00").unwrap();
        assert_eq!(ts.hour(), 2);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn error_body_carries_provider_code() {
        let body = r#"{"error":{"message":"Service temporarily unavailable","code":2}}"#;
        let err = error_from_body(400, body);
        assert_eq!(err.message, "Service temporarily unavailable");
        assert_eq!(err.error_code, Some(2));
        assert!(err.is_transient());
    }

    #[test]
    fn error_without_json_body_keeps_status() {
        let err = error_from_body(404, "not here");
        assert!(err.is_not_found());
        assert!(err.message.contains("404"));
    }

    #[test]
    fn post_maps_to_candidate_item() {
        let json = r#"{"id":"1789","text":"hello","username":"tech_thinker","timestamp":"2026-01-01T00:00:00+0000"}"#;
        let post: ThreadsPost = serde_json::from_str(json).unwrap();
        let item = post.into_item();
        assert_eq!(item.id, "1789");
        assert_eq!(item.author.as_deref(), Some("tech_thinker"));
        assert!(!item.is_reply);
    }

    #[test]
    fn base_url_is_trimmed() {
        let client = ThreadsClient::new(
            Some("https://graph.threads.net/v1.0/".into()),
            "token".into(),
            "me".into(),
            Duration::from_secs(5),
        );
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
    }
}
