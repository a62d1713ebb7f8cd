//! In-memory platform for tests and dry runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use anima_common::{CandidateItem, PlatformError};
use parking_lot::Mutex;
use tracing::debug;

use crate::client::{PlatformClient, PlatformResult, QuotaStatus, UserProfile};

/// A publish the mock accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub id: String,
    pub text: String,
    pub reply_to: Option<String>,
}

/// Scriptable [`PlatformClient`].
///
/// `get_post` returns registered posts, fails with 404 for deleted ids and
/// unknown shortcodes, and synthesizes an empty post for any other numeric
/// id. Queued reply failures are consumed one per `reply_to_post` call
/// before the call succeeds.
pub struct MockPlatform {
    profile: UserProfile,
    quota: Mutex<QuotaStatus>,
    posts: Mutex<HashMap<String, CandidateItem>>,
    deleted: Mutex<HashSet<String>>,
    own_post_replies: Mutex<Vec<CandidateItem>>,
    search_results: Mutex<HashMap<String, Vec<CandidateItem>>>,
    fetch_error: Mutex<Option<PlatformError>>,
    search_error: Mutex<Option<PlatformError>>,
    reply_failures: Mutex<VecDeque<PlatformError>>,
    create_failures: Mutex<VecDeque<PlatformError>>,
    published: Mutex<Vec<Published>>,
    next_id: AtomicUsize,
    reply_calls: AtomicUsize,
    create_calls: AtomicUsize,
    get_post_calls: AtomicUsize,
}

impl MockPlatform {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            profile: UserProfile {
                id: "1000".to_string(),
                username: username.into(),
                name: None,
            },
            quota: Mutex::new(QuotaStatus::default()),
            posts: Mutex::new(HashMap::new()),
            deleted: Mutex::new(HashSet::new()),
            own_post_replies: Mutex::new(Vec::new()),
            search_results: Mutex::new(HashMap::new()),
            fetch_error: Mutex::new(None),
            search_error: Mutex::new(None),
            reply_failures: Mutex::new(VecDeque::new()),
            create_failures: Mutex::new(VecDeque::new()),
            published: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(9_000_000),
            reply_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            get_post_calls: AtomicUsize::new(0),
        }
    }

    pub fn add_post(&self, item: CandidateItem) {
        self.posts.lock().insert(item.id.clone(), item);
    }

    pub fn delete_post(&self, id: impl Into<String>) {
        let id = id.into();
        self.posts.lock().remove(&id);
        self.deleted.lock().insert(id);
    }

    pub fn set_own_post_replies(&self, items: Vec<CandidateItem>) {
        *self.own_post_replies.lock() = items;
    }

    pub fn set_search_results(&self, query: impl Into<String>, items: Vec<CandidateItem>) {
        self.search_results.lock().insert(query.into(), items);
    }

    pub fn fail_fetch(&self, error: PlatformError) {
        *self.fetch_error.lock() = Some(error);
    }

    pub fn fail_search(&self, error: PlatformError) {
        *self.search_error.lock() = Some(error);
    }

    /// Queue failures returned by the next `reply_to_post` calls, in order.
    pub fn queue_reply_failures(&self, errors: impl IntoIterator<Item = PlatformError>) {
        self.reply_failures.lock().extend(errors);
    }

    pub fn queue_create_failures(&self, errors: impl IntoIterator<Item = PlatformError>) {
        self.create_failures.lock().extend(errors);
    }

    pub fn set_quota(&self, quota: QuotaStatus) {
        *self.quota.lock() = quota;
    }

    pub fn exhaust_reply_quota(&self) {
        let mut quota = self.quota.lock();
        quota.reply_quota_usage = quota.reply_quota_total;
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    pub fn replies(&self) -> Vec<Published> {
        self.published
            .lock()
            .iter()
            .filter(|p| p.reply_to.is_some())
            .cloned()
            .collect()
    }

    pub fn reply_calls(&self) -> usize {
        self.reply_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn get_post_calls(&self) -> usize {
        self.get_post_calls.load(Ordering::SeqCst)
    }

    fn record(&self, text: &str, reply_to: Option<&str>) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.published.lock().push(Published {
            id: id.clone(),
            text: text.to_string(),
            reply_to: reply_to.map(str::to_string),
        });
        id
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn quota_status(&self) -> PlatformResult<QuotaStatus> {
        Ok(*self.quota.lock())
    }

    async fn get_user_profile(&self) -> PlatformResult<UserProfile> {
        Ok(self.profile.clone())
    }

    async fn get_post(&self, id: &str) -> PlatformResult<CandidateItem> {
        self.get_post_calls.fetch_add(1, Ordering::SeqCst);
        if self.deleted.lock().contains(id) {
            return Err(PlatformError::not_found(format!("Post {id} does not exist")));
        }
        if let Some(item) = self.posts.lock().get(id) {
            return Ok(item.clone());
        }
        let item = CandidateItem::new(id, "");
        if item.has_numeric_id() {
            Ok(item)
        } else {
            Err(PlatformError::not_found(format!("Unknown post {id}")))
        }
    }

    async fn create_post(&self, text: &str) -> PlatformResult<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.create_failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self.record(text, None))
    }

    async fn reply_to_post(&self, target_id: &str, text: &str) -> PlatformResult<String> {
        self.reply_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.reply_failures.lock().pop_front() {
            debug!(target_id = target_id, error = %err, "Mock reply failure");
            return Err(err);
        }
        let id = self.record(text, Some(target_id));
        self.quota.lock().reply_quota_usage += 1;
        Ok(id)
    }

    async fn fetch_replies_to_own_posts(
        &self,
        _max_posts: usize,
        max_replies_per_post: usize,
    ) -> PlatformResult<Vec<CandidateItem>> {
        if let Some(err) = self.fetch_error.lock().clone() {
            return Err(err);
        }
        let items = self.own_post_replies.lock().clone();
        let mut per_parent: HashMap<Option<String>, usize> = HashMap::new();
        Ok(items
            .into_iter()
            .filter(|item| {
                let count = per_parent.entry(item.replied_to_id.clone()).or_default();
                *count += 1;
                *count <= max_replies_per_post
            })
            .collect())
    }

    async fn search(&self, query: &str, limit: usize) -> PlatformResult<Vec<CandidateItem>> {
        if let Some(err) = self.search_error.lock().clone() {
            return Err(err);
        }
        let mut items = self
            .search_results
            .lock()
            .get(query)
            .cloned()
            .unwrap_or_default();
        items.truncate(limit);
        Ok(items)
    }
}
