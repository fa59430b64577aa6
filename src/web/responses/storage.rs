//! Response history storage for multi-turn conversations
//!
//! Holds the finished response, the input it was created from, and the full
//! message history that `previous_response_id` and `conversation` continue.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::builders::Response;
use super::constants::{DEFAULT_STORE_CAPACITY, MAX_PAGINATION_LIMIT};
use super::types::Message;

/// A finished response and the history it was produced from
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
    pub response: Response,
    pub conversation_id: String,
    /// This request's own input, normalized
    pub input: Vec<Message>,
    /// History including this response's assistant and tool turns
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Cursor pagination over stored responses, in save order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    /// Start after this response id; an unknown id starts from the top
    pub after: Option<String>,
    pub limit: usize,
    pub order: SortOrder,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponsePage {
    pub data: Vec<Response>,
    pub has_more: bool,
}

#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn save(&self, stored: StoredResponse);

    async fn get(&self, response_id: &str) -> Option<StoredResponse>;

    /// Most recently saved response of a conversation
    async fn latest_in_conversation(&self, conversation_id: &str) -> Option<StoredResponse>;

    async fn list(&self, query: &ListQuery) -> ResponsePage;

    /// `false` when nothing was stored under `response_id`
    async fn delete(&self, response_id: &str) -> bool;
}

#[derive(Default)]
struct StoreInner {
    responses: HashMap<String, StoredResponse>,
    /// conversation id -> response ids in save order
    conversations: HashMap<String, Vec<String>>,
    /// Every stored id, oldest first
    saved: VecDeque<String>,
}

impl StoreInner {
    fn remove(&mut self, response_id: &str) -> Option<StoredResponse> {
        let stored = self.responses.remove(response_id)?;
        if let Some(ids) = self.conversations.get_mut(&stored.conversation_id) {
            ids.retain(|id| id != response_id);
            if ids.is_empty() {
                self.conversations.remove(&stored.conversation_id);
            }
        }
        Some(stored)
    }
}

/// Process-local store; history is lost on restart
///
/// Holds at most `capacity` responses and evicts the oldest first.
pub struct InMemoryResponseStore {
    inner: RwLock<StoreInner>,
    capacity: usize,
}

impl Default for InMemoryResponseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryResponseStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STORE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl ResponseStore for InMemoryResponseStore {
    async fn save(&self, stored: StoredResponse) {
        let mut inner = self.inner.write().await;
        let id = stored.response.id.clone();
        debug!(
            "Storing response {} in conversation {}",
            id, stored.conversation_id
        );
        if !inner.responses.contains_key(&id) {
            inner.saved.push_back(id.clone());
            inner
                .conversations
                .entry(stored.conversation_id.clone())
                .or_default()
                .push(id.clone());
        }
        inner.responses.insert(id, stored);

        while inner.saved.len() > self.capacity {
            let Some(oldest) = inner.saved.pop_front() else {
                break;
            };
            debug!("Evicting response {} (capacity {})", oldest, self.capacity);
            inner.remove(&oldest);
        }
    }

    async fn get(&self, response_id: &str) -> Option<StoredResponse> {
        let inner = self.inner.read().await;
        let found = inner.responses.get(response_id).cloned();
        trace!("Lookup of response {}: found={}", response_id, found.is_some());
        found
    }

    async fn latest_in_conversation(&self, conversation_id: &str) -> Option<StoredResponse> {
        let inner = self.inner.read().await;
        inner
            .conversations
            .get(conversation_id)
            .and_then(|ids| ids.last())
            .and_then(|id| inner.responses.get(id))
            .cloned()
    }

    async fn list(&self, query: &ListQuery) -> ResponsePage {
        let inner = self.inner.read().await;
        let mut matching: Vec<&StoredResponse> = inner
            .saved
            .iter()
            .filter_map(|id| inner.responses.get(id))
            .filter(|s| query.model.as_ref().map_or(true, |m| &s.response.model == m))
            .collect();
        if query.order == SortOrder::Desc {
            matching.reverse();
        }

        let start = query
            .after
            .as_ref()
            .and_then(|after| matching.iter().position(|s| &s.response.id == after))
            .map(|idx| idx + 1)
            .unwrap_or(0);
        let limit = query.limit.clamp(1, MAX_PAGINATION_LIMIT);
        let rest = &matching[start..];
        trace!(
            "Listing {} of {} responses from index {}",
            rest.len().min(limit),
            matching.len(),
            start
        );

        ResponsePage {
            data: rest.iter().take(limit).map(|s| s.response.clone()).collect(),
            has_more: rest.len() > limit,
        }
    }

    async fn delete(&self, response_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        if inner.remove(response_id).is_none() {
            return false;
        }
        inner.saved.retain(|id| id != response_id);
        debug!("Deleted response {}", response_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::responses::builders::ResponseBuilder;

    fn stored(id: &str, conversation: &str, text: &str) -> StoredResponse {
        StoredResponse {
            response: ResponseBuilder::new(id.to_string(), "m").build(),
            conversation_id: conversation.to_string(),
            input: vec![Message::user_text(text)],
            messages: vec![Message::user_text(text)],
        }
    }

    fn ids(page: &ResponsePage) -> Vec<&str> {
        page.data.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let store = InMemoryResponseStore::new();
        store.save(stored("resp_1", "conv_1", "hi")).await;

        let found = store.get("resp_1").await.unwrap();
        assert_eq!(found.conversation_id, "conv_1");
        assert!(store.get("resp_missing").await.is_none());
    }

    #[tokio::test]
    async fn test_latest_in_conversation() {
        let store = InMemoryResponseStore::new();
        store.save(stored("resp_1", "conv_1", "first")).await;
        store.save(stored("resp_2", "conv_1", "second")).await;
        store.save(stored("resp_3", "conv_other", "other")).await;

        let latest = store.latest_in_conversation("conv_1").await.unwrap();
        assert_eq!(latest.response.id, "resp_2");
        assert_eq!(latest.messages[0].text(), "second");
        assert!(store.latest_in_conversation("conv_none").await.is_none());
    }

    #[tokio::test]
    async fn test_list_pages_newest_first() {
        let store = InMemoryResponseStore::new();
        for i in 1..=5 {
            store.save(stored(&format!("resp_{}", i), "conv_1", "x")).await;
        }

        let query = ListQuery {
            limit: 2,
            ..Default::default()
        };
        let page = store.list(&query).await;
        assert_eq!(ids(&page), vec!["resp_5", "resp_4"]);
        assert!(page.has_more);

        let page = store
            .list(&ListQuery {
                after: Some("resp_2".to_string()),
                ..query.clone()
            })
            .await;
        assert_eq!(ids(&page), vec!["resp_1"]);
        assert!(!page.has_more);

        let page = store
            .list(&ListQuery {
                order: SortOrder::Asc,
                limit: 10,
                ..Default::default()
            })
            .await;
        assert_eq!(ids(&page)[0], "resp_1");
        assert_eq!(page.data.len(), 5);
    }

    #[tokio::test]
    async fn test_list_filters_by_model() {
        let store = InMemoryResponseStore::new();
        store.save(stored("resp_1", "conv_1", "x")).await;
        let mut other = stored("resp_2", "conv_1", "y");
        other.response.model = "other".to_string();
        store.save(other).await;

        let page = store
            .list(&ListQuery {
                limit: 10,
                model: Some("other".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(ids(&page), vec!["resp_2"]);
    }

    #[tokio::test]
    async fn test_delete_updates_conversation() {
        let store = InMemoryResponseStore::new();
        store.save(stored("resp_1", "conv_1", "first")).await;
        store.save(stored("resp_2", "conv_1", "second")).await;

        assert!(store.delete("resp_2").await);
        assert!(!store.delete("resp_2").await);
        assert!(store.get("resp_2").await.is_none());
        let latest = store.latest_in_conversation("conv_1").await.unwrap();
        assert_eq!(latest.response.id, "resp_1");
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let store = InMemoryResponseStore::with_capacity(2);
        store.save(stored("resp_1", "conv_1", "a")).await;
        store.save(stored("resp_2", "conv_2", "b")).await;
        // Re-saving an id does not count twice
        store.save(stored("resp_2", "conv_2", "b")).await;
        store.save(stored("resp_3", "conv_2", "c")).await;

        assert!(store.get("resp_1").await.is_none());
        assert!(store.latest_in_conversation("conv_1").await.is_none());
        assert!(store.get("resp_2").await.is_some());
        assert_eq!(
            store.latest_in_conversation("conv_2").await.unwrap().response.id,
            "resp_3"
        );
    }
}
