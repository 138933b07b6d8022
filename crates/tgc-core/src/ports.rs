//! Hexagonal ports: the engine's only view of the messaging provider, the
//! progress store and the operator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    domain::{Dialog, DialogId, Entity, Message, MessageId, UserId},
    Result,
};

/// Capabilities / feature flags of a provider implementation.
#[derive(Clone, Copy, Debug)]
pub struct ProviderCapabilities {
    pub supports_delete: bool,
    pub max_page_size: usize,
}

/// One round trip worth of results plus an opaque continuation cursor.
#[derive(Clone, Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

#[derive(Clone, Debug)]
pub struct DialogsRequest {
    /// Only dialogs whose last activity is at or before this instant.
    pub offset_date: DateTime<Utc>,
    pub cursor: Option<String>,
    pub limit: usize,
}

#[derive(Clone, Debug)]
pub struct MessagesRequest {
    pub dialog_id: DialogId,
    /// Restrict to messages authored by this user (self-filter).
    pub from_user: Option<UserId>,
    /// Start of the ascending walk.
    pub offset_date: DateTime<Utc>,
    pub cursor: Option<String>,
    pub limit: usize,
}

/// Full channel info as returned by the provider.
#[derive(Clone, Debug)]
pub struct FullChannelInfo {
    pub participant_count: Option<u32>,
    pub raw: serde_json::Value,
}

/// Messaging provider capability interface.
///
/// Every call is one network round trip and may fail. Dialog pages come
/// most-recent first; message pages come in ascending time order.
#[async_trait]
pub trait ProviderPort: Send + Sync {
    fn capabilities(&self) -> ProviderCapabilities;

    async fn current_user(&self) -> Result<UserId>;

    async fn list_dialogs(&self, req: DialogsRequest) -> Result<Page<Dialog>>;

    async fn resolve_entity(&self, peer_id: i64) -> Result<Entity>;

    async fn full_channel_info(&self, dialog: &Dialog) -> Result<FullChannelInfo>;

    async fn list_messages(&self, req: MessagesRequest) -> Result<Page<Message>>;

    async fn delete_messages(&self, dialog_id: DialogId, ids: &[MessageId]) -> Result<()>;
}

/// Persisted projection of a dialog.
#[derive(Clone, Debug, PartialEq)]
pub struct PeerRecord {
    pub id: DialogId,
    pub title: String,
    pub username: Option<String>,
    pub peer_type: String,
    pub data: serde_json::Value,
}

/// Persisted message row.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub dialog_id: DialogId,
    pub user_id: UserId,
    pub dialog_name: String,
    pub text: String,
    pub raw: serde_json::Value,
}

/// Message row read back from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredMessage {
    /// Store-assigned order.
    pub seq: i64,
    pub id: MessageId,
    pub dialog_id: DialogId,
    pub user_id: UserId,
    pub dialog_name: String,
    pub text: String,
    pub raw: serde_json::Value,
    pub deleted: bool,
}

/// Durable, idempotent progress sink.
///
/// Each call commits atomically; `deleted` and `processed` only ever go
/// from false to true.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn upsert_peer(&self, record: PeerRecord) -> Result<()>;

    async fn update_channel_info(
        &self,
        peer_id: DialogId,
        participant_count: Option<u32>,
        raw: &serde_json::Value,
    ) -> Result<()>;

    async fn register_dialog(&self, dialog_id: DialogId, user_id: UserId) -> Result<()>;

    async fn upsert_messages(&self, batch: &[MessageRecord]) -> Result<()>;

    async fn mark_processed(&self, dialog_id: DialogId, user_id: UserId) -> Result<()>;

    async fn is_processed(&self, dialog_id: DialogId, user_id: UserId) -> Result<bool>;

    async fn mark_deleted(&self, message_id: MessageId, dialog_id: DialogId) -> Result<()>;

    async fn count(&self, user_id: UserId) -> Result<u64>;

    /// Non-deleted messages with `seq > after_seq`, in store order.
    async fn load_batch(
        &self,
        user_id: UserId,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>>;
}

/// Interactive confirmation before a non-forced delete.
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Confirmer that always answers the same way.
#[derive(Clone, Copy, Debug)]
pub struct FixedConfirmer(pub bool);

#[async_trait]
impl Confirmer for FixedConfirmer {
    async fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(self.0)
    }
}
