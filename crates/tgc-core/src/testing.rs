//! In-memory provider used by the engine tests.

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    domain::{Dialog, DialogId, DialogKind, Entity, Message, MessageId, UserId},
    errors::Error,
    ports::{
        DialogsRequest, FullChannelInfo, MessagesRequest, Page, ProviderCapabilities,
        ProviderPort,
    },
    Result,
};

pub struct FakeProvider {
    me: UserId,
    supports_delete: bool,
    page_size: usize,
    dialogs: Vec<Dialog>,
    messages: HashMap<DialogId, Vec<Message>>,
    entities: HashMap<i64, Entity>,
    participants: HashMap<DialogId, u32>,

    resolve_calls: Mutex<usize>,
    message_requests: Mutex<Vec<MessagesRequest>>,
    deleted: Mutex<Vec<(DialogId, Vec<MessageId>)>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            me: UserId(1),
            supports_delete: true,
            page_size: 2,
            dialogs: Vec::new(),
            messages: HashMap::new(),
            entities: HashMap::new(),
            participants: HashMap::new(),
            resolve_calls: Mutex::new(0),
            message_requests: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }
}

impl FakeProvider {
    pub fn user(id: i64, username: &str) -> Entity {
        Entity {
            id,
            username: Some(username.to_string()),
            title: None,
            is_user: true,
            is_chat: false,
            is_channel: false,
            is_broadcast: false,
        }
    }

    pub fn dialog(id: i64, kind: DialogKind, title: &str, date: DateTime<Utc>) -> Dialog {
        Dialog {
            id: DialogId(id),
            kind,
            title: Some(title.to_string()),
            username: None,
            date,
            participant_count: None,
            is_broadcast: false,
        }
    }

    pub fn message(id: i64, dialog_id: i64, sender: i64, date: DateTime<Utc>, text: &str) -> Message {
        Message {
            id: MessageId(id),
            dialog_id: DialogId(dialog_id),
            date,
            text: text.to_string(),
            sender_id: Some(UserId(sender)),
            forward_origin: None,
            raw: serde_json::json!({ "id": id, "message": text }),
        }
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.insert(entity.id, entity);
        self
    }

    /// Adds the dialog and an entity of the matching kind.
    pub fn with_dialog(mut self, dialog: Dialog) -> Self {
        let entity = Entity {
            id: dialog.id.0,
            username: dialog.username.clone(),
            title: dialog.title.clone(),
            is_user: dialog.kind == DialogKind::Direct,
            is_chat: dialog.kind == DialogKind::Group,
            is_channel: dialog.kind == DialogKind::Channel,
            is_broadcast: dialog.is_broadcast,
        };
        self.entities.entry(entity.id).or_insert(entity);
        self.dialogs.push(dialog);
        self
    }

    pub fn with_messages(mut self, dialog_id: i64, messages: Vec<Message>) -> Self {
        self.messages
            .entry(DialogId(dialog_id))
            .or_default()
            .extend(messages);
        self
    }

    pub fn with_participants(mut self, dialog_id: i64, count: u32) -> Self {
        self.participants.insert(DialogId(dialog_id), count);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.supports_delete = false;
        self
    }

    pub fn resolve_calls(&self) -> usize {
        *self.resolve_calls.lock().unwrap()
    }

    pub fn message_requests(&self) -> Vec<MessagesRequest> {
        self.message_requests.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<(DialogId, Vec<MessageId>)> {
        self.deleted.lock().unwrap().clone()
    }
}

fn page_of<T: Clone>(items: Vec<T>, cursor: Option<&str>, limit: usize) -> Result<Page<T>> {
    let start = match cursor {
        Some(c) => c
            .parse::<usize>()
            .map_err(|_| Error::Provider(format!("bad cursor: {c}")))?,
        None => 0,
    };
    let end = (start + limit.max(1)).min(items.len());
    let slice = items.get(start..end).map(<[T]>::to_vec).unwrap_or_default();
    let next = (end < items.len()).then(|| end.to_string());
    Ok(Page { items: slice, next })
}

#[async_trait]
impl ProviderPort for FakeProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_delete: self.supports_delete,
            max_page_size: self.page_size,
        }
    }

    async fn current_user(&self) -> Result<UserId> {
        Ok(self.me)
    }

    async fn list_dialogs(&self, req: DialogsRequest) -> Result<Page<Dialog>> {
        let mut dialogs: Vec<Dialog> = self
            .dialogs
            .iter()
            .filter(|d| d.date <= req.offset_date)
            .cloned()
            .collect();
        dialogs.sort_by(|a, b| b.date.cmp(&a.date));
        page_of(dialogs, req.cursor.as_deref(), req.limit.min(self.page_size))
    }

    async fn resolve_entity(&self, peer_id: i64) -> Result<Entity> {
        *self.resolve_calls.lock().unwrap() += 1;
        self.entities
            .get(&peer_id)
            .cloned()
            .ok_or_else(|| Error::Provider(format!("unknown peer {peer_id}")))
    }

    async fn full_channel_info(&self, dialog: &Dialog) -> Result<FullChannelInfo> {
        let count = self
            .participants
            .get(&dialog.id)
            .copied()
            .or(dialog.participant_count);
        Ok(FullChannelInfo {
            participant_count: count,
            raw: serde_json::json!({ "id": dialog.id.0, "participants_count": count }),
        })
    }

    async fn list_messages(&self, req: MessagesRequest) -> Result<Page<Message>> {
        self.message_requests.lock().unwrap().push(req.clone());
        let mut messages: Vec<Message> = self
            .messages
            .get(&req.dialog_id)
            .into_iter()
            .flatten()
            .filter(|m| m.date >= req.offset_date)
            .filter(|m| req.from_user.map_or(true, |u| m.sender_id == Some(u)))
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        page_of(messages, req.cursor.as_deref(), req.limit.min(self.page_size))
    }

    async fn delete_messages(&self, dialog_id: DialogId, ids: &[MessageId]) -> Result<()> {
        if !self.supports_delete {
            return Err(Error::Provider("delete not supported".to_string()));
        }
        self.deleted.lock().unwrap().push((dialog_id, ids.to_vec()));
        Ok(())
    }
}
