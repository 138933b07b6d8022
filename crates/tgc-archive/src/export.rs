//! Provider port over a Telegram Desktop "Export chat history" dump
//! (`result.json`, machine-readable JSON format).
//!
//! The export is a snapshot: nothing can be deleted through it, so runs
//! against it are audit-only.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::OnceLock,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use tgc_core::{
    domain::{
        marked_channel_id, Dialog, DialogId, DialogKind, Entity, ForwardOrigin, Message,
        MessageId, UserId,
    },
    ports::{
        DialogsRequest, FullChannelInfo, MessagesRequest, Page, ProviderCapabilities,
        ProviderPort,
    },
    Error, Result,
};

use crate::source::{ExportSource, ReadLimits};

const RESULT_FILE: &str = "result.json";
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct ExportFile {
    personal_information: Option<PersonalInformation>,
    chats: Option<ChatList>,
    left_chats: Option<ChatList>,
}

#[derive(Debug, Deserialize)]
struct PersonalInformation {
    user_id: i64,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatList {
    #[serde(default)]
    list: Vec<ExportChat>,
}

#[derive(Debug, Deserialize)]
struct ExportChat {
    id: i64,
    name: Option<String>,
    #[serde(rename = "type")]
    chat_type: String,
    #[serde(default)]
    messages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ExportMessage {
    id: i64,
    #[serde(rename = "type", default)]
    message_type: String,
    date: Option<String>,
    date_unixtime: Option<String>,
    from_id: Option<String>,
    forwarded_from: Option<String>,
    forwarded_from_id: Option<String>,
    #[serde(default)]
    text: Value,
}

struct ExportDialog {
    dialog: Dialog,
    chat_type: String,
    /// Ascending by (date, id).
    messages: Vec<Message>,
}

pub struct ExportProvider {
    me: Option<UserId>,
    me_username: Option<String>,
    /// Most recent first.
    dialogs: Vec<ExportDialog>,
    index: HashMap<i64, usize>,
}

impl ExportProvider {
    /// Open `result.json` directly, or a directory / `.zip` containing it.
    pub async fn open(path: &Path) -> Result<Self> {
        let raw: Value = if path.is_file() && !has_zip_ext(path) {
            let txt = tokio::fs::read_to_string(path).await?;
            serde_json::from_str(&txt)?
        } else {
            let mut source = ExportSource::open(path, ReadLimits::default())?;
            if !source.locate_root(&[RESULT_FILE])? {
                return Err(Error::InvalidPath {
                    path: path.to_path_buf(),
                    reason: format!("no {RESULT_FILE} found"),
                });
            }
            source
                .read_json(RESULT_FILE)?
                .ok_or_else(|| Error::InvalidPath {
                    path: path.to_path_buf(),
                    reason: format!("no {RESULT_FILE} found"),
                })?
        };
        let provider = Self::from_value(raw)?;
        tracing::info!(
            path = %path.display(),
            dialogs = provider.dialogs.len(),
            "telegram export loaded"
        );
        Ok(provider)
    }

    pub fn from_value(raw: Value) -> Result<Self> {
        let export: ExportFile = serde_json::from_value(raw)?;
        let chats = export
            .chats
            .into_iter()
            .chain(export.left_chats)
            .flat_map(|c| c.list);

        let mut dialogs = Vec::new();
        let mut seen = HashSet::new();
        for chat in chats {
            let Some(d) = convert_chat(chat)? else {
                continue;
            };
            if seen.insert(d.dialog.id) {
                dialogs.push(d);
            }
        }
        dialogs.sort_by(|a, b| {
            b.dialog
                .date
                .cmp(&a.dialog.date)
                .then(a.dialog.id.cmp(&b.dialog.id))
        });
        let index = dialogs
            .iter()
            .enumerate()
            .map(|(i, d)| (d.dialog.id.0, i))
            .collect();

        let (me, me_username) = match export.personal_information {
            Some(p) => (Some(UserId(p.user_id)), p.username),
            None => (None, None),
        };
        Ok(Self {
            me,
            me_username,
            dialogs,
            index,
        })
    }

    pub fn dialog_count(&self) -> usize {
        self.dialogs.len()
    }

    fn get(&self, id: DialogId) -> Result<&ExportDialog> {
        self.index
            .get(&id.0)
            .and_then(|i| self.dialogs.get(*i))
            .ok_or_else(|| Error::Provider(format!("unknown dialog {id}")))
    }
}

fn has_zip_ext(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn peer_ref_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(user|channel|chat)(\d+)$").ok())
        .as_ref()
}

/// `user123` / `channel123` / `chat123` as used by `from_id` fields.
fn parse_peer_ref(s: &str) -> Option<(&str, i64)> {
    let caps = peer_ref_re()?.captures(s.trim())?;
    let kind = caps.get(1)?.as_str();
    let id = caps.get(2)?.as_str().parse().ok()?;
    Some((kind, id))
}

/// Export chat type -> (kind, broadcast, marked dialog id). `None` for
/// unsupported types and for ids that cannot be marked without overflow.
fn classify(chat_type: &str, raw_id: i64) -> Option<(DialogKind, bool, i64)> {
    match chat_type {
        "personal_chat" | "bot_chat" | "saved_messages" => {
            Some((DialogKind::Direct, false, raw_id))
        }
        "private_group" => Some((DialogKind::Group, false, -raw_id.checked_abs()?)),
        "private_supergroup" | "public_supergroup" => Some((
            DialogKind::Channel,
            false,
            marked_channel_id(raw_id.checked_abs()?)?,
        )),
        "private_channel" | "public_channel" => Some((
            DialogKind::Channel,
            true,
            marked_channel_id(raw_id.checked_abs()?)?,
        )),
        _ => None,
    }
}

fn convert_chat(chat: ExportChat) -> Result<Option<ExportDialog>> {
    let Some((kind, is_broadcast, id)) = classify(&chat.chat_type, chat.id) else {
        tracing::debug!(chat_id = chat.id, chat_type = %chat.chat_type, "unsupported chat, skipped");
        return Ok(None);
    };
    let dialog_id = DialogId(id);

    let mut messages = Vec::with_capacity(chat.messages.len());
    for raw in chat.messages {
        if let Some(m) = convert_message(dialog_id, raw)? {
            messages.push(m);
        }
    }
    messages.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));

    let authors: HashSet<UserId> = messages.iter().filter_map(|m| m.sender_id).collect();
    let date = messages
        .last()
        .map(|m| m.date)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    Ok(Some(ExportDialog {
        dialog: Dialog {
            id: dialog_id,
            kind,
            title: chat.name.filter(|n| !n.is_empty()),
            username: None,
            date,
            participant_count: u32::try_from(authors.len()).ok(),
            is_broadcast,
        },
        chat_type: chat.chat_type,
        messages,
    }))
}

fn convert_message(dialog_id: DialogId, raw: Value) -> Result<Option<Message>> {
    let m: ExportMessage = serde_json::from_value(raw.clone())?;
    if m.message_type != "message" {
        return Ok(None);
    }
    let Some(date) = parse_date(m.date_unixtime.as_deref(), m.date.as_deref()) else {
        tracing::debug!(dialog_id = dialog_id.0, message_id = m.id, "message without a usable date, skipped");
        return Ok(None);
    };

    let sender_id = m
        .from_id
        .as_deref()
        .and_then(parse_peer_ref)
        .and_then(|(kind, id)| (kind == "user").then_some(UserId(id)));

    let forward_origin = if m.forwarded_from.is_some() || m.forwarded_from_id.is_some() {
        let mut origin = ForwardOrigin {
            source_title: m.forwarded_from.clone(),
            ..ForwardOrigin::default()
        };
        match m.forwarded_from_id.as_deref().and_then(parse_peer_ref) {
            Some(("channel", id)) => origin.source_channel_id = Some(id),
            Some((_, id)) => origin.source_chat_id = Some(id),
            None => {}
        }
        Some(origin)
    } else {
        None
    };

    Ok(Some(Message {
        id: MessageId(m.id),
        dialog_id,
        date,
        text: flatten_text(&m.text),
        sender_id,
        forward_origin,
        raw,
    }))
}

fn parse_date(unix: Option<&str>, local: Option<&str>) -> Option<DateTime<Utc>> {
    if let Some(ts) = unix.and_then(|s| s.parse::<i64>().ok()) {
        return DateTime::from_timestamp(ts, 0);
    }
    let local = local?;
    NaiveDateTime::parse_from_str(local, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// Text is either a plain string or a list of strings and entity objects.
fn flatten_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(|p| match p {
                Value::String(s) => s.as_str(),
                Value::Object(o) => o.get("text").and_then(Value::as_str).unwrap_or(""),
                _ => "",
            })
            .collect(),
        _ => String::new(),
    }
}

/// Walks `items` from `start`, collecting up to `limit` picked values.
/// Only the returned items are cloned.
fn page_from<S, T>(
    items: &[S],
    start: usize,
    limit: usize,
    pick: impl Fn(&S) -> Option<T>,
) -> Page<T> {
    let mut out = Vec::new();
    let mut i = start;
    while i < items.len() && out.len() < limit {
        if let Some(item) = pick(&items[i]) {
            out.push(item);
        }
        i += 1;
    }
    let next = (i < items.len()).then(|| i.to_string());
    Page { items: out, next }
}

fn parse_cursor(cursor: Option<&str>) -> Result<Option<usize>> {
    cursor
        .map(|c| {
            c.parse::<usize>()
                .map_err(|_| Error::Provider(format!("invalid cursor: {c}")))
        })
        .transpose()
}

#[async_trait]
impl ProviderPort for ExportProvider {
    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_delete: false,
            max_page_size: MAX_PAGE_SIZE,
        }
    }

    async fn current_user(&self) -> Result<UserId> {
        let me = self
            .me
            .ok_or_else(|| Error::Provider("export has no personal_information".to_string()))?;
        tracing::debug!(user_id = me.0, username = ?self.me_username, "export owner");
        Ok(me)
    }

    async fn list_dialogs(&self, req: DialogsRequest) -> Result<Page<Dialog>> {
        let start = match parse_cursor(req.cursor.as_deref())? {
            Some(i) => i,
            None => self
                .dialogs
                .partition_point(|d| d.dialog.date > req.offset_date),
        };
        let limit = req.limit.clamp(1, MAX_PAGE_SIZE);
        Ok(page_from(&self.dialogs, start, limit, |d| {
            Some(d.dialog.clone())
        }))
    }

    async fn resolve_entity(&self, peer_id: i64) -> Result<Entity> {
        let d = self.get(DialogId(peer_id))?;
        Ok(Entity {
            id: peer_id,
            username: d.dialog.username.clone(),
            title: d.dialog.title.clone(),
            is_user: d.dialog.kind == DialogKind::Direct,
            is_chat: d.dialog.kind == DialogKind::Group,
            is_channel: d.dialog.kind == DialogKind::Channel,
            is_broadcast: d.dialog.is_broadcast,
        })
    }

    async fn full_channel_info(&self, dialog: &Dialog) -> Result<FullChannelInfo> {
        let d = self.get(dialog.id)?;
        Ok(FullChannelInfo {
            participant_count: d.dialog.participant_count,
            raw: serde_json::json!({
                "id": d.dialog.id.0,
                "name": d.dialog.title,
                "type": d.chat_type,
                "participants_count": d.dialog.participant_count,
                "source": "export",
            }),
        })
    }

    async fn list_messages(&self, req: MessagesRequest) -> Result<Page<Message>> {
        let d = self.get(req.dialog_id)?;
        let start = match parse_cursor(req.cursor.as_deref())? {
            Some(i) => i,
            None => d.messages.partition_point(|m| m.date < req.offset_date),
        };
        let limit = req.limit.clamp(1, MAX_PAGE_SIZE);
        let from_user = req.from_user;
        Ok(page_from(&d.messages, start, limit, |m| {
            from_user
                .map_or(true, |u| m.sender_id == Some(u))
                .then(|| m.clone())
        }))
    }

    async fn delete_messages(&self, dialog_id: DialogId, _ids: &[MessageId]) -> Result<()> {
        Err(Error::Provider(format!(
            "telegram export is read-only; cannot delete in dialog {dialog_id}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tgc_core::domain::CHANNEL_ID_OFFSET;

    fn sample() -> Value {
        json!({
            "personal_information": { "user_id": 1, "username": "me" },
            "chats": { "list": [
                {
                    "name": "Bob", "type": "personal_chat", "id": 42,
                    "messages": [
                        { "id": 1, "type": "message", "date": "2024-01-05T10:00:00",
                          "date_unixtime": "1704448800", "from": "Bob", "from_id": "user42",
                          "text": "hello" },
                        { "id": 2, "type": "message", "date": "2024-01-06T10:00:00",
                          "date_unixtime": "1704535200", "from": "Me", "from_id": "user1",
                          "forwarded_from": "Evil Channel", "forwarded_from_id": "channel777",
                          "text": ["look ", { "type": "mention", "text": "@evilchan" }] },
                        { "id": 3, "type": "service", "date_unixtime": "1704535300",
                          "action": "pin_message", "text": "" }
                    ]
                },
                {
                    "name": "Talk", "type": "public_supergroup", "id": 555,
                    "messages": [
                        { "id": 10, "type": "message", "date_unixtime": "1706000000",
                          "from_id": "user1", "text": "mine" },
                        { "id": 11, "type": "message", "date_unixtime": "1706000100",
                          "from_id": "user9", "text": "theirs" }
                    ]
                },
                { "name": "News", "type": "public_channel", "id": 556, "messages": [] },
                { "name": "Odd", "type": "something_new", "id": 1, "messages": [] }
            ]}
        })
    }

    #[tokio::test]
    async fn maps_chat_types_and_orders_dialogs() {
        let p = ExportProvider::from_value(sample()).unwrap();
        assert_eq!(p.dialog_count(), 3);
        assert_eq!(p.current_user().await.unwrap(), UserId(1));

        let page = p
            .list_dialogs(DialogsRequest {
                offset_date: Utc::now(),
                cursor: None,
                limit: 10,
            })
            .await
            .unwrap();
        let ids: Vec<i64> = page.items.iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec![-CHANNEL_ID_OFFSET - 555, 42, -CHANNEL_ID_OFFSET - 556]);
        assert_eq!(page.items[0].kind, DialogKind::Channel);
        assert!(!page.items[0].is_broadcast);
        assert!(page.items[2].is_broadcast);
        assert_eq!(page.items[0].participant_count, Some(2));
    }

    #[tokio::test]
    async fn list_dialogs_respects_offset_date_and_paging() {
        let p = ExportProvider::from_value(sample()).unwrap();
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let first = p
            .list_dialogs(DialogsRequest {
                offset_date: cutoff,
                cursor: None,
                limit: 1,
            })
            .await
            .unwrap();
        assert_eq!(first.items[0].id, DialogId(42));
        let second = p
            .list_dialogs(DialogsRequest {
                offset_date: cutoff,
                cursor: first.next,
                limit: 1,
            })
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn messages_carry_text_sender_and_forward_origin() {
        let p = ExportProvider::from_value(sample()).unwrap();
        let page = p
            .list_messages(MessagesRequest {
                dialog_id: DialogId(42),
                from_user: None,
                offset_date: DateTime::<Utc>::UNIX_EPOCH,
                cursor: None,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        let fwd = &page.items[1];
        assert_eq!(fwd.text, "look @evilchan");
        assert_eq!(fwd.sender_id, Some(UserId(1)));
        let origin = fwd.forward_origin.as_ref().unwrap();
        assert_eq!(origin.source_title.as_deref(), Some("Evil Channel"));
        assert_eq!(origin.source_channel_id, Some(777));
    }

    #[tokio::test]
    async fn self_filter_and_offset_date_apply() {
        let p = ExportProvider::from_value(sample()).unwrap();
        let page = p
            .list_messages(MessagesRequest {
                dialog_id: DialogId(-CHANNEL_ID_OFFSET - 555),
                from_user: Some(UserId(1)),
                offset_date: DateTime::<Utc>::UNIX_EPOCH,
                cursor: None,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].text, "mine");

        let later = p
            .list_messages(MessagesRequest {
                dialog_id: DialogId(42),
                from_user: None,
                offset_date: Utc.with_ymd_and_hms(2024, 1, 6, 0, 0, 0).unwrap(),
                cursor: None,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(later.items.len(), 1);
    }

    #[tokio::test]
    async fn export_is_read_only() {
        let p = ExportProvider::from_value(sample()).unwrap();
        assert!(!p.capabilities().supports_delete);
        let err = p
            .delete_messages(DialogId(42), &[MessageId(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert!(p.resolve_entity(12345).await.is_err());
    }

    #[tokio::test]
    async fn opens_result_json_from_zip() {
        let base = crate::source::tests::tmp("tgc-export-zip");
        let zip_path = base.join("export.zip");
        let body = sample().to_string();
        crate::source::tests::write_zip(&zip_path, &[("DataExport_2024/result.json", body.as_str())]);

        let p = ExportProvider::open(&zip_path).await.unwrap();
        assert_eq!(p.dialog_count(), 3);
    }

    #[tokio::test]
    async fn out_of_range_chat_ids_are_skipped() {
        let value = json!({
            "personal_information": { "user_id": 1 },
            "chats": { "list": [
                { "name": "Huge", "type": "public_channel", "id": 9223372036854775000i64, "messages": [] },
                { "name": "Min", "type": "private_group", "id": i64::MIN, "messages": [] },
                { "name": "MinChan", "type": "private_supergroup", "id": i64::MIN, "messages": [] },
                { "name": "Ok", "type": "public_channel", "id": 556, "messages": [] }
            ]}
        });
        let p = ExportProvider::from_value(value).unwrap();
        assert_eq!(p.dialog_count(), 1);
        let page = p
            .list_dialogs(DialogsRequest {
                offset_date: Utc::now(),
                cursor: None,
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(page.items[0].id, DialogId(-CHANNEL_ID_OFFSET - 556));
    }

    #[tokio::test]
    async fn list_dialogs_walks_cursor_to_the_end() {
        let p = ExportProvider::from_value(sample()).unwrap();
        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = p
                .list_dialogs(DialogsRequest {
                    offset_date: Utc::now(),
                    cursor: cursor.take(),
                    limit: 2,
                })
                .await
                .unwrap();
            assert!(page.items.len() <= 2);
            seen.extend(page.items.iter().map(|d| d.id.0));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, vec![-CHANNEL_ID_OFFSET - 555, 42, -CHANNEL_ID_OFFSET - 556]);
    }
}
