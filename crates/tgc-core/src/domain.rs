use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Provider dialog id (numeric, marked form: channels are negative).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DialogId(pub i64);

/// Message id, unique within one dialog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The provider encodes broadcast/supergroup ids as `-10^12 - n`.
pub const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

/// Marked dialog id for a bare channel id (`n` -> `-10^12 - n`); `None`
/// when the result does not fit in an `i64`.
pub fn marked_channel_id(bare: i64) -> Option<i64> {
    (-CHANNEL_ID_OFFSET).checked_sub(bare)
}

/// Channel-offset identity between a blacklisted id and a raw provider id.
///
/// Holds when `10^12 - raw` equals the entry id or its negation. Both forms
/// show up in blacklists depending on where the id was copied from.
pub fn channel_offset_matches(entry_id: i64, raw_id: i64) -> bool {
    let Some(diff) = CHANNEL_ID_OFFSET.checked_sub(raw_id) else {
        return false;
    };
    diff == entry_id || entry_id.checked_neg() == Some(diff)
}

/// Full id comparison used for forward origins and dialog identity checks:
/// equal, negated, related through the channel offset, or the same channel
/// with one side in marked form.
pub fn peer_id_matches(entry_id: i64, raw_id: i64) -> bool {
    raw_id == entry_id
        || entry_id.checked_neg() == Some(raw_id)
        || channel_offset_matches(entry_id, raw_id)
        || checked_marked(entry_id) == Some(raw_id)
        || checked_marked(raw_id) == Some(entry_id)
}

fn checked_marked(bare: i64) -> Option<i64> {
    if bare <= 0 {
        return None;
    }
    marked_channel_id(bare)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogKind {
    Direct,
    Group,
    Channel,
}

impl DialogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DialogKind::Direct => "user",
            DialogKind::Group => "chat",
            DialogKind::Channel => "channel",
        }
    }
}

/// Read-only projection of a provider conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dialog {
    pub id: DialogId,
    pub kind: DialogKind,
    pub title: Option<String>,
    pub username: Option<String>,
    /// Last activity.
    pub date: DateTime<Utc>,
    pub participant_count: Option<u32>,
    pub is_broadcast: bool,
}

impl Dialog {
    /// First non-empty of title, username, id.
    pub fn display_name(&self) -> String {
        self.title
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.username.as_deref().filter(|s| !s.is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| self.id.to_string())
    }

    /// Fill gaps from a resolved entity. Provider dialog fields win.
    pub fn enrich(&mut self, entity: &Entity) {
        if self.title.as_deref().map_or(true, str::is_empty) {
            self.title = entity.title.clone();
        }
        if self.username.is_none() {
            self.username = entity.username.clone();
        }
        self.is_broadcast |= entity.is_broadcast;
    }
}

/// Metadata on a relayed message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardOrigin {
    pub source_username: Option<String>,
    pub source_title: Option<String>,
    pub source_chat_id: Option<i64>,
    pub source_channel_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub dialog_id: DialogId,
    pub date: DateTime<Utc>,
    pub text: String,
    pub sender_id: Option<UserId>,
    pub forward_origin: Option<ForwardOrigin>,
    pub raw: serde_json::Value,
}

/// Serializable projection of a resolved peer (user, chat or channel).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub username: Option<String>,
    pub title: Option<String>,
    pub is_user: bool,
    pub is_chat: bool,
    pub is_channel: bool,
    #[serde(default)]
    pub is_broadcast: bool,
}

/// Time window and exclusions for one run.
#[derive(Clone, Debug)]
pub struct ScanWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub ignored_ids: HashSet<i64>,
}

impl ScanWindow {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>, ignored_ids: HashSet<i64>) -> Self {
        Self {
            from,
            to,
            ignored_ids,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at <= self.to
    }

    pub fn is_ignored(&self, id: DialogId) -> bool {
        self.ignored_ids.contains(&id.0)
    }
}
