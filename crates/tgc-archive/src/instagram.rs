//! Audit of an Instagram data export for interactions with blacklisted
//! accounts: comments, likes, shared posts and connections.
//!
//! Nothing is modified; each finding is logged and written to the audit log.

use std::{collections::HashSet, fmt};

use chrono::{DateTime, Utc};
use serde_json::Value;

use tgc_core::{
    blacklist::{normalize, Blacklist, BlacklistKind},
    utils::{AuditEvent, AuditLogger},
    Result,
};

use crate::source::ExportSource;

const ACTIVITY: &str = "your_instagram_activity";
const CONNECTIONS: &str = "connections";

const REELS_COMMENTS: &str = "your_instagram_activity/comments/reels_comments.json";
const POST_COMMENTS_PREFIX: &str = "your_instagram_activity/comments/post_comments_";
const LIKED_COMMENTS: &str = "your_instagram_activity/likes/liked_comments.json";
const LIKED_POSTS: &str = "your_instagram_activity/likes/liked_posts.json";
const INBOX_PREFIX: &str = "your_instagram_activity/messages/inbox/";
const FOLLOWERS_PREFIX: &str = "connections/followers_and_following/followers_";
const FOLLOWING: &str = "connections/followers_and_following/following.json";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    ReelsComments,
    PostComments,
    LikedComments,
    LikedPosts,
    InboxShares,
    Followers,
    Following,
}

impl Section {
    pub const ALL: [Section; 7] = [
        Section::ReelsComments,
        Section::PostComments,
        Section::LikedComments,
        Section::LikedPosts,
        Section::InboxShares,
        Section::Followers,
        Section::Following,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Section::ReelsComments => "reels comments",
            Section::PostComments => "post comments",
            Section::LikedComments => "liked comments",
            Section::LikedPosts => "liked posts",
            Section::InboxShares => "inbox shares",
            Section::Followers => "followers",
            Section::Following => "following",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finding {
    pub section: Section,
    pub owner: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Inbox thread folder for shares.
    pub thread: Option<String>,
}

pub struct InstagramAudit {
    accounts: HashSet<String>,
}

impl InstagramAudit {
    /// Targets are the `INSTAGRAM_USERNAME` and `INSTAGRAM_NAME` entries.
    pub fn from_blacklist(blacklist: &Blacklist) -> Self {
        let accounts = blacklist
            .by_kind(BlacklistKind::InstagramUsername)
            .chain(blacklist.by_kind(BlacklistKind::InstagramName))
            .map(|e| e.value().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        Self { accounts }
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    fn is_target(&self, owner: &str) -> bool {
        !owner.is_empty() && self.accounts.contains(&normalize(owner))
    }

    /// Check every section of the export. Missing sections are skipped.
    pub fn run(&self, source: &mut ExportSource, audit: &AuditLogger) -> Result<Vec<Finding>> {
        if !source.locate_root(&[ACTIVITY, CONNECTIONS])? {
            tracing::warn!(origin = %source.origin().display(), "no instagram activity found in export");
            return Ok(Vec::new());
        }

        let mut findings = Vec::new();
        for section in Section::ALL {
            tracing::info!(section = section.as_str(), "checking instagram section");
            let before = findings.len();
            self.check_section(section, source, &mut findings)?;
            tracing::info!(section = section.as_str(), found = findings.len() - before, "section done");
        }

        for f in &findings {
            let when = f.timestamp.map(|t| t.to_rfc3339());
            tracing::warn!(
                section = f.section.as_str(),
                owner = %f.owner,
                timestamp = when.as_deref().unwrap_or("-"),
                thread = f.thread.as_deref().unwrap_or("-"),
                "blacklisted instagram account"
            );
            let context = match (&when, &f.thread) {
                (Some(w), Some(t)) => Some(format!("{t} at {w}")),
                (Some(w), None) => Some(w.clone()),
                (None, Some(t)) => Some(t.clone()),
                (None, None) => None,
            };
            audit.write(AuditEvent::instagram_finding(
                f.section.as_str(),
                &f.owner,
                context.as_deref(),
            ))?;
        }
        Ok(findings)
    }

    fn check_section(
        &self,
        section: Section,
        source: &mut ExportSource,
        out: &mut Vec<Finding>,
    ) -> Result<()> {
        match section {
            Section::ReelsComments => {
                if let Some(v) = source.read_json(REELS_COMMENTS)? {
                    self.media_owner_comments(section, items(&v, "comments_reels_comments"), out);
                }
            }
            Section::PostComments => {
                for file in json_files(source, POST_COMMENTS_PREFIX)? {
                    if let Some(v) = source.read_json(&file)? {
                        self.media_owner_comments(section, items(&v, ""), out);
                    }
                }
            }
            Section::LikedComments => {
                if let Some(v) = source.read_json(LIKED_COMMENTS)? {
                    self.titled_likes(section, items(&v, "likes_comment_likes"), out);
                }
            }
            Section::LikedPosts => {
                if let Some(v) = source.read_json(LIKED_POSTS)? {
                    self.titled_likes(section, items(&v, "likes_media_likes"), out);
                }
            }
            Section::InboxShares => {
                for file in json_files(source, INBOX_PREFIX)? {
                    let thread = file
                        .strip_prefix(INBOX_PREFIX)
                        .and_then(|rest| rest.split('/').next())
                        .unwrap_or_default()
                        .to_string();
                    if let Some(v) = source.read_json(&file)? {
                        self.inbox_shares(&thread, items(&v, "messages"), out);
                    }
                }
            }
            Section::Followers => {
                for file in json_files(source, FOLLOWERS_PREFIX)? {
                    if let Some(v) = source.read_json(&file)? {
                        self.connections(section, items(&v, ""), out);
                    }
                }
            }
            Section::Following => {
                if let Some(v) = source.read_json(FOLLOWING)? {
                    self.connections(section, items(&v, "relationships_following"), out);
                }
            }
        }
        Ok(())
    }

    fn media_owner_comments(&self, section: Section, comments: &[Value], out: &mut Vec<Finding>) {
        for c in comments {
            let data = &c["string_map_data"];
            let owner = data["Media Owner"]["value"].as_str().unwrap_or_default();
            if self.is_target(owner) {
                out.push(Finding {
                    section,
                    owner: owner.to_string(),
                    timestamp: seconds(&data["Time"]["timestamp"]),
                    thread: None,
                });
            }
        }
    }

    fn titled_likes(&self, section: Section, likes: &[Value], out: &mut Vec<Finding>) {
        for like in likes {
            let title = like["title"].as_str().unwrap_or_default();
            if !self.is_target(title) {
                continue;
            }
            let stamps = items(like, "string_list_data");
            if stamps.is_empty() {
                out.push(Finding {
                    section,
                    owner: title.to_string(),
                    timestamp: None,
                    thread: None,
                });
            }
            for data in stamps {
                out.push(Finding {
                    section,
                    owner: title.to_string(),
                    timestamp: seconds(&data["timestamp"]),
                    thread: None,
                });
            }
        }
    }

    fn inbox_shares(&self, thread: &str, messages: &[Value], out: &mut Vec<Finding>) {
        for m in messages {
            let owner = m["share"]["original_content_owner"]
                .as_str()
                .unwrap_or_default();
            if self.is_target(owner) {
                out.push(Finding {
                    section: Section::InboxShares,
                    owner: owner.to_string(),
                    timestamp: m["timestamp_ms"]
                        .as_i64()
                        .and_then(DateTime::from_timestamp_millis),
                    thread: Some(thread.to_string()),
                });
            }
        }
    }

    fn connections(&self, section: Section, entries: &[Value], out: &mut Vec<Finding>) {
        for entry in entries {
            for data in items(entry, "string_list_data") {
                let value = data["value"].as_str().unwrap_or_default();
                if self.is_target(value) {
                    out.push(Finding {
                        section,
                        owner: value.to_string(),
                        timestamp: seconds(&data["timestamp"]),
                        thread: None,
                    });
                }
            }
        }
    }
}

/// Array under `key`, or the value itself when `key` is empty.
fn items<'a>(v: &'a Value, key: &str) -> &'a [Value] {
    let target = if key.is_empty() { v } else { &v[key] };
    target.as_array().map(Vec::as_slice).unwrap_or_default()
}

fn seconds(v: &Value) -> Option<DateTime<Utc>> {
    v.as_i64().and_then(|s| DateTime::from_timestamp(s, 0))
}

fn json_files(source: &ExportSource, prefix: &str) -> Result<Vec<String>> {
    Ok(source
        .list(prefix)?
        .into_iter()
        .filter(|f| f.ends_with(".json"))
        .collect())
}
