use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::Utc;
use serde::Serialize;

use crate::{errors::Error, Result};

// ============== Timestamp Helpers ==============

/// RFC3339 timestamp in UTC (for logs/audit).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

// ============== Audit Logging ==============

const AUDIT_MAX_TEXT: usize = 500;

/// Identifying context of a dialog for audit records.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DialogContext {
    pub dialog_id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialog_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialog_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialog_username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl AuditEvent {
    fn base(event: &str) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            dialog_id: None,
            dialog_title: None,
            dialog_username: None,
            message_id: None,
            content: None,
            reason: None,
            outcome: None,
            context: None,
        }
    }

    fn with_dialog(mut self, dialog: &DialogContext) -> Self {
        self.dialog_id = Some(dialog.dialog_id);
        self.dialog_title = Some(dialog.title.clone());
        self.dialog_username = dialog.username.clone();
        self
    }

    pub fn run_start(blacklist_fingerprint: &str, entries: usize, window: &str) -> Self {
        let mut ev = Self::base("run_start");
        ev.context = Some(format!(
            "blacklist={blacklist_fingerprint} entries={entries} window={window}"
        ));
        ev
    }

    /// A message matched and was reported; `outcome` follows later.
    pub fn matched(dialog: &DialogContext, message_id: i64, content: &str, reason: &str) -> Self {
        let mut ev = Self::base("match").with_dialog(dialog);
        ev.message_id = Some(message_id);
        ev.content = Some(content.to_string());
        ev.reason = Some(reason.to_string());
        ev
    }

    pub fn decision(dialog: &DialogContext, message_id: i64, reason: &str, outcome: &str) -> Self {
        let mut ev = Self::base("decision").with_dialog(dialog);
        ev.message_id = Some(message_id);
        ev.reason = Some(reason.to_string());
        ev.outcome = Some(outcome.to_string());
        ev
    }

    pub fn dialog_flagged(dialog: &DialogContext, reason: &str) -> Self {
        let mut ev = Self::base("dialog_flagged").with_dialog(dialog);
        ev.reason = Some(reason.to_string());
        ev
    }

    pub fn cached_match(dialog: &DialogContext, message_id: i64, content: &str, reason: &str) -> Self {
        let mut ev = Self::base("cached_match").with_dialog(dialog);
        ev.message_id = Some(message_id);
        ev.content = Some(content.to_string());
        ev.reason = Some(reason.to_string());
        ev
    }

    pub fn instagram_finding(section: &str, owner: &str, context: Option<&str>) -> Self {
        let mut ev = Self::base("instagram_finding");
        ev.reason = Some(format!("{section}: {owner}"));
        ev.context = context.map(|s| s.to_string());
        ev
    }
}

/// Append-only audit sink. `disabled()` drops every event.
#[derive(Debug)]
pub struct AuditLogger {
    path: Option<PathBuf>,
    json: bool,
    write_lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: Some(path.into()),
            json,
            write_lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            path: None,
            json: true,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(s) = &event.content {
            event.content = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::Storage("audit log mutex poisoned".to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::Storage(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

/// Single-line preview of message text for logs.
pub fn one_line(s: &str, max_len: usize) -> String {
    truncate_text(&s.replace(['\n', '\r'], " "), max_len)
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}
