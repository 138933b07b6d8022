//! Per-message blacklist matching.
//!
//! Two checks run in order and the first hit wins:
//! 1. forward origin (only for relayed messages)
//! 2. message text, each entry tested by the rule its kind maps to
//!
//! Within a check, entries are tried in blacklist order.

use std::fmt;

use crate::{
    blacklist::{normalize, Blacklist, BlacklistEntry, BlacklistKind},
    domain::{peer_id_matches, ForwardOrigin, Message},
};

/// Texts shorter than this (in chars) never match.
pub const MIN_TEXT_LEN: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchReason {
    ForwardedFrom,
    MentionsHandle,
    ContainsText,
}

impl MatchReason {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchReason::ForwardedFrom => "forwarded from",
            MatchReason::MentionsHandle => "mentions",
            MatchReason::ContainsText => "contains",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchResult {
    pub entry: BlacklistEntry,
    pub reason: MatchReason,
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.reason.as_str(), self.entry)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MatcherOptions {
    pub case_sensitive: bool,
    pub min_text_len: usize,
    pub forwards: bool,
    pub mentions: bool,
    pub keywords: bool,
}

impl Default for MatcherOptions {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            min_text_len: MIN_TEXT_LEN,
            forwards: true,
            mentions: true,
            keywords: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TextTest {
    /// `@value` or `t.me/value`.
    Mention,
    Substring,
}

/// Text test applied to each blacklist kind. Kinds absent here never match text.
const TEXT_RULES: [(BlacklistKind, TextTest); 6] = [
    (BlacklistKind::TgUsername, TextTest::Mention),
    (BlacklistKind::TgUserName, TextTest::Mention),
    (BlacklistKind::TgKeyword, TextTest::Substring),
    (BlacklistKind::TgUrl, TextTest::Substring),
    (BlacklistKind::InstagramName, TextTest::Substring),
    (BlacklistKind::InstagramUsername, TextTest::Substring),
];

fn text_test(kind: BlacklistKind) -> Option<TextTest> {
    TEXT_RULES
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, test)| *test)
}

#[derive(Clone, Debug)]
enum ForwardTest {
    /// Normalized name compared against origin username or title.
    Name,
    Id(i64),
}

#[derive(Clone, Debug)]
struct ForwardRule {
    entry: BlacklistEntry,
    test: ForwardTest,
}

#[derive(Clone, Debug)]
struct TextRule {
    entry: BlacklistEntry,
    needles: Vec<String>,
    reason: MatchReason,
}

/// Blacklist compiled for one run. Both rule lists keep blacklist order,
/// so the first listed entry that matches is the one reported.
#[derive(Clone, Debug)]
pub struct Matcher {
    options: MatcherOptions,
    forward_rules: Vec<ForwardRule>,
    text_rules: Vec<TextRule>,
}

impl Matcher {
    pub fn new(blacklist: &Blacklist, options: MatcherOptions) -> Self {
        let mut forward_rules = Vec::new();
        let mut text_rules = Vec::new();

        for entry in blacklist.entries() {
            if entry.value().is_empty() {
                continue;
            }
            if is_name_kind(entry.kind()) {
                forward_rules.push(ForwardRule {
                    entry: entry.clone(),
                    test: ForwardTest::Name,
                });
            } else if let Some(id) = entry.as_id().filter(|_| entry.kind() == BlacklistKind::TgId) {
                forward_rules.push(ForwardRule {
                    entry: entry.clone(),
                    test: ForwardTest::Id(id),
                });
            }

            let Some(test) = text_test(entry.kind()) else {
                continue;
            };
            let enabled = match test {
                TextTest::Mention => options.mentions,
                TextTest::Substring => options.keywords,
            };
            if !enabled {
                continue;
            }
            let value = fold(entry.value(), options.case_sensitive);
            let (needles, reason) = match test {
                TextTest::Mention => (
                    vec![format!("@{value}"), format!("t.me/{value}")],
                    MatchReason::MentionsHandle,
                ),
                TextTest::Substring => (vec![value], MatchReason::ContainsText),
            };
            text_rules.push(TextRule {
                entry: entry.clone(),
                needles,
                reason,
            });
        }

        Self {
            options,
            forward_rules,
            text_rules,
        }
    }

    /// Forward check, then text check.
    pub fn evaluate(&self, message: &Message) -> Option<MatchResult> {
        if self.options.forwards {
            if let Some(origin) = &message.forward_origin {
                if let Some(hit) = self.check_forward(origin) {
                    return Some(hit);
                }
            }
        }
        self.check_text(&message.text)
    }

    pub fn check_forward(&self, origin: &ForwardOrigin) -> Option<MatchResult> {
        let username = origin.source_username.as_deref().map(normalize);
        let title = origin.source_title.as_deref().map(|t| t.to_lowercase());
        let origin_ids = [origin.source_chat_id, origin.source_channel_id];

        self.forward_rules
            .iter()
            .find(|rule| match rule.test {
                ForwardTest::Name => {
                    let value = rule.entry.value();
                    username.as_deref() == Some(value) || title.as_deref() == Some(value)
                }
                ForwardTest::Id(id) => origin_ids
                    .iter()
                    .flatten()
                    .any(|raw| peer_id_matches(id, *raw)),
            })
            .map(|rule| MatchResult {
                entry: rule.entry.clone(),
                reason: MatchReason::ForwardedFrom,
            })
    }

    pub fn check_text(&self, text: &str) -> Option<MatchResult> {
        if text.chars().count() < self.options.min_text_len {
            return None;
        }
        let text = fold(text, self.options.case_sensitive);
        self.text_rules
            .iter()
            .find(|rule| rule.needles.iter().any(|n| text.contains(n.as_str())))
            .map(|rule| MatchResult {
                entry: rule.entry.clone(),
                reason: rule.reason,
            })
    }
}

fn is_name_kind(kind: BlacklistKind) -> bool {
    matches!(kind, BlacklistKind::TgUsername | BlacklistKind::TgUserName)
}

fn fold(s: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        s.to_string()
    } else {
        s.to_lowercase()
    }
}
