//! Blacklist model: typed, normalized entries loaded once per run.
//!
//! Two sources are supported:
//! - a JSON list of `{"value": ..., "kind": "TG_USERNAME"}` records
//! - a scan-data directory with one plain-text file per (document, kind),
//!   recognized by file-name suffix, one value per line

use std::{
    collections::HashSet,
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{errors::Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlacklistKind {
    TgUserName,
    TgUsername,
    TgId,
    TgKeyword,
    TgUrl,
    InstagramName,
    InstagramUsername,
    InstagramUrl,
    YoutubeName,
    YoutubeUrl,
    TgIgnoredId,
}

impl BlacklistKind {
    pub const ALL: [BlacklistKind; 11] = [
        BlacklistKind::TgUserName,
        BlacklistKind::TgUsername,
        BlacklistKind::TgId,
        BlacklistKind::TgKeyword,
        BlacklistKind::TgUrl,
        BlacklistKind::InstagramName,
        BlacklistKind::InstagramUsername,
        BlacklistKind::InstagramUrl,
        BlacklistKind::YoutubeName,
        BlacklistKind::YoutubeUrl,
        BlacklistKind::TgIgnoredId,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BlacklistKind::TgUserName => "TG_USER_NAME",
            BlacklistKind::TgUsername => "TG_USERNAME",
            BlacklistKind::TgId => "TG_ID",
            BlacklistKind::TgKeyword => "TG_KEYWORD",
            BlacklistKind::TgUrl => "TG_URL",
            BlacklistKind::InstagramName => "INSTAGRAM_NAME",
            BlacklistKind::InstagramUsername => "INSTAGRAM_USERNAME",
            BlacklistKind::InstagramUrl => "INSTAGRAM_URL",
            BlacklistKind::YoutubeName => "YOUTUBE_NAME",
            BlacklistKind::YoutubeUrl => "YOUTUBE_URL",
            BlacklistKind::TgIgnoredId => "TG_IGNORED_ID",
        }
    }

    /// Kinds whose value must parse as a provider id.
    pub fn is_numeric(self) -> bool {
        matches!(self, BlacklistKind::TgId | BlacklistKind::TgIgnoredId)
    }
}

impl fmt::Display for BlacklistKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlacklistKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        BlacklistKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| Error::MalformedEntry {
                value: s.to_string(),
                reason: "unknown blacklist kind".to_string(),
            })
    }
}

/// Strip leading `@` and lowercase. Idempotent.
pub fn normalize(raw: &str) -> String {
    raw.trim_start_matches('@').to_lowercase()
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "EntryRecord", into = "EntryRecord")]
pub struct BlacklistEntry {
    value: String,
    kind: BlacklistKind,
}

/// On-disk shape of an entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct EntryRecord {
    value: String,
    kind: String,
}

impl TryFrom<EntryRecord> for BlacklistEntry {
    type Error = Error;

    fn try_from(r: EntryRecord) -> Result<Self> {
        BlacklistEntry::new(&r.value, r.kind.parse()?)
    }
}

impl From<BlacklistEntry> for EntryRecord {
    fn from(e: BlacklistEntry) -> Self {
        EntryRecord {
            value: e.value,
            kind: e.kind.as_str().to_string(),
        }
    }
}

impl BlacklistEntry {
    /// Normalize `raw` and validate it for `kind`.
    pub fn new(raw: &str, kind: BlacklistKind) -> Result<Self> {
        let value = normalize(raw);
        if kind.is_numeric() && value.trim().parse::<i64>().is_err() {
            return Err(Error::MalformedEntry {
                value,
                reason: format!("{kind} value is not an integer"),
            });
        }
        Ok(Self { value, kind })
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> BlacklistKind {
        self.kind
    }

    /// Integer value for id kinds.
    pub fn as_id(&self) -> Option<i64> {
        if !self.kind.is_numeric() {
            return None;
        }
        self.value.trim().parse().ok()
    }
}

impl fmt::Display for BlacklistEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.value, self.kind)
    }
}

/// File-name suffixes for the scan-data directory layout.
#[derive(Clone, Debug)]
pub struct ScanDataSuffixes {
    pub suffixes: Vec<(BlacklistKind, String)>,
}

impl Default for ScanDataSuffixes {
    fn default() -> Self {
        let pairs = [
            (BlacklistKind::TgId, "tg-ids.txt"),
            (BlacklistKind::TgUserName, "tg-user-names.txt"),
            (BlacklistKind::TgUsername, "tg-usernames.txt"),
            (BlacklistKind::TgKeyword, "tg-keywords.txt"),
            (BlacklistKind::TgUrl, "tg-urls.txt"),
            (BlacklistKind::InstagramUsername, "ig-usernames.txt"),
            (BlacklistKind::InstagramUrl, "ig-urls.txt"),
            (BlacklistKind::InstagramName, "ig-names.txt"),
            (BlacklistKind::YoutubeName, "yt-names.txt"),
            (BlacklistKind::YoutubeUrl, "yt-urls.txt"),
            (BlacklistKind::TgIgnoredId, "tg-ignored-ids.txt"),
        ];
        Self {
            suffixes: pairs
                .into_iter()
                .map(|(k, s)| (k, s.to_string()))
                .collect(),
        }
    }
}

impl ScanDataSuffixes {
    pub fn set(&mut self, kind: BlacklistKind, suffix: impl Into<String>) {
        let suffix = suffix.into();
        match self.suffixes.iter_mut().find(|(k, _)| *k == kind) {
            Some(slot) => slot.1 = suffix,
            None => self.suffixes.push((kind, suffix)),
        }
    }
}

/// Immutable, ordered list of entries for one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Blacklist {
    entries: Vec<BlacklistEntry>,
}

impl Blacklist {
    pub fn new(entries: Vec<BlacklistEntry>) -> Self {
        Self { entries }
    }

    /// Load a JSON blacklist file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let txt = fs::read_to_string(path)?;
        Self::from_json_str(&txt)
    }

    pub fn from_json_str(txt: &str) -> Result<Self> {
        // Parse loosely first so a bad kind surfaces as MalformedEntry, not a json error.
        let records: Vec<EntryRecord> = serde_json::from_str(txt)?;
        let entries = records
            .into_iter()
            .map(BlacklistEntry::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Concatenate every `*<suffix>` file in `dir`, per kind, in suffix order.
    pub fn load_scan_data_dir(dir: &Path, suffixes: &ScanDataSuffixes) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::InvalidPath {
                path: dir.to_path_buf(),
                reason: "scan data directory not found".to_string(),
            });
        }

        let mut names: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        names.sort();

        let mut entries = Vec::new();
        for (kind, suffix) in &suffixes.suffixes {
            for path in names.iter().filter(|p| has_suffix(p, suffix)) {
                let txt = fs::read_to_string(path)?;
                for line in txt.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    entries.push(BlacklistEntry::new(line, *kind)?);
                }
            }
        }
        Ok(Self { entries })
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(&self.entries)?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn entries(&self) -> &[BlacklistEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn by_kind(&self, kind: BlacklistKind) -> impl Iterator<Item = &BlacklistEntry> + '_ {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    /// Dialog ids listed as `TG_IGNORED_ID`.
    pub fn ignored_ids(&self) -> HashSet<i64> {
        self.by_kind(BlacklistKind::TgIgnoredId)
            .filter_map(BlacklistEntry::as_id)
            .collect()
    }

    /// Short SHA-256 of the serialized list; ties audit records to the exact blacklist.
    pub fn fingerprint(&self) -> String {
        let mut h = Sha256::new();
        for e in &self.entries {
            h.update(e.kind.as_str().as_bytes());
            h.update([0u8]);
            h.update(e.value.as_bytes());
            h.update([b'\n']);
        }
        hex_prefix(&h.finalize(), 16)
    }
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(suffix))
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(len);
    for b in bytes {
        let _ = write!(&mut out, "{:02x}", b);
        if out.len() >= len {
            out.truncate(len);
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tmp_dir(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        let dir = PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn normalize_strips_at_and_lowercases() {
        for kind in BlacklistKind::ALL.into_iter().filter(|k| !k.is_numeric()) {
            let e = BlacklistEntry::new("@Foo", kind).unwrap();
            assert_eq!(e.value(), "foo");
            let again = BlacklistEntry::new(e.value(), kind).unwrap();
            assert_eq!(again, e);
        }
        assert_eq!(normalize(&normalize("@@MiXed")), normalize("@@MiXed"));
    }

    #[test]
    fn serde_round_trips_every_kind() {
        for kind in BlacklistKind::ALL {
            let raw = if kind.is_numeric() { "-100123" } else { "@Value" };
            let e = BlacklistEntry::new(raw, kind).unwrap();
            let json = serde_json::to_string(&e).unwrap();
            assert!(json.contains(kind.as_str()));
            let back: BlacklistEntry = serde_json::from_str(&json).unwrap();
            assert_eq!(back, e);
        }
    }

    #[test]
    fn unknown_kind_is_malformed() {
        let err = Blacklist::from_json_str(r#"[{"value":"x","kind":"TG_NOPE"}]"#).unwrap_err();
        assert!(matches!(err, Error::MalformedEntry { .. }));
    }

    #[test]
    fn non_integer_id_is_malformed() {
        let err = BlacklistEntry::new("abc", BlacklistKind::TgId).unwrap_err();
        assert!(matches!(err, Error::MalformedEntry { .. }));
        assert_eq!(
            BlacklistEntry::new("-42", BlacklistKind::TgIgnoredId)
                .unwrap()
                .as_id(),
            Some(-42)
        );
    }

    #[test]
    fn scan_data_dir_concatenates_documents_per_kind() {
        let dir = tmp_dir("tgc-scan-data");
        fs::write(dir.join("doc1-tg-usernames.txt"), "@EvilChan\n\n  other \n").unwrap();
        fs::write(dir.join("doc2-tg-usernames.txt"), "third\n").unwrap();
        fs::write(dir.join("doc1-tg-ids.txt"), "123\n").unwrap();
        fs::write(dir.join("doc1-tg-ignored-ids.txt"), "777\n").unwrap();
        fs::write(dir.join("notes.md"), "ignored").unwrap();

        let bl = Blacklist::load_scan_data_dir(&dir, &ScanDataSuffixes::default()).unwrap();
        let usernames: Vec<&str> = bl
            .by_kind(BlacklistKind::TgUsername)
            .map(BlacklistEntry::value)
            .collect();
        assert_eq!(usernames, vec!["evilchan", "other", "third"]);
        assert_eq!(bl.by_kind(BlacklistKind::TgId).count(), 1);
        assert_eq!(bl.ignored_ids(), HashSet::from([777]));
        assert_eq!(bl.len(), 5);
    }

    #[test]
    fn json_file_round_trip_keeps_order_and_fingerprint() {
        let dir = tmp_dir("tgc-blacklist-json");
        let bl = Blacklist::new(vec![
            BlacklistEntry::new("b", BlacklistKind::TgKeyword).unwrap(),
            BlacklistEntry::new("a", BlacklistKind::TgUrl).unwrap(),
        ]);
        let path = dir.join("blacklist.json");
        bl.save_json(&path).unwrap();
        let back = Blacklist::load_json(&path).unwrap();
        assert_eq!(back, bl);
        assert_eq!(back.fingerprint(), bl.fingerprint());
        assert_eq!(bl.fingerprint().len(), 16);

        let reordered = Blacklist::new(bl.entries().iter().rev().cloned().collect());
        assert_ne!(reordered.fingerprint(), bl.fingerprint());
    }
}
