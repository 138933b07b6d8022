use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::{
    blacklist::{BlacklistKind, ScanDataSuffixes},
    domain::ScanWindow,
    errors::Error,
    Result,
};

/// Per-check behavior: run it, delete on match, ask before deleting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckSetting {
    pub enabled: bool,
    pub delete: bool,
    pub ask: bool,
}

impl CheckSetting {
    pub const fn new(enabled: bool, delete: bool, ask: bool) -> Self {
        Self {
            enabled,
            delete,
            ask,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MessageChecks {
    /// Forwarded from a blacklisted source.
    pub forwards: CheckSetting,
    /// `@handle` / `t.me/handle` mentions.
    pub mentions: CheckSetting,
    /// Keyword, URL and Instagram substrings.
    pub keywords: CheckSetting,
}

impl Default for MessageChecks {
    fn default() -> Self {
        Self {
            forwards: CheckSetting::new(true, true, false),
            mentions: CheckSetting::new(true, false, false),
            keywords: CheckSetting::new(true, false, false),
        }
    }
}

/// Independent per-kind dialog toggles.
#[derive(Clone, Copy, Debug)]
pub struct DialogToggles {
    pub users: bool,
    pub chats: bool,
    pub channels: bool,
}

impl Default for DialogToggles {
    fn default() -> Self {
        Self {
            users: true,
            chats: true,
            channels: true,
        }
    }
}

/// Fully resolved run parameters consumed by the engine.
#[derive(Clone, Debug)]
pub struct ScanSettings {
    pub window: ScanWindow,
    pub dialogs: DialogToggles,
    /// Compare dialog id/username/title with the blacklist and flag hits.
    pub dialog_checks: bool,
    /// Channels above this participant count are scanned for own messages only.
    pub self_only_after_users_count: Option<u32>,
    pub checks: MessageChecks,
    /// Master switch; when off every decision is a dry run.
    pub delete_enabled: bool,
    pub text_case_sensitive: bool,
    pub cache_peers: bool,
    pub cache_messages: bool,
    /// Skip dialogs already marked processed for the subject account.
    pub skip_processed: bool,
    pub page_size: usize,
    pub progress_every: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            window: default_window(Utc::now()),
            dialogs: DialogToggles::default(),
            dialog_checks: true,
            self_only_after_users_count: None,
            checks: MessageChecks::default(),
            delete_enabled: true,
            text_case_sensitive: true,
            cache_peers: true,
            cache_messages: true,
            skip_processed: false,
            page_size: 100,
            progress_every: 1000,
        }
    }
}

/// Last week up to the end of today, UTC.
pub fn default_window(now: DateTime<Utc>) -> ScanWindow {
    let today = now.date_naive();
    let from = (today - Duration::weeks(1)).and_time(NaiveTime::MIN).and_utc();
    let to = end_of_day(today);
    ScanWindow::new(from, to, HashSet::new())
}

fn end_of_day(d: NaiveDate) -> DateTime<Utc> {
    d.and_hms_milli_opt(23, 59, 59, 999)
        .unwrap_or_else(|| d.and_time(NaiveTime::MIN))
        .and_utc()
}

/// Typed configuration for the cleanup binary.
#[derive(Clone, Debug)]
pub struct Config {
    // Sources
    /// Needed by scan and rescan only.
    pub telegram_export_path: Option<PathBuf>,
    pub instagram_export_path: Option<PathBuf>,
    pub blacklist_file: Option<PathBuf>,
    pub scan_data_dir: PathBuf,
    pub scan_data_suffixes: ScanDataSuffixes,

    // Caches / persistence
    pub cache_dir: PathBuf,
    pub database_path: PathBuf,
    pub entity_cache_file: PathBuf,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,

    pub scan: ScanSettings,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_export_path = env_path("TELEGRAM_EXPORT_PATH");
        let instagram_export_path = env_path("INSTAGRAM_EXPORT_PATH");

        let blacklist_file = env_path("CLEANUP_BLACKLIST_FILE");
        let scan_data_dir = env_path("CLEANUP_SCAN_DATA_DIR").unwrap_or_else(|| "scan-data".into());
        let mut scan_data_suffixes = ScanDataSuffixes::default();
        for kind in BlacklistKind::ALL {
            if let Some(s) = env_str(&format!("CLEANUP_SUFFIX_{}", kind.as_str())).and_then(non_empty)
            {
                scan_data_suffixes.set(kind, s);
            }
        }

        let cache_dir = env_path("CLEANUP_CACHE_DIR").unwrap_or_else(|| ".cache".into());
        fs::create_dir_all(&cache_dir)?;
        let database_path =
            env_path("CLEANUP_DATABASE_PATH").unwrap_or_else(|| cache_dir.join("progress.sqlite3"));
        let entity_cache_file = cache_dir.join("entities.json");

        let audit_log_path = env_path("CLEANUP_AUDIT_LOG_PATH")
            .unwrap_or_else(|| cache_dir.join("cleanup-audit.log"));
        let audit_log_json = env_bool("CLEANUP_AUDIT_LOG_JSON").unwrap_or(true);

        let scan = load_scan_settings()?;

        Ok(Self {
            telegram_export_path,
            instagram_export_path,
            blacklist_file,
            scan_data_dir,
            scan_data_suffixes,
            cache_dir,
            database_path,
            entity_cache_file,
            audit_log_path,
            audit_log_json,
            scan,
        })
    }
}

fn load_scan_settings() -> Result<ScanSettings> {
    let defaults = ScanSettings::default();

    // Window
    let mut window = defaults.window.clone();
    if let Some(raw) = env_str("CLEANUP_FROM_DATE").and_then(non_empty) {
        window.from = parse_window_bound(&raw, false)?;
    }
    if let Some(raw) = env_str("CLEANUP_TO_DATE").and_then(non_empty) {
        window.to = parse_window_bound(&raw, true)?;
    }
    if window.from > window.to {
        return Err(Error::Config(format!(
            "CLEANUP_FROM_DATE ({}) is after CLEANUP_TO_DATE ({})",
            window.from, window.to
        )));
    }
    window.ignored_ids = parse_csv_i64(env_str("CLEANUP_IGNORED_IDS"))
        .into_iter()
        .collect();

    let dialogs = DialogToggles {
        users: env_bool("CLEANUP_DIALOGS_USERS").unwrap_or(defaults.dialogs.users),
        chats: env_bool("CLEANUP_DIALOGS_CHATS").unwrap_or(defaults.dialogs.chats),
        channels: env_bool("CLEANUP_DIALOGS_CHANNELS").unwrap_or(defaults.dialogs.channels),
    };

    let checks = MessageChecks {
        forwards: check_setting("FORWARDS", defaults.checks.forwards),
        mentions: check_setting("MENTIONS", defaults.checks.mentions),
        keywords: check_setting("KEYWORDS", defaults.checks.keywords),
    };

    Ok(ScanSettings {
        window,
        dialogs,
        dialog_checks: env_bool("CLEANUP_DIALOG_CHECKS").unwrap_or(defaults.dialog_checks),
        self_only_after_users_count: env_u32("CLEANUP_SELF_ONLY_AFTER_USERS_COUNT"),
        checks,
        delete_enabled: env_bool("CLEANUP_DELETE").unwrap_or(false),
        text_case_sensitive: env_bool("CLEANUP_TEXT_CASE_SENSITIVE")
            .unwrap_or(defaults.text_case_sensitive),
        cache_peers: env_bool("CLEANUP_CACHE_PEERS").unwrap_or(defaults.cache_peers),
        cache_messages: env_bool("CLEANUP_CACHE_MESSAGES").unwrap_or(defaults.cache_messages),
        skip_processed: env_bool("CLEANUP_SKIP_PROCESSED").unwrap_or(defaults.skip_processed),
        page_size: env_usize("CLEANUP_PAGE_SIZE")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.page_size),
        progress_every: env_u64("CLEANUP_PROGRESS_EVERY")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.progress_every),
    })
}

fn check_setting(name: &str, default: CheckSetting) -> CheckSetting {
    CheckSetting {
        enabled: env_bool(&format!("CLEANUP_CHECK_{name}")).unwrap_or(default.enabled),
        delete: env_bool(&format!("CLEANUP_DELETE_{name}")).unwrap_or(default.delete),
        ask: env_bool(&format!("CLEANUP_ASK_{name}")).unwrap_or(default.ask),
    }
}

/// `YYYY-MM-DD` (start or end of that UTC day) or a full RFC3339 timestamp.
pub fn parse_window_bound(raw: &str, end_of: bool) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(if end_of {
            end_of_day(d)
        } else {
            d.and_time(NaiveTime::MIN).and_utc()
        });
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Config(format!("invalid date `{raw}`: {e}")))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_bounds_cover_whole_days() {
        let from = parse_window_bound("2024-01-01", false).unwrap();
        let to = parse_window_bound("2024-01-31", true).unwrap();
        assert_eq!(from, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(to > Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 58).unwrap());
        assert!(to < Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn rfc3339_bounds_are_accepted() {
        let at = parse_window_bound("2024-03-05T10:00:00+02:00", false).unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap());
        assert!(matches!(
            parse_window_bound("yesterday", false),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn default_window_spans_one_week_to_end_of_today() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let w = default_window(now);
        assert_eq!(w.from, Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap());
        assert!(w.contains(now));
        assert!(!w.contains(Utc.with_ymd_and_hms(2024, 5, 11, 0, 0, 0).unwrap()));
    }

    #[test]
    fn csv_ids_skip_garbage() {
        assert_eq!(
            parse_csv_i64(Some(" 1, x, -100123 ,,".to_string())),
            vec![1, -100123]
        );
    }
}
