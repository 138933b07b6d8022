use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use anyhow::Context;

use tgc_archive::{ExportProvider, ExportSource, InstagramAudit, ReadLimits};
use tgc_core::{
    blacklist::Blacklist,
    config::Config,
    entity_cache::EntityCache,
    ports::{ProgressStore, ProviderPort},
    scanner::Scanner,
    store::SqliteProgressStore,
    utils::AuditLogger,
    Error,
};

mod confirm;

use confirm::StdinConfirmer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Scan,
    Rescan,
    Instagram,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scan" => Ok(Mode::Scan),
            "rescan" => Ok(Mode::Rescan),
            "instagram" => Ok(Mode::Instagram),
            other => Err(Error::Config(format!(
                "unknown mode `{other}` (expected scan, rescan or instagram)"
            ))),
        }
    }
}

/// Path configured through `var`, or a config error naming it.
fn required_path<'a>(path: Option<&'a PathBuf>, var: &str) -> Result<&'a Path, Error> {
    path.map(PathBuf::as_path)
        .ok_or_else(|| Error::Config(format!("{var} environment variable is required")))
}

fn load_blacklist(cfg: &Config) -> anyhow::Result<Blacklist> {
    let blacklist = match &cfg.blacklist_file {
        Some(path) => Blacklist::load_json(path)
            .with_context(|| format!("loading blacklist {}", path.display()))?,
        None => Blacklist::load_scan_data_dir(&cfg.scan_data_dir, &cfg.scan_data_suffixes)
            .with_context(|| format!("loading scan data from {}", cfg.scan_data_dir.display()))?,
    };
    if blacklist.is_empty() {
        return Err(Error::Config("no blacklist entries provided".to_string()).into());
    }
    tracing::info!(
        entries = blacklist.len(),
        fingerprint = %blacklist.fingerprint(),
        "blacklist loaded"
    );
    Ok(blacklist)
}

async fn run_instagram(cfg: &Config, blacklist: &Blacklist, audit: &AuditLogger) -> anyhow::Result<()> {
    let path = required_path(cfg.instagram_export_path.as_ref(), "INSTAGRAM_EXPORT_PATH")?;
    let audit_run = InstagramAudit::from_blacklist(blacklist);
    if audit_run.is_empty() {
        tracing::warn!("blacklist has no instagram entries; nothing to check");
        return Ok(());
    }
    let mut source = ExportSource::open(path, ReadLimits::default())
        .with_context(|| format!("opening instagram export {}", path.display()))?;
    let findings = audit_run.run(&mut source, audit)?;
    tracing::info!(findings = findings.len(), "instagram audit complete");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tgc_core::logging::init("tgc")?;

    let mode = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<Mode>()?,
        None => Mode::Scan,
    };

    let cfg = Config::load()?;
    let blacklist = load_blacklist(&cfg)?;
    let audit = Arc::new(AuditLogger::new(&cfg.audit_log_path, cfg.audit_log_json));

    if mode == Mode::Instagram {
        return run_instagram(&cfg, &blacklist, &audit).await;
    }

    let export_path = required_path(cfg.telegram_export_path.as_ref(), "TELEGRAM_EXPORT_PATH")?;
    let provider: Arc<dyn ProviderPort> = Arc::new(
        ExportProvider::open(export_path)
            .await
            .with_context(|| format!("opening telegram export {}", export_path.display()))?,
    );
    let store: Arc<dyn ProgressStore> = Arc::new(
        SqliteProgressStore::open(&cfg.database_path)
            .with_context(|| format!("opening progress store {}", cfg.database_path.display()))?,
    );
    let entities = Arc::new(EntityCache::load(&cfg.entity_cache_file, provider.clone())?);

    let scanner = Scanner::new(
        provider.clone(),
        store,
        entities,
        Arc::new(StdinConfirmer::new()),
        audit,
        blacklist,
        cfg.scan.clone(),
    );

    match mode {
        Mode::Scan => {
            let report = scanner.run().await?;
            println!(
                "dialogs: {} seen, {} scanned, {} skipped, {} flagged; messages: {} scanned, {} matched, {} deleted",
                report.dialogs_seen,
                report.dialogs_scanned,
                report.dialogs_skipped,
                report.flagged_dialogs,
                report.messages_scanned,
                report.matches,
                report.deleted,
            );
        }
        Mode::Rescan => {
            let me = provider.current_user().await?;
            let report = scanner.rescan_cached(me).await?;
            println!(
                "cached messages: {} total, {} scanned, {} matched",
                report.total, report.messages_scanned, report.matches
            );
        }
        Mode::Instagram => {}
    }

    Ok(())
}
