//! Scan engine: walks dialogs and messages through the provider port,
//! caches what it sees and routes every match to the deletion workflow.

use std::sync::Arc;

use crate::{
    blacklist::Blacklist,
    config::ScanSettings,
    deletion::{dialog_context, Decision, DeletionWorkflow, Outcome},
    domain::{Dialog, DialogKind, Entity, Message, UserId},
    entity_cache::EntityCache,
    matcher::{MatchReason, Matcher, MatcherOptions},
    ports::{
        Confirmer, DialogsRequest, MessageRecord, MessagesRequest, PeerRecord, ProgressStore,
        ProviderPort,
    },
    selector::{AuthorFilter, DialogSelector},
    store,
    utils::{one_line, AuditEvent, AuditLogger, DialogContext},
    Result,
};

/// Progress interval for the offline rescan.
pub const RESCAN_PROGRESS_EVERY: u64 = 10_000;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub dialogs_seen: u64,
    pub dialogs_scanned: u64,
    pub dialogs_skipped: u64,
    pub flagged_dialogs: u64,
    pub messages_scanned: u64,
    pub matches: u64,
    pub deleted: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RescanReport {
    pub total: u64,
    pub messages_scanned: u64,
    pub matches: u64,
}

pub struct Scanner {
    provider: Arc<dyn ProviderPort>,
    store: Arc<dyn ProgressStore>,
    entities: Arc<EntityCache>,
    audit: Arc<AuditLogger>,
    workflow: DeletionWorkflow,
    blacklist: Blacklist,
    matcher: Matcher,
    selector: DialogSelector,
    settings: ScanSettings,
}

impl Scanner {
    pub fn new(
        provider: Arc<dyn ProviderPort>,
        store: Arc<dyn ProgressStore>,
        entities: Arc<EntityCache>,
        confirmer: Arc<dyn Confirmer>,
        audit: Arc<AuditLogger>,
        blacklist: Blacklist,
        settings: ScanSettings,
    ) -> Self {
        let mut window = settings.window.clone();
        window.ignored_ids.extend(blacklist.ignored_ids());

        let matcher = Matcher::new(
            &blacklist,
            MatcherOptions {
                case_sensitive: settings.text_case_sensitive,
                forwards: settings.checks.forwards.enabled,
                mentions: settings.checks.mentions.enabled,
                keywords: settings.checks.keywords.enabled,
                ..MatcherOptions::default()
            },
        );
        let selector = DialogSelector::new(
            window,
            settings.dialogs,
            settings.self_only_after_users_count,
            &blacklist,
            settings.dialog_checks,
        );
        let workflow =
            DeletionWorkflow::new(provider.clone(), store.clone(), confirmer, audit.clone());

        Self {
            provider,
            store,
            entities,
            audit,
            workflow,
            blacklist,
            matcher,
            selector,
            settings,
        }
    }

    fn page_size(&self) -> usize {
        self.settings
            .page_size
            .min(self.provider.capabilities().max_page_size)
            .max(1)
    }

    /// Full online pass over the provider's dialogs.
    pub async fn run(&self) -> Result<ScanReport> {
        let me = self.provider.current_user().await?;
        let caps = self.provider.capabilities();
        let dry_run = !caps.supports_delete || !self.settings.delete_enabled;
        let window = self.selector.window();
        let window_str = format!("{} .. {}", window.from.to_rfc3339(), window.to.to_rfc3339());
        let fingerprint = self.blacklist.fingerprint();

        tracing::info!(
            user_id = me.0,
            window = %window_str,
            blacklist = %fingerprint,
            entries = self.blacklist.len(),
            dry_run,
            "scan started"
        );
        if !caps.supports_delete {
            tracing::warn!("provider cannot delete messages; every decision is a dry run");
        }
        self.audit.write(AuditEvent::run_start(
            &fingerprint,
            self.blacklist.len(),
            &window_str,
        ))?;

        let mut report = ScanReport::default();
        let mut cursor = None;
        loop {
            let page = self
                .provider
                .list_dialogs(DialogsRequest {
                    offset_date: window.to,
                    cursor: cursor.take(),
                    limit: self.page_size(),
                })
                .await?;
            for dialog in page.items {
                self.scan_dialog(me, dialog, dry_run, &mut report).await?;
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::info!(
            dialogs_seen = report.dialogs_seen,
            dialogs_scanned = report.dialogs_scanned,
            dialogs_skipped = report.dialogs_skipped,
            flagged_dialogs = report.flagged_dialogs,
            messages = report.messages_scanned,
            matches = report.matches,
            deleted = report.deleted,
            "scan complete"
        );
        Ok(report)
    }

    async fn scan_dialog(
        &self,
        me: UserId,
        mut dialog: Dialog,
        dry_run: bool,
        report: &mut ScanReport,
    ) -> Result<()> {
        report.dialogs_seen += 1;

        if let Some(reason) = self.selector.check_window(&dialog) {
            tracing::debug!(dialog_id = dialog.id.0, %reason, "dialog excluded");
            report.dialogs_skipped += 1;
            return Ok(());
        }

        if self.settings.cache_peers {
            self.store.register_dialog(dialog.id, me).await?;
        }
        if self.settings.skip_processed && self.store.is_processed(dialog.id, me).await? {
            tracing::info!(dialog_id = dialog.id.0, "dialog already processed, skipping");
            report.dialogs_skipped += 1;
            return Ok(());
        }

        let entity = self.entities.get_or_resolve(dialog.id.0).await?;
        dialog.enrich(&entity);
        let name = dialog.display_name();

        if let Some(reason) = self.selector.check_kind(&dialog) {
            tracing::info!(dialog_id = dialog.id.0, dialog = %name, kind = dialog.kind.as_str(), %reason, "skipping dialog");
            report.dialogs_skipped += 1;
            return Ok(());
        }

        self.flag_identity(&dialog, report)?;

        if self.settings.cache_peers {
            self.store
                .upsert_peer(peer_record(&dialog, &entity)?)
                .await?;
        }

        let mut filter = AuthorFilter::All;
        if dialog.kind == DialogKind::Channel {
            let info = self.provider.full_channel_info(&dialog).await?;
            if info.participant_count.is_some() {
                dialog.participant_count = info.participant_count;
            }
            if self.settings.cache_peers {
                self.store
                    .update_channel_info(dialog.id, info.participant_count, &info.raw)
                    .await?;
            }
            filter = self.selector.author_filter(&dialog);
        }

        tracing::info!(
            dialog_id = dialog.id.0,
            dialog = %name,
            kind = dialog.kind.as_str(),
            participants = dialog.participant_count,
            self_only = filter == AuthorFilter::SelfOnly,
            "processing dialog"
        );
        self.scan_messages(me, &dialog, filter, dry_run, report)
            .await?;
        report.dialogs_scanned += 1;

        if self.settings.cache_peers {
            self.store.mark_processed(dialog.id, me).await?;
        }
        Ok(())
    }

    fn flag_identity(&self, dialog: &Dialog, report: &mut ScanReport) -> Result<()> {
        let hits = self.selector.identity_hits(dialog);
        if hits.is_empty() {
            return Ok(());
        }
        report.flagged_dialogs += 1;
        let ctx = dialog_context(dialog);
        for entry in hits {
            tracing::warn!(
                dialog_id = ctx.dialog_id,
                dialog = %ctx.title,
                entry = %entry,
                "dialog itself is blacklisted"
            );
            self.audit
                .write(AuditEvent::dialog_flagged(&ctx, &entry.to_string()))?;
        }
        Ok(())
    }

    async fn scan_messages(
        &self,
        me: UserId,
        dialog: &Dialog,
        filter: AuthorFilter,
        dry_run: bool,
        report: &mut ScanReport,
    ) -> Result<()> {
        let window = self.selector.window();
        let name = dialog.display_name();
        let from_user = (filter == AuthorFilter::SelfOnly).then_some(me);
        let mut processed = 0u64;
        let mut deleted = 0u64;
        let mut cursor = None;

        'pages: loop {
            let page = self
                .provider
                .list_messages(MessagesRequest {
                    dialog_id: dialog.id,
                    from_user,
                    offset_date: window.from,
                    cursor: cursor.take(),
                    limit: self.page_size(),
                })
                .await?;

            for message in page.items {
                if message.date > window.to {
                    break 'pages;
                }
                if self.settings.cache_messages {
                    self.store
                        .upsert_messages(&[message_record(me, &name, &message)])
                        .await?;
                }
                processed += 1;
                report.messages_scanned += 1;

                if let Some(hit) = self.matcher.evaluate(&message) {
                    report.matches += 1;
                    let setting = match hit.reason {
                        MatchReason::ForwardedFrom => self.settings.checks.forwards,
                        MatchReason::MentionsHandle => self.settings.checks.mentions,
                        MatchReason::ContainsText => self.settings.checks.keywords,
                    };
                    let outcome = self
                        .workflow
                        .decide(dialog, &message, &hit, Decision::from_setting(setting, dry_run))
                        .await?;
                    if outcome == Outcome::Deleted {
                        deleted += 1;
                        report.deleted += 1;
                    }
                }

                if processed % self.settings.progress_every.max(1) == 0 {
                    tracing::info!(dialog = %name, processed, "progress");
                }
            }

            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::info!(dialog = %name, processed, deleted, "dialog cleanup complete");
        Ok(())
    }

    /// Offline pass over cached messages: case-insensitive mention check,
    /// report only.
    pub async fn rescan_cached(&self, user_id: UserId) -> Result<RescanReport> {
        let matcher = Matcher::new(
            &self.blacklist,
            MatcherOptions {
                case_sensitive: false,
                forwards: false,
                mentions: true,
                keywords: false,
                ..MatcherOptions::default()
            },
        );
        let total = self.store.count(user_id).await?;
        tracing::info!(user_id = user_id.0, total, "rescanning cached messages");

        let mut report = RescanReport {
            total,
            ..RescanReport::default()
        };
        let mut messages = store::stream(self.store.as_ref(), user_id);
        while let Some(m) = messages.next().await? {
            report.messages_scanned += 1;
            if let Some(hit) = matcher.check_text(&m.text) {
                report.matches += 1;
                let ctx = DialogContext {
                    dialog_id: m.dialog_id.0,
                    title: m.dialog_name.clone(),
                    username: None,
                };
                tracing::warn!(
                    dialog_id = ctx.dialog_id,
                    dialog = %ctx.title,
                    message_id = m.id.0,
                    reason = %hit,
                    text = %one_line(&m.text, 120),
                    "blacklisted cached message"
                );
                self.audit.write(AuditEvent::cached_match(
                    &ctx,
                    m.id.0,
                    &m.text,
                    &hit.to_string(),
                ))?;
            }
            if report.messages_scanned % RESCAN_PROGRESS_EVERY == 0 {
                tracing::info!(processed = report.messages_scanned, total, "rescan progress");
            }
        }

        tracing::info!(
            processed = report.messages_scanned,
            matches = report.matches,
            "rescan complete"
        );
        Ok(report)
    }
}

fn peer_record(dialog: &Dialog, entity: &Entity) -> Result<PeerRecord> {
    Ok(PeerRecord {
        id: dialog.id,
        title: dialog.display_name(),
        username: dialog.username.clone(),
        peer_type: dialog.kind.as_str().to_string(),
        data: serde_json::to_value(entity)?,
    })
}

fn message_record(me: UserId, dialog_name: &str, message: &Message) -> MessageRecord {
    MessageRecord {
        id: message.id,
        dialog_id: message.dialog_id,
        user_id: me,
        dialog_name: dialog_name.to_string(),
        text: message.text.clone(),
        raw: message.raw.clone(),
    }
}
