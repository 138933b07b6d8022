//! Per-match decision: `MATCHED -> REPORTED -> DELETED | SKIPPED`.

use std::{fmt, sync::Arc};

use crate::{
    config::CheckSetting,
    domain::{Dialog, Message},
    matcher::MatchResult,
    ports::{Confirmer, ProgressStore, ProviderPort},
    utils::{one_line, AuditEvent, AuditLogger, DialogContext},
    Result,
};

const LOG_PREVIEW_CHARS: usize = 120;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    DryRun,
    Declined,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Deleted,
    Skipped(SkipReason),
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Deleted => "deleted",
            Outcome::Skipped(SkipReason::DryRun) => "skipped (dry run)",
            Outcome::Skipped(SkipReason::Declined) => "skipped (declined)",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delete without asking, or only report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
    pub force: bool,
    pub dry_run: bool,
}

impl Decision {
    /// Derive from a check setting; `global_dry_run` overrides everything.
    pub fn from_setting(setting: CheckSetting, global_dry_run: bool) -> Self {
        Self {
            force: !setting.ask,
            dry_run: global_dry_run || !setting.delete,
        }
    }
}

pub fn dialog_context(dialog: &Dialog) -> DialogContext {
    DialogContext {
        dialog_id: dialog.id.0,
        title: dialog.display_name(),
        username: dialog.username.clone(),
    }
}

pub struct DeletionWorkflow {
    provider: Arc<dyn ProviderPort>,
    store: Arc<dyn ProgressStore>,
    confirmer: Arc<dyn Confirmer>,
    audit: Arc<AuditLogger>,
}

impl DeletionWorkflow {
    pub fn new(
        provider: Arc<dyn ProviderPort>,
        store: Arc<dyn ProgressStore>,
        confirmer: Arc<dyn Confirmer>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            provider,
            store,
            confirmer,
            audit,
        }
    }

    /// Report the match, then delete the single message or skip it.
    pub async fn decide(
        &self,
        dialog: &Dialog,
        message: &Message,
        result: &MatchResult,
        decision: Decision,
    ) -> Result<Outcome> {
        let ctx = dialog_context(dialog);
        let reason = result.to_string();

        tracing::warn!(
            dialog_id = ctx.dialog_id,
            dialog = %ctx.title,
            username = ctx.username.as_deref().unwrap_or("-"),
            message_id = message.id.0,
            reason = %reason,
            text = %one_line(&message.text, LOG_PREVIEW_CHARS),
            "blacklisted message found"
        );
        self.audit.write(AuditEvent::matched(
            &ctx,
            message.id.0,
            &message.text,
            &reason,
        ))?;

        let outcome = if decision.dry_run {
            Outcome::Skipped(SkipReason::DryRun)
        } else if decision.force || self.ask(&ctx, message, &reason).await? {
            self.provider
                .delete_messages(message.dialog_id, &[message.id])
                .await?;
            self.store
                .mark_deleted(message.id, message.dialog_id)
                .await?;
            Outcome::Deleted
        } else {
            Outcome::Skipped(SkipReason::Declined)
        };

        tracing::info!(
            dialog_id = ctx.dialog_id,
            message_id = message.id.0,
            outcome = outcome.as_str(),
            "decision"
        );
        self.audit.write(AuditEvent::decision(
            &ctx,
            message.id.0,
            &reason,
            outcome.as_str(),
        ))?;
        Ok(outcome)
    }

    async fn ask(&self, ctx: &DialogContext, message: &Message, reason: &str) -> Result<bool> {
        let prompt = format!(
            "Delete message {} in {} ({reason})?\n{}",
            message.id,
            ctx.title,
            one_line(&message.text, LOG_PREVIEW_CHARS)
        );
        self.confirmer.confirm(&prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        blacklist::{BlacklistEntry, BlacklistKind},
        domain::{DialogId, DialogKind, MessageId, UserId},
        matcher::MatchReason,
        ports::{FixedConfirmer, MessageRecord},
        store::SqliteProgressStore,
        testing::FakeProvider,
    };
    use chrono::Utc;

    struct Fixture {
        provider: Arc<FakeProvider>,
        store: Arc<SqliteProgressStore>,
        dialog: Dialog,
        message: Message,
        result: MatchResult,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(SqliteProgressStore::open_in_memory().unwrap());
        store
            .upsert_messages(&[MessageRecord {
                id: MessageId(7),
                dialog_id: DialogId(10),
                user_id: UserId(1),
                dialog_name: "chat".to_string(),
                text: "see @evilchan".to_string(),
                raw: serde_json::Value::Null,
            }])
            .await
            .unwrap();
        Fixture {
            provider: Arc::new(FakeProvider::default()),
            store,
            dialog: Dialog {
                id: DialogId(10),
                kind: DialogKind::Group,
                title: Some("chat".to_string()),
                username: None,
                date: Utc::now(),
                participant_count: None,
                is_broadcast: false,
            },
            message: Message {
                id: MessageId(7),
                dialog_id: DialogId(10),
                date: Utc::now(),
                text: "see @evilchan".to_string(),
                sender_id: Some(UserId(1)),
                forward_origin: None,
                raw: serde_json::Value::Null,
            },
            result: MatchResult {
                entry: BlacklistEntry::new("evilchan", BlacklistKind::TgUsername).unwrap(),
                reason: MatchReason::MentionsHandle,
            },
        }
    }

    fn workflow(f: &Fixture, confirm: bool) -> DeletionWorkflow {
        DeletionWorkflow::new(
            f.provider.clone(),
            f.store.clone(),
            Arc::new(FixedConfirmer(confirm)),
            Arc::new(AuditLogger::disabled()),
        )
    }

    #[tokio::test]
    async fn dry_run_never_calls_provider() {
        let f = fixture().await;
        let out = workflow(&f, true)
            .decide(&f.dialog, &f.message, &f.result, Decision { force: true, dry_run: true })
            .await
            .unwrap();
        assert_eq!(out, Outcome::Skipped(SkipReason::DryRun));
        assert!(f.provider.deleted().is_empty());
    }

    #[tokio::test]
    async fn forced_delete_marks_row_deleted() {
        let f = fixture().await;
        let out = workflow(&f, false)
            .decide(&f.dialog, &f.message, &f.result, Decision { force: true, dry_run: false })
            .await
            .unwrap();
        assert_eq!(out, Outcome::Deleted);
        assert_eq!(f.provider.deleted(), vec![(DialogId(10), vec![MessageId(7)])]);
        let row = f.store.message(MessageId(7), DialogId(10)).unwrap().unwrap();
        assert!(row.deleted);
    }

    #[tokio::test]
    async fn confirmation_gates_unforced_delete() {
        let f = fixture().await;
        let declined = workflow(&f, false)
            .decide(&f.dialog, &f.message, &f.result, Decision { force: false, dry_run: false })
            .await
            .unwrap();
        assert_eq!(declined, Outcome::Skipped(SkipReason::Declined));
        assert!(f.provider.deleted().is_empty());

        let granted = workflow(&f, true)
            .decide(&f.dialog, &f.message, &f.result, Decision { force: false, dry_run: false })
            .await
            .unwrap();
        assert_eq!(granted, Outcome::Deleted);
    }

    #[test]
    fn decision_from_setting() {
        let delete_no_ask = CheckSetting::new(true, true, false);
        assert_eq!(
            Decision::from_setting(delete_no_ask, false),
            Decision { force: true, dry_run: false }
        );
        assert!(Decision::from_setting(delete_no_ask, true).dry_run);
        assert!(Decision::from_setting(CheckSetting::new(true, false, false), false).dry_run);
    }
}
