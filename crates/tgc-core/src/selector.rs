//! Dialog admission: window, kind toggles, broadcast exclusion, identity
//! flagging and the author filter.

use std::fmt;

use crate::{
    blacklist::{normalize, Blacklist, BlacklistEntry, BlacklistKind},
    config::DialogToggles,
    domain::{peer_id_matches, Dialog, DialogKind, ScanWindow},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExcludeReason {
    Ignored,
    BeforeWindow,
    AfterWindow,
    KindDisabled,
    Broadcast,
}

impl fmt::Display for ExcludeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExcludeReason::Ignored => "ignored id",
            ExcludeReason::BeforeWindow => "last activity before window",
            ExcludeReason::AfterWindow => "last activity after window",
            ExcludeReason::KindDisabled => "dialog kind disabled",
            ExcludeReason::Broadcast => "broadcast channel",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Selection {
    Accepted,
    Excluded(ExcludeReason),
}

/// Which authors' messages are visited in an accepted dialog.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorFilter {
    All,
    SelfOnly,
}

#[derive(Clone, Debug)]
pub struct DialogSelector {
    window: ScanWindow,
    toggles: DialogToggles,
    self_only_after: Option<u32>,
    identity: Vec<BlacklistEntry>,
}

impl DialogSelector {
    /// `identity` entries come from `blacklist` only when `dialog_checks` is set.
    pub fn new(
        window: ScanWindow,
        toggles: DialogToggles,
        self_only_after: Option<u32>,
        blacklist: &Blacklist,
        dialog_checks: bool,
    ) -> Self {
        let identity = if dialog_checks {
            blacklist
                .entries()
                .iter()
                .filter(|e| {
                    matches!(
                        e.kind(),
                        BlacklistKind::TgId | BlacklistKind::TgUsername | BlacklistKind::TgUserName
                    )
                })
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        Self {
            window,
            toggles,
            self_only_after,
            identity,
        }
    }

    pub fn window(&self) -> &ScanWindow {
        &self.window
    }

    /// Ignored ids and the time window. Runs before any provider lookup.
    pub fn check_window(&self, dialog: &Dialog) -> Option<ExcludeReason> {
        if self.window.is_ignored(dialog.id) {
            Some(ExcludeReason::Ignored)
        } else if dialog.date < self.window.from {
            Some(ExcludeReason::BeforeWindow)
        } else if dialog.date > self.window.to {
            Some(ExcludeReason::AfterWindow)
        } else {
            None
        }
    }

    /// Kind toggles and broadcast exclusion; expects an enriched dialog.
    pub fn check_kind(&self, dialog: &Dialog) -> Option<ExcludeReason> {
        let enabled = match dialog.kind {
            DialogKind::Direct => self.toggles.users,
            DialogKind::Group => self.toggles.chats,
            DialogKind::Channel => self.toggles.channels,
        };
        if !enabled {
            return Some(ExcludeReason::KindDisabled);
        }
        if dialog.kind == DialogKind::Channel && dialog.is_broadcast {
            return Some(ExcludeReason::Broadcast);
        }
        None
    }

    pub fn select(&self, dialog: &Dialog) -> Selection {
        match self.check_window(dialog).or_else(|| self.check_kind(dialog)) {
            Some(reason) => Selection::Excluded(reason),
            None => Selection::Accepted,
        }
    }

    /// Blacklist entries naming the dialog itself. Informational only.
    pub fn identity_hits(&self, dialog: &Dialog) -> Vec<&BlacklistEntry> {
        let username = dialog.username.as_deref().map(normalize);
        let title = dialog.title.as_deref().map(|t| t.to_lowercase());
        self.identity
            .iter()
            .filter(|e| match e.kind() {
                BlacklistKind::TgId => e.as_id().is_some_and(|id| peer_id_matches(id, dialog.id.0)),
                _ => {
                    username.as_deref() == Some(e.value()) || title.as_deref() == Some(e.value())
                }
            })
            .collect()
    }

    /// Large channels are scanned for the subject's own messages only.
    pub fn author_filter(&self, dialog: &Dialog) -> AuthorFilter {
        if dialog.kind != DialogKind::Channel {
            return AuthorFilter::All;
        }
        match (self.self_only_after, dialog.participant_count) {
            (Some(threshold), Some(count)) if count > threshold => AuthorFilter::SelfOnly,
            _ => AuthorFilter::All,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DialogId, CHANNEL_ID_OFFSET};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    fn january() -> ScanWindow {
        ScanWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap(),
            HashSet::from([99]),
        )
    }

    fn dialog(id: i64, kind: DialogKind, day: u32) -> Dialog {
        Dialog {
            id: DialogId(id),
            kind,
            title: Some("Some Chat".to_string()),
            username: None,
            date: Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap(),
            participant_count: None,
            is_broadcast: false,
        }
    }

    fn selector(toggles: DialogToggles, threshold: Option<u32>) -> DialogSelector {
        DialogSelector::new(january(), toggles, threshold, &Blacklist::default(), true)
    }

    #[test]
    fn window_and_ignored_ids_exclude() {
        let s = selector(DialogToggles::default(), None);
        assert_eq!(
            s.select(&dialog(99, DialogKind::Direct, 10)),
            Selection::Excluded(ExcludeReason::Ignored)
        );

        let mut late = dialog(1, DialogKind::Direct, 10);
        late.date = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(s.select(&late), Selection::Excluded(ExcludeReason::AfterWindow));

        let mut early = dialog(1, DialogKind::Direct, 10);
        early.date = Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap();
        assert_eq!(s.select(&early), Selection::Excluded(ExcludeReason::BeforeWindow));

        assert_eq!(s.select(&dialog(1, DialogKind::Direct, 10)), Selection::Accepted);
    }

    #[test]
    fn toggles_are_independent_per_kind() {
        let s = selector(
            DialogToggles {
                users: true,
                chats: false,
                channels: true,
            },
            None,
        );
        assert_eq!(s.select(&dialog(1, DialogKind::Direct, 5)), Selection::Accepted);
        assert_eq!(
            s.select(&dialog(2, DialogKind::Group, 5)),
            Selection::Excluded(ExcludeReason::KindDisabled)
        );
    }

    #[test]
    fn broadcast_channels_are_excluded() {
        let s = selector(DialogToggles::default(), None);
        let mut ch = dialog(-1_000_000_000_001, DialogKind::Channel, 5);
        ch.is_broadcast = true;
        assert_eq!(s.select(&ch), Selection::Excluded(ExcludeReason::Broadcast));
    }

    #[test]
    fn author_filter_uses_strict_threshold() {
        let s = selector(DialogToggles::default(), Some(50));
        let mut ch = dialog(-1_000_000_000_001, DialogKind::Channel, 5);
        ch.participant_count = Some(80);
        assert_eq!(s.author_filter(&ch), AuthorFilter::SelfOnly);
        ch.participant_count = Some(10);
        assert_eq!(s.author_filter(&ch), AuthorFilter::All);
        ch.participant_count = Some(50);
        assert_eq!(s.author_filter(&ch), AuthorFilter::All);

        let unbounded = selector(DialogToggles::default(), None);
        ch.participant_count = Some(10_000);
        assert_eq!(unbounded.author_filter(&ch), AuthorFilter::All);
    }

    #[test]
    fn identity_hits_flag_by_id_username_and_title() {
        let bl = Blacklist::new(vec![
            BlacklistEntry::new("123", BlacklistKind::TgId).unwrap(),
            BlacklistEntry::new("@spamhub", BlacklistKind::TgUsername).unwrap(),
        ]);
        let s = DialogSelector::new(january(), DialogToggles::default(), None, &bl, true);

        let by_id = dialog(CHANNEL_ID_OFFSET - 123, DialogKind::Channel, 5);
        assert_eq!(s.identity_hits(&by_id).len(), 1);

        let mut by_name = dialog(5, DialogKind::Group, 5);
        by_name.username = Some("SpamHub".to_string());
        assert_eq!(s.identity_hits(&by_name).len(), 1);

        assert!(s.identity_hits(&dialog(6, DialogKind::Group, 5)).is_empty());

        let off = DialogSelector::new(january(), DialogToggles::default(), None, &bl, false);
        assert!(off.identity_hits(&by_id).is_empty());
    }
}
