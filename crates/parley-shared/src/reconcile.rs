//! Client-side reconciliation of optimistic sends.
//!
//! A client shows its own message immediately under a correlation token and
//! later receives the server-confirmed `chatMessage` echoing that token. The
//! [`Timeline`] swaps the placeholder for the confirmed record in place, so a
//! send never appears twice. Confirmed events without a matching placeholder
//! (another device, or the counterpart) are appended.

use chrono::{DateTime, Utc};

use crate::protocol::ChatMessageView;
use crate::types::FileRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEntry {
    Pending {
        temp_id: String,
        content: Option<String>,
        file: Option<FileRef>,
        queued_at: DateTime<Utc>,
    },
    Confirmed(ChatMessageView),
}

impl TimelineEntry {
    fn temp_id(&self) -> Option<&str> {
        match self {
            TimelineEntry::Pending { temp_id, .. } => Some(temp_id),
            TimelineEntry::Confirmed(_) => None,
        }
    }
}

/// What [`Timeline::apply`] did with a confirmed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Replaced,
    Inserted,
    Duplicate,
}

#[derive(Debug, Default, Clone)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_optimistic(
        &mut self,
        temp_id: impl Into<String>,
        content: Option<String>,
        file: Option<FileRef>,
    ) {
        self.entries.push(TimelineEntry::Pending {
            temp_id: temp_id.into(),
            content,
            file,
            queued_at: Utc::now(),
        });
    }

    pub fn apply(&mut self, confirmed: ChatMessageView) -> Applied {
        let already_seen = self.entries.iter().any(|e| {
            matches!(e, TimelineEntry::Confirmed(existing) if existing.id == confirmed.id)
        });
        if already_seen {
            return Applied::Duplicate;
        }

        if let Some(token) = confirmed.temp_id.as_deref() {
            if let Some(slot) = self.entries.iter_mut().find(|e| e.temp_id() == Some(token)) {
                *slot = TimelineEntry::Confirmed(confirmed);
                return Applied::Replaced;
            }
        }

        self.entries.push(TimelineEntry::Confirmed(confirmed));
        Applied::Inserted
    }

    /// Drop a placeholder whose send was rejected. Returns whether one existed.
    pub fn discard(&mut self, temp_id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.temp_id() != Some(temp_id));
        self.entries.len() != before
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, TimelineEntry::Pending { .. }))
            .count()
    }
}
