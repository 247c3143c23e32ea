//! Dirty-entry tracker.
//!
//! Remembers which notes carry local edits the server has not confirmed, and
//! caches the last local title/content so a revisited note can be repopulated
//! without waiting for (or trusting) the server.
//!
//! Each field carries a revision. A save confirmation only counts against the
//! revision it was issued for, so an edit made while a save is in flight keeps
//! the note dirty.

use crate::config::DirtyRelease;
use crate::models::NoteContent;
use crate::util::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NoteField {
    Title,
    Content,
}

/// The fields touched by one local edit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NoteEdit {
    pub title: Option<String>,
    pub content: Option<NoteContent>,
}

impl NoteEdit {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            content: None,
        }
    }

    pub fn content(content: NoteContent) -> Self {
        Self {
            title: None,
            content: Some(content),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FieldDraft<T> {
    pub value: T,
    pub revision: u64,
    pub synced_revision: u64,
    pub updated_ms: i64,
}

impl<T> FieldDraft<T> {
    fn new(value: T, revision: u64) -> Self {
        Self {
            value,
            revision,
            synced_revision: 0,
            updated_ms: now_ms(),
        }
    }

    fn set(&mut self, value: T, revision: u64) {
        self.value = value;
        self.revision = revision;
        self.updated_ms = now_ms();
    }

    pub fn is_synced(&self) -> bool {
        self.synced_revision >= self.revision
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DirtyEntry {
    pub title: Option<FieldDraft<String>>,
    pub content: Option<FieldDraft<NoteContent>>,
}

impl DirtyEntry {
    fn is_synced(&self) -> bool {
        self.title.as_ref().is_none_or(FieldDraft::is_synced)
            && self.content.as_ref().is_none_or(FieldDraft::is_synced)
    }
}

/// What the tracker can hand back for a note. Either field may be missing if
/// only the other one was ever edited.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CachedNote {
    pub title: Option<String>,
    pub content: Option<NoteContent>,
}

impl CachedNote {
    pub fn is_complete(&self) -> bool {
        self.title.is_some() && self.content.is_some()
    }
}

#[derive(Debug, Default)]
pub struct DirtyTracker {
    policy: DirtyRelease,
    entries: HashMap<String, DirtyEntry>,
    revision: u64,
}

impl DirtyTracker {
    pub fn new(policy: DirtyRelease) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn policy(&self) -> DirtyRelease {
        self.policy
    }

    /// Merges the provided fields into the note's entry, keeping fields not
    /// provided. Returns the revision stamped on them.
    pub fn mark_dirty(&mut self, note_id: &str, edit: NoteEdit) -> u64 {
        self.revision += 1;
        let revision = self.revision;

        let entry = self.entries.entry(note_id.to_string()).or_default();
        if let Some(title) = edit.title {
            match entry.title.as_mut() {
                Some(f) => f.set(title, revision),
                None => entry.title = Some(FieldDraft::new(title, revision)),
            }
        }
        if let Some(content) = edit.content {
            match entry.content.as_mut() {
                Some(f) => f.set(content, revision),
                None => entry.content = Some(FieldDraft::new(content, revision)),
            }
        }
        revision
    }

    /// Membership in the dirty set. A dirty note is shielded from remote pushes.
    pub fn is_dirty(&self, note_id: &str) -> bool {
        self.entries.contains_key(note_id)
    }

    /// Some field has an edit newer than the last save this client saw succeed.
    pub fn has_unsaved(&self, note_id: &str) -> bool {
        self.entries
            .get(note_id)
            .is_some_and(|entry| !entry.is_synced())
    }

    pub fn get_cached(&self, note_id: &str) -> Option<CachedNote> {
        self.entries.get(note_id).map(|entry| CachedNote {
            title: entry.title.as_ref().map(|f| f.value.clone()),
            content: entry.content.as_ref().map(|f| f.value.clone()),
        })
    }

    pub fn entry(&self, note_id: &str) -> Option<&DirtyEntry> {
        self.entries.get(note_id)
    }

    /// Records a save of `field` at `revision` that the client saw succeed.
    ///
    /// Returns true if this released the note from the dirty set.
    pub fn confirm_saved(&mut self, note_id: &str, field: NoteField, revision: u64) -> bool {
        let Some(entry) = self.entries.get_mut(note_id) else {
            return false;
        };
        match field {
            NoteField::Title => {
                if let Some(f) = entry.title.as_mut() {
                    f.synced_revision = f.synced_revision.max(revision);
                }
            }
            NoteField::Content => {
                if let Some(f) = entry.content.as_mut() {
                    f.synced_revision = f.synced_revision.max(revision);
                }
            }
        }

        if self.policy == DirtyRelease::OnConfirmedSave && entry.is_synced() {
            self.entries.remove(note_id);
            tracing::debug!(note_id, "local edits confirmed; trusting remote again");
            return true;
        }
        false
    }

    pub fn release(&mut self, note_id: &str) -> bool {
        self.entries.remove(note_id).is_some()
    }

    pub fn dirty_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}
