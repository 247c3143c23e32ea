//! Read-only cache that list views and the editor observe. Only the remote
//! listener and the library service write into it.

use crate::models::{active_notes, partition_notebooks, trashed_notes, Note, Notebook};
use leptos::prelude::*;
use std::collections::HashMap;

#[derive(Clone, Copy)]
pub struct ReadCache {
    /// Non-deleted notebooks, sorted by title.
    pub notebooks: RwSignal<Vec<Notebook>>,
    pub trashed_notebooks: RwSignal<Vec<Notebook>>,
    /// Non-deleted notes per notebook, most recently updated first.
    pub notes_by_notebook: RwSignal<HashMap<String, Vec<Note>>>,
    pub trashed_notes: RwSignal<Vec<Note>>,
    /// Latest pushed value of every individually watched note.
    pub notes: RwSignal<HashMap<String, Note>>,
    /// Last subscription failure, if any. Views keep showing the last good data.
    pub last_error: RwSignal<Option<String>>,
}

impl ReadCache {
    pub fn new() -> Self {
        Self {
            notebooks: RwSignal::new(vec![]),
            trashed_notebooks: RwSignal::new(vec![]),
            notes_by_notebook: RwSignal::new(HashMap::new()),
            trashed_notes: RwSignal::new(vec![]),
            notes: RwSignal::new(HashMap::new()),
            last_error: RwSignal::new(None),
        }
    }

    pub fn set_notebooks(&self, all: Vec<Notebook>) {
        let (active, trashed) = partition_notebooks(all);
        self.notebooks.set(active);
        self.trashed_notebooks.set(trashed);
    }

    /// Takes every note of the notebook and keeps the non-deleted subset.
    pub fn set_notebook_notes(&self, notebook_id: &str, all: Vec<Note>) {
        let active = active_notes(all);
        self.notes_by_notebook.update(|m| {
            m.insert(notebook_id.to_string(), active);
        });
    }

    pub fn set_trash(&self, all: Vec<Note>) {
        self.trashed_notes.set(trashed_notes(all));
    }

    pub fn put_note(&self, note: Note) {
        self.notes.update(|m| {
            m.insert(note.id.clone(), note);
        });
    }

    pub fn remove_note(&self, note_id: &str) {
        self.notes.update(|m| {
            m.remove(note_id);
        });
        self.notes_by_notebook.update(|m| {
            for notes in m.values_mut() {
                notes.retain(|n| n.id != note_id);
            }
        });
    }

    pub fn note(&self, note_id: &str) -> Option<Note> {
        self.notes.with_untracked(|m| m.get(note_id).cloned())
    }

    /// Notes to list for a notebook; private notes stay hidden while the
    /// private space is locked.
    pub fn visible_notes(&self, notebook_id: &str, private_unlocked: bool) -> Vec<Note> {
        self.notes_by_notebook.with(|m| {
            m.get(notebook_id)
                .map(|notes| {
                    notes
                        .iter()
                        .filter(|n| private_unlocked || !n.is_private)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.last_error.set(Some(message.into()));
    }

    pub fn clear_error(&self) {
        self.last_error.set(None);
    }
}

impl Default for ReadCache {
    fn default() -> Self {
        Self::new()
    }
}
