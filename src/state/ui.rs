use crate::models::{NoteRef, UserSettings};
use crate::storage::{load_json, save_json, SnapshotStore, UI_STATE_KEY};
use leptos::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub use crate::models::ThemeColor;

/// The persisted part of the UI state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct UiSnapshot {
    pub sidebar_open: bool,
    pub selected_notebook_id: Option<String>,
    pub selected_note: Option<NoteRef>,
    pub dark_mode: bool,
    pub theme_color: ThemeColor,
    pub expanded_notebooks: BTreeSet<String>,
}

impl Default for UiSnapshot {
    fn default() -> Self {
        Self {
            sidebar_open: true,
            selected_notebook_id: None,
            selected_note: None,
            dark_mode: true,
            theme_color: ThemeColor::default(),
            expanded_notebooks: BTreeSet::new(),
        }
    }
}

/// Per-device UI state, passed explicitly to whoever needs it.
#[derive(Clone, Copy)]
pub struct UiStore {
    pub sidebar_open: RwSignal<bool>,
    pub selected_notebook_id: RwSignal<Option<String>>,
    pub selected_note: RwSignal<Option<NoteRef>>,
    pub dark_mode: RwSignal<bool>,
    pub theme_color: RwSignal<ThemeColor>,
    pub expanded_notebooks: RwSignal<BTreeSet<String>>,
    /// Session only, never persisted.
    pub private_unlocked: RwSignal<bool>,
}

impl UiStore {
    pub fn new(initial: UiSnapshot) -> Self {
        Self {
            sidebar_open: RwSignal::new(initial.sidebar_open),
            selected_notebook_id: RwSignal::new(initial.selected_notebook_id),
            selected_note: RwSignal::new(initial.selected_note),
            dark_mode: RwSignal::new(initial.dark_mode),
            theme_color: RwSignal::new(initial.theme_color),
            expanded_notebooks: RwSignal::new(initial.expanded_notebooks),
            private_unlocked: RwSignal::new(false),
        }
    }

    pub fn load(store: &dyn SnapshotStore) -> Self {
        Self::new(load_json(store, UI_STATE_KEY).unwrap_or_default())
    }

    pub fn persist(&self, store: &dyn SnapshotStore) {
        save_json(store, UI_STATE_KEY, &self.snapshot());
    }

    pub fn snapshot(&self) -> UiSnapshot {
        UiSnapshot {
            sidebar_open: self.sidebar_open.get_untracked(),
            selected_notebook_id: self.selected_notebook_id.get_untracked(),
            selected_note: self.selected_note.get_untracked(),
            dark_mode: self.dark_mode.get_untracked(),
            theme_color: self.theme_color.get_untracked(),
            expanded_notebooks: self.expanded_notebooks.get_untracked(),
        }
    }

    pub fn restore(&self, snapshot: UiSnapshot) {
        self.sidebar_open.set(snapshot.sidebar_open);
        self.selected_notebook_id.set(snapshot.selected_notebook_id);
        self.selected_note.set(snapshot.selected_note);
        self.dark_mode.set(snapshot.dark_mode);
        self.theme_color.set(snapshot.theme_color);
        self.expanded_notebooks.set(snapshot.expanded_notebooks);
    }

    /// The account-wide part of the UI state.
    pub fn settings(&self) -> UserSettings {
        UserSettings {
            dark_mode: self.dark_mode.get_untracked(),
            theme_color: self.theme_color.get_untracked(),
        }
    }

    pub fn apply_settings(&self, settings: &UserSettings) {
        self.dark_mode.set(settings.dark_mode);
        self.theme_color.set(settings.theme_color);
    }

    pub fn toggle_sidebar(&self) {
        self.sidebar_open.update(|open| *open = !*open);
    }

    pub fn toggle_dark_mode(&self) {
        self.dark_mode.update(|dark| *dark = !*dark);
    }

    /// Changing notebooks closes whatever note was open.
    pub fn select_notebook(&self, notebook_id: Option<String>) {
        self.selected_notebook_id.set(notebook_id);
        self.selected_note.set(None);
    }

    pub fn select_note(&self, note: Option<NoteRef>) {
        self.selected_note.set(note);
    }

    pub fn set_expanded(&self, notebook_id: &str, expanded: bool) {
        self.expanded_notebooks.update(|ids| {
            if expanded {
                ids.insert(notebook_id.to_string());
            } else {
                ids.remove(notebook_id);
            }
        });
    }

    pub fn toggle_expanded(&self, notebook_id: &str) {
        let expanded = self
            .expanded_notebooks
            .with_untracked(|ids| ids.contains(notebook_id));
        self.set_expanded(notebook_id, !expanded);
    }

    pub fn unlock_private(&self) {
        self.private_unlocked.set(true);
    }

    pub fn lock_private(&self) {
        self.private_unlocked.set(false);
    }

    /// Drops references to notebooks that no longer exist.
    pub fn forget_notebooks(&self, removed: &[String]) {
        self.expanded_notebooks.update(|ids| {
            for id in removed {
                ids.remove(id);
            }
        });
        let selected_removed = self
            .selected_notebook_id
            .with_untracked(|sel| sel.as_ref().is_some_and(|id| removed.contains(id)));
        if selected_removed {
            self.select_notebook(None);
        }
    }
}

impl Default for UiStore {
    fn default() -> Self {
        Self::new(UiSnapshot::default())
    }
}
