//! Notebook and note lifecycle operations outside the edit buffer: creation,
//! renames, moves, trash, restore and permanent deletion.
//!
//! Notebook cascades run in two phases. The collect phase walks the tree and
//! gathers every affected notebook and note into a [`CascadePlan`]; the apply
//! phase turns the plan into one [`WriteBatch`] and commits it in a single call.

use crate::backend::{NoteBackend, WriteBatch, WriteOp};
use crate::cache::ReadCache;
use crate::config::SyncConfig;
use crate::error::{ApiResult, SyncError, SyncResult, TreeError, ValidationError};
use crate::models::{
    empty_content, validate_title, NewNote, NewNotebook, Note, NotePatch, NoteRef, Notebook,
    NotebookPatch, DEFAULT_TITLE,
};
use crate::state::Connectivity;
use crate::tree::{check_reparent, subtree_ids, ChildrenIndex};
use crate::util::{is_blank, now_ms};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CascadeKind {
    SoftDelete { at_ms: i64 },
    Restore,
    PermanentDelete,
}

/// Everything a notebook cascade touches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CascadePlan {
    /// Root first, then descendants in pre-order.
    pub notebook_ids: Vec<String>,
    /// Notes of each notebook, keyed by notebook id.
    pub notes: HashMap<String, Vec<NoteRef>>,
}

impl CascadePlan {
    pub fn note_refs(&self) -> impl Iterator<Item = &NoteRef> {
        self.notebook_ids
            .iter()
            .filter_map(|id| self.notes.get(id))
            .flatten()
    }

    /// Soft delete and restore walk top-down, touching each notebook before
    /// its notes. Permanent deletion walks bottom-up and removes a notebook's
    /// notes before the notebook itself.
    pub fn to_batch(&self, kind: CascadeKind) -> WriteBatch {
        let mut batch = WriteBatch::default();
        let no_notes = Vec::new();

        match kind {
            CascadeKind::SoftDelete { .. } | CascadeKind::Restore => {
                let deleted_ms = match kind {
                    CascadeKind::SoftDelete { at_ms } => Some(at_ms),
                    _ => None,
                };
                for id in &self.notebook_ids {
                    batch.push(WriteOp::SetNotebookDeleted {
                        notebook_id: id.clone(),
                        deleted_ms,
                    });
                    for note in self.notes.get(id).unwrap_or(&no_notes) {
                        batch.push(WriteOp::SetNoteDeleted {
                            note: note.clone(),
                            deleted_ms,
                        });
                    }
                }
            }
            CascadeKind::PermanentDelete => {
                for id in self.notebook_ids.iter().rev() {
                    for note in self.notes.get(id).unwrap_or(&no_notes) {
                        batch.push(WriteOp::DeleteNote { note: note.clone() });
                    }
                    batch.push(WriteOp::DeleteNotebook {
                        notebook_id: id.clone(),
                    });
                }
            }
        }
        batch
    }
}

/// Collect phase without I/O: the subtree under `root` and the notes of every
/// notebook in it, taken from `notes` (keyed by notebook id).
pub fn plan_cascade(
    root: &str,
    notebooks: &[Notebook],
    notes: &HashMap<String, Vec<Note>>,
) -> CascadePlan {
    let index = ChildrenIndex::build(notebooks);
    let notebook_ids = subtree_ids(root, &index);
    let notes: HashMap<String, Vec<NoteRef>> = notebook_ids
        .iter()
        .map(|id| {
            let refs: Vec<NoteRef> = notes
                .get(id)
                .map(|ns| ns.iter().map(Note::note_ref).collect())
                .unwrap_or_default();
            (id.clone(), refs)
        })
        .collect();
    CascadePlan {
        notebook_ids,
        notes,
    }
}

pub struct Library<B> {
    backend: B,
    config: SyncConfig,
    cache: ReadCache,
    connectivity: Connectivity,
}

impl<B: NoteBackend> Library<B> {
    pub fn new(backend: B, config: SyncConfig, cache: ReadCache, connectivity: Connectivity) -> Self {
        Self {
            backend,
            config,
            cache,
            connectivity,
        }
    }

    fn track<T>(&self, result: ApiResult<T>) -> SyncResult<T> {
        match &result {
            Ok(_) => self.connectivity.mark_backend_online(),
            Err(e) => self.connectivity.mark_backend_offline_api(e),
        }
        result.map_err(SyncError::from)
    }

    fn title_or_default(&self, title: Option<&str>) -> SyncResult<String> {
        match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => {
                validate_title(t, &self.config)?;
                Ok(t.to_string())
            }
            None => Ok(DEFAULT_TITLE.to_string()),
        }
    }

    pub async fn create_notebook(
        &self,
        title: Option<&str>,
        parent_id: Option<&str>,
    ) -> SyncResult<Notebook> {
        let new = NewNotebook {
            title: self.title_or_default(title)?,
            parent_id: parent_id.map(str::to_string),
        };
        let notebook = self.track(self.backend.create_notebook(new).await)?;
        tracing::info!(notebook_id = %notebook.id, "notebook created");
        Ok(notebook)
    }

    /// A blank title leaves the notebook unchanged and returns `false`.
    pub async fn rename_notebook(&self, notebook_id: &str, title: &str) -> SyncResult<bool> {
        let title = title.trim();
        if title.is_empty() {
            return Ok(false);
        }
        validate_title(title, &self.config)?;
        let patch = NotebookPatch {
            title: Some(title.to_string()),
            parent_id: None,
        };
        self.track(self.backend.update_notebook(notebook_id, patch).await)?;
        Ok(true)
    }

    /// Moves a notebook under `new_parent`, or to the root for `None`. Refused
    /// if the target is the notebook itself or one of its descendants.
    pub async fn move_notebook(&self, notebook_id: &str, new_parent: Option<&str>) -> SyncResult<()> {
        let notebooks = self.track(self.backend.list_notebooks().await)?;
        let index = ChildrenIndex::build(&notebooks);
        check_reparent(notebook_id, new_parent, &index)?;

        let patch = NotebookPatch {
            title: None,
            parent_id: Some(new_parent.map(str::to_string)),
        };
        self.track(self.backend.update_notebook(notebook_id, patch).await)?;
        tracing::info!(notebook_id, parent = ?new_parent, "notebook moved");
        Ok(())
    }

    /// Collect phase against the backend.
    pub async fn collect_cascade(&self, root: &str) -> SyncResult<CascadePlan> {
        if is_blank(root) {
            return Err(ValidationError::MissingId("notebook").into());
        }
        let notebooks = self.track(self.backend.list_notebooks().await)?;
        if !notebooks.iter().any(|nb| nb.id == root) {
            return Err(TreeError::UnknownNotebook {
                id: root.to_string(),
            }
            .into());
        }

        let index = ChildrenIndex::build(&notebooks);
        let mut notes = HashMap::new();
        for id in subtree_ids(root, &index) {
            let listed = self.track(self.backend.list_notes(&id).await)?;
            notes.insert(id, listed);
        }
        Ok(plan_cascade(root, &notebooks, &notes))
    }

    async fn cascade(&self, root: &str, kind: CascadeKind) -> SyncResult<CascadePlan> {
        let plan = self.collect_cascade(root).await?;
        let batch = plan.to_batch(kind);
        let ops = batch.len();
        self.track(self.backend.commit_batch(batch).await)?;
        tracing::info!(
            notebook_id = root,
            ?kind,
            notebooks = plan.notebook_ids.len(),
            ops,
            "notebook cascade committed"
        );
        Ok(plan)
    }

    /// Trashes the notebook, its descendants and all of their notes.
    pub async fn soft_delete_notebook(&self, notebook_id: &str) -> SyncResult<CascadePlan> {
        self.cascade(notebook_id, CascadeKind::SoftDelete { at_ms: now_ms() })
            .await
    }

    pub async fn restore_notebook(&self, notebook_id: &str) -> SyncResult<CascadePlan> {
        self.cascade(notebook_id, CascadeKind::Restore).await
    }

    /// Returns the plan so callers can discard the deleted notes from any open
    /// session and UI state.
    pub async fn permanently_delete_notebook(&self, notebook_id: &str) -> SyncResult<CascadePlan> {
        let plan = self.cascade(notebook_id, CascadeKind::PermanentDelete).await?;
        for note in plan.note_refs() {
            self.cache.remove_note(&note.note_id);
        }
        Ok(plan)
    }

    pub async fn create_note(&self, notebook_id: &str, title: Option<&str>) -> SyncResult<Note> {
        if is_blank(notebook_id) {
            return Err(ValidationError::MissingId("notebook").into());
        }
        let new = NewNote {
            notebook_id: notebook_id.to_string(),
            title: self.title_or_default(title)?,
            content: empty_content(),
        };
        let note = self.track(self.backend.create_note(new).await)?;
        self.cache.put_note(note.clone());
        tracing::info!(note_id = %note.id, notebook_id, "note created");
        Ok(note)
    }

    pub async fn soft_delete_note(&self, note: &NoteRef) -> SyncResult<()> {
        note.validate()?;
        self.track(self.backend.soft_delete_note(note).await)
    }

    pub async fn restore_note(&self, note: &NoteRef) -> SyncResult<()> {
        note.validate()?;
        self.track(self.backend.restore_note(note).await)
    }

    pub async fn permanently_delete_note(&self, note: &NoteRef) -> SyncResult<()> {
        note.validate()?;
        self.track(self.backend.permanent_delete_note(note).await)?;
        self.cache.remove_note(&note.note_id);
        Ok(())
    }

    pub async fn set_note_private(&self, note: &NoteRef, is_private: bool) -> SyncResult<()> {
        note.validate()?;
        let patch = NotePatch {
            is_private: Some(is_private),
            ..Default::default()
        };
        self.track(self.backend.update_note(note, patch).await)
    }
}
