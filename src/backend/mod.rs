//! The persistence/sync backend seam.
//!
//! Every operation is an opaque async call that may fail, and completion order
//! across calls is not guaranteed. Subscriptions are streams: the first item is
//! the current value, later items follow remote changes, and dropping the
//! stream unsubscribes.

pub mod memory;

use crate::error::ApiResult;
use crate::models::{
    NewNote, NewNotebook, Note, NoteRef, NotePatch, Notebook, NotebookPatch, UserSettings,
};
use futures_util::stream::LocalBoxStream;
use serde::{Deserialize, Serialize};
use std::future::Future;

pub type RemoteStream<T> = LocalBoxStream<'static, ApiResult<T>>;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    SetNotebookDeleted {
        notebook_id: String,
        deleted_ms: Option<i64>,
    },
    SetNoteDeleted {
        note: NoteRef,
        deleted_ms: Option<i64>,
    },
    DeleteNote {
        note: NoteRef,
    },
    DeleteNotebook {
        notebook_id: String,
    },
}

/// Applied atomically: either every op lands or none does.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub trait NoteBackend {
    /// Every notebook, trashed ones included.
    fn list_notebooks(&self) -> impl Future<Output = ApiResult<Vec<Notebook>>>;
    fn create_notebook(&self, new: NewNotebook) -> impl Future<Output = ApiResult<Notebook>>;
    fn update_notebook(
        &self,
        notebook_id: &str,
        patch: NotebookPatch,
    ) -> impl Future<Output = ApiResult<()>>;

    /// Every note of a notebook, trashed ones included.
    fn list_notes(&self, notebook_id: &str) -> impl Future<Output = ApiResult<Vec<Note>>>;
    fn fetch_note(&self, note: &NoteRef) -> impl Future<Output = ApiResult<Option<Note>>>;
    fn create_note(&self, new: NewNote) -> impl Future<Output = ApiResult<Note>>;
    fn update_note(&self, note: &NoteRef, patch: NotePatch)
        -> impl Future<Output = ApiResult<()>>;
    fn soft_delete_note(&self, note: &NoteRef) -> impl Future<Output = ApiResult<()>>;
    fn restore_note(&self, note: &NoteRef) -> impl Future<Output = ApiResult<()>>;
    fn permanent_delete_note(&self, note: &NoteRef) -> impl Future<Output = ApiResult<()>>;
    fn commit_batch(&self, batch: WriteBatch) -> impl Future<Output = ApiResult<()>>;

    /// `None` when the account never saved any.
    fn fetch_settings(&self) -> impl Future<Output = ApiResult<Option<UserSettings>>>;
    fn save_settings(&self, settings: &UserSettings) -> impl Future<Output = ApiResult<()>>;

    /// `None` once the note no longer exists.
    fn subscribe_note(&self, note: &NoteRef) -> RemoteStream<Option<Note>>;
    /// Every note of the notebook on each change, trashed ones included.
    fn subscribe_notes(&self, notebook_id: &str) -> RemoteStream<Vec<Note>>;
    fn subscribe_notebooks(&self) -> RemoteStream<Vec<Notebook>>;
    /// Every trashed note across notebooks.
    fn subscribe_trash(&self) -> RemoteStream<Vec<Note>>;
}
