//! In-process document store with push fan-out.
//!
//! Used for tests and offline demos. Besides the backend contract it can
//! simulate latency, injected failures and writes made by another device, and
//! it records every call so tests can assert on ordering.

use super::{NoteBackend, RemoteStream, WriteBatch, WriteOp};
use crate::error::{ApiError, ApiResult};
use crate::models::{
    NewNote, NewNotebook, Note, NoteRef, NotePatch, Notebook, NotebookPatch, UserSettings,
    DEFAULT_TITLE,
};
use crate::runtime;
use crate::util::{generate_id, now_ms};
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::{future, stream, StreamExt};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum BackendCall {
    ListNotebooks,
    CreateNotebook { notebook_id: String },
    UpdateNotebook { notebook_id: String, patch: NotebookPatch },
    ListNotes { notebook_id: String },
    FetchNote { note_id: String },
    CreateNote { note_id: String },
    UpdateNote { note: NoteRef, patch: NotePatch },
    SoftDeleteNote { note_id: String },
    RestoreNote { note_id: String },
    PermanentDeleteNote { note_id: String },
    CommitBatch { batch: WriteBatch },
    FetchSettings,
    SaveSettings { settings: UserSettings },
    SubscribeNote { note_id: String },
    SubscribeNotes { notebook_id: String },
    SubscribeNotebooks,
    SubscribeTrash,
}

#[derive(Default)]
struct Store {
    notebooks: BTreeMap<String, Notebook>,
    notes: BTreeMap<String, Note>,
    settings: Option<UserSettings>,
    clock: i64,

    latency: Duration,
    offline: bool,
    failures: VecDeque<ApiError>,
    calls: Vec<BackendCall>,

    note_subs: Vec<(String, UnboundedSender<ApiResult<Option<Note>>>)>,
    notebook_note_subs: Vec<(String, UnboundedSender<ApiResult<Vec<Note>>>)>,
    notebook_subs: Vec<UnboundedSender<ApiResult<Vec<Notebook>>>>,
    trash_subs: Vec<UnboundedSender<ApiResult<Vec<Note>>>>,
}

impl Store {
    fn tick(&mut self) -> i64 {
        self.clock = (self.clock + 1).max(now_ms());
        self.clock
    }

    fn notes_in(&self, notebook_id: &str) -> Vec<Note> {
        self.notes
            .values()
            .filter(|n| n.notebook_id == notebook_id)
            .cloned()
            .collect()
    }

    fn trash(&self) -> Vec<Note> {
        self.notes
            .values()
            .filter(|n| n.is_trashed())
            .cloned()
            .collect()
    }

    fn find_note(&self, note: &NoteRef) -> ApiResult<&Note> {
        self.notes
            .get(&note.note_id)
            .filter(|n| n.notebook_id == note.notebook_id)
            .ok_or_else(|| ApiError::not_found("note", &note.note_id))
    }

    fn find_note_mut(&mut self, note: &NoteRef) -> ApiResult<&mut Note> {
        self.notes
            .get_mut(&note.note_id)
            .filter(|n| n.notebook_id == note.notebook_id)
            .ok_or_else(|| ApiError::not_found("note", &note.note_id))
    }

    fn publish_note(&mut self, note_id: &str, notebook_id: &str) {
        let current = self.notes.get(note_id).cloned();
        self.note_subs.retain(|(id, tx)| {
            id.as_str() != note_id || tx.unbounded_send(Ok(current.clone())).is_ok()
        });

        let listing = self.notes_in(notebook_id);
        self.notebook_note_subs.retain(|(id, tx)| {
            id.as_str() != notebook_id || tx.unbounded_send(Ok(listing.clone())).is_ok()
        });

        let trash = self.trash();
        self.trash_subs
            .retain(|tx| tx.unbounded_send(Ok(trash.clone())).is_ok());
    }

    fn publish_notebooks(&mut self) {
        let all: Vec<Notebook> = self.notebooks.values().cloned().collect();
        self.notebook_subs
            .retain(|tx| tx.unbounded_send(Ok(all.clone())).is_ok());
    }

    fn check_op(&self, op: &WriteOp) -> ApiResult<()> {
        match op {
            WriteOp::SetNotebookDeleted { notebook_id, .. }
            | WriteOp::DeleteNotebook { notebook_id } => {
                if !self.notebooks.contains_key(notebook_id) {
                    return Err(ApiError::not_found("notebook", notebook_id));
                }
            }
            WriteOp::SetNoteDeleted { note, .. } | WriteOp::DeleteNote { note } => {
                self.find_note(note)?;
            }
        }
        Ok(())
    }

    fn apply_op(&mut self, op: WriteOp) {
        let now = self.tick();
        match op {
            WriteOp::SetNotebookDeleted {
                notebook_id,
                deleted_ms,
            } => {
                if let Some(nb) = self.notebooks.get_mut(&notebook_id) {
                    nb.deleted_ms = deleted_ms;
                    nb.updated_ms = now;
                }
                self.publish_notebooks();
            }
            WriteOp::DeleteNotebook { notebook_id } => {
                self.notebooks.remove(&notebook_id);
                self.publish_notebooks();
            }
            WriteOp::SetNoteDeleted { note, deleted_ms } => {
                if let Some(n) = self.notes.get_mut(&note.note_id) {
                    n.deleted_ms = deleted_ms;
                    n.updated_ms = now;
                }
                self.publish_note(&note.note_id, &note.notebook_id);
            }
            WriteOp::DeleteNote { note } => {
                self.notes.remove(&note.note_id);
                self.publish_note(&note.note_id, &note.notebook_id);
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    store: Rc<RefCell<Store>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call waits this long before touching the store.
    pub fn set_latency(&self, latency: Duration) {
        self.store.borrow_mut().latency = latency;
    }

    /// While offline every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.store.borrow_mut().offline = offline;
    }

    /// The next mutating call fails with `error` instead of writing.
    pub fn fail_next(&self, error: ApiError) {
        self.store.borrow_mut().failures.push_back(error);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.store.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.store.borrow_mut().calls.clear();
    }

    /// `(note_id, patch)` of every update call, in call order.
    pub fn note_updates(&self) -> Vec<(String, NotePatch)> {
        self.store
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::UpdateNote { note, patch } => {
                    Some((note.note_id.clone(), patch.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Subscriptions whose stream has not been dropped.
    pub fn subscriber_count(&self) -> usize {
        let st = self.store.borrow();
        st.note_subs.iter().filter(|(_, tx)| !tx.is_closed()).count()
            + st.notebook_note_subs
                .iter()
                .filter(|(_, tx)| !tx.is_closed())
                .count()
            + st.notebook_subs.iter().filter(|tx| !tx.is_closed()).count()
            + st.trash_subs.iter().filter(|tx| !tx.is_closed()).count()
    }

    pub fn note(&self, note_id: &str) -> Option<Note> {
        self.store.borrow().notes.get(note_id).cloned()
    }

    pub fn notebook(&self, notebook_id: &str) -> Option<Notebook> {
        self.store.borrow().notebooks.get(notebook_id).cloned()
    }

    pub fn settings(&self) -> Option<UserSettings> {
        self.store.borrow().settings.clone()
    }

    /// Settings saved by another device.
    pub fn set_remote_settings(&self, settings: UserSettings) {
        self.store.borrow_mut().settings = Some(settings);
    }

    pub fn insert_notebook(&self, notebook: Notebook) {
        let mut st = self.store.borrow_mut();
        st.notebooks.insert(notebook.id.clone(), notebook);
        st.publish_notebooks();
    }

    /// A write made by another device: stored and pushed without being logged
    /// as a call from this client.
    pub fn push_remote_note(&self, note: Note) {
        let mut st = self.store.borrow_mut();
        let (id, notebook_id) = (note.id.clone(), note.notebook_id.clone());
        st.notes.insert(id.clone(), note);
        st.publish_note(&id, &notebook_id);
    }

    /// Another device permanently deleted the note.
    pub fn remove_remote_note(&self, note_id: &str) {
        let mut st = self.store.borrow_mut();
        if let Some(note) = st.notes.remove(note_id) {
            st.publish_note(note_id, &note.notebook_id);
        }
    }

    /// Delivers `note` to subscribers of its id without storing it. Simulates a
    /// late or out-of-order push.
    pub fn deliver_note_event(&self, note: Note) {
        let mut st = self.store.borrow_mut();
        let id = note.id.clone();
        st.note_subs.retain(|(sub_id, tx)| {
            *sub_id != id || tx.unbounded_send(Ok(Some(note.clone()))).is_ok()
        });
    }

    /// Fails every subscription on `note_id` with `error`, leaving it open.
    pub fn emit_note_error(&self, note_id: &str, error: ApiError) {
        let mut st = self.store.borrow_mut();
        st.note_subs.retain(|(id, tx)| {
            id.as_str() != note_id || tx.unbounded_send(Err(error.clone())).is_ok()
        });
    }

    async fn begin(&self, call: BackendCall, mutating: bool) -> ApiResult<()> {
        let latency = {
            let mut st = self.store.borrow_mut();
            st.calls.push(call);
            st.latency
        };
        if !latency.is_zero() {
            runtime::sleep(latency).await;
        }

        let mut st = self.store.borrow_mut();
        if st.offline {
            return Err(ApiError::network("backend unreachable"));
        }
        if mutating {
            if let Some(error) = st.failures.pop_front() {
                return Err(error);
            }
        }
        Ok(())
    }

    /// The snapshot is taken now but, like the rest of the traffic, only
    /// arrives after the configured latency.
    fn register<T: 'static>(
        subs: impl FnOnce(&mut Store, UnboundedSender<ApiResult<T>>),
        store: &Rc<RefCell<Store>>,
    ) -> RemoteStream<T> {
        let (tx, rx) = unbounded();
        let latency = {
            let mut st = store.borrow_mut();
            subs(&mut *st, tx);
            st.latency
        };
        if latency.is_zero() {
            return rx.boxed_local();
        }
        stream::once(runtime::sleep(latency))
            .filter_map(|()| future::ready(None::<ApiResult<T>>))
            .chain(rx)
            .boxed_local()
    }
}

impl NoteBackend for MemoryBackend {
    async fn list_notebooks(&self) -> ApiResult<Vec<Notebook>> {
        self.begin(BackendCall::ListNotebooks, false).await?;
        Ok(self.store.borrow().notebooks.values().cloned().collect())
    }

    async fn create_notebook(&self, new: NewNotebook) -> ApiResult<Notebook> {
        let id = generate_id();
        self.begin(
            BackendCall::CreateNotebook {
                notebook_id: id.clone(),
            },
            true,
        )
        .await?;

        let mut st = self.store.borrow_mut();
        if let Some(parent) = &new.parent_id {
            if !st.notebooks.contains_key(parent) {
                return Err(ApiError::not_found("notebook", parent));
            }
        }
        let now = st.tick();
        let title = if new.title.trim().is_empty() {
            DEFAULT_TITLE.to_string()
        } else {
            new.title
        };
        let notebook = Notebook {
            id: id.clone(),
            title,
            parent_id: new.parent_id,
            created_ms: now,
            updated_ms: now,
            deleted_ms: None,
        };
        st.notebooks.insert(id, notebook.clone());
        st.publish_notebooks();
        Ok(notebook)
    }

    async fn update_notebook(&self, notebook_id: &str, patch: NotebookPatch) -> ApiResult<()> {
        self.begin(
            BackendCall::UpdateNotebook {
                notebook_id: notebook_id.to_string(),
                patch: patch.clone(),
            },
            true,
        )
        .await?;

        let mut st = self.store.borrow_mut();
        let now = st.tick();
        let notebook = st
            .notebooks
            .get_mut(notebook_id)
            .ok_or_else(|| ApiError::not_found("notebook", notebook_id))?;
        if let Some(title) = patch.title {
            notebook.title = title;
        }
        if let Some(parent_id) = patch.parent_id {
            notebook.parent_id = parent_id;
        }
        notebook.updated_ms = now;
        st.publish_notebooks();
        Ok(())
    }

    async fn list_notes(&self, notebook_id: &str) -> ApiResult<Vec<Note>> {
        self.begin(
            BackendCall::ListNotes {
                notebook_id: notebook_id.to_string(),
            },
            false,
        )
        .await?;
        Ok(self.store.borrow().notes_in(notebook_id))
    }

    async fn fetch_note(&self, note: &NoteRef) -> ApiResult<Option<Note>> {
        self.begin(
            BackendCall::FetchNote {
                note_id: note.note_id.clone(),
            },
            false,
        )
        .await?;
        Ok(self.store.borrow().find_note(note).ok().cloned())
    }

    async fn create_note(&self, new: NewNote) -> ApiResult<Note> {
        let id = generate_id();
        self.begin(
            BackendCall::CreateNote {
                note_id: id.clone(),
            },
            true,
        )
        .await?;

        let mut st = self.store.borrow_mut();
        if !st.notebooks.contains_key(&new.notebook_id) {
            return Err(ApiError::not_found("notebook", &new.notebook_id));
        }
        let now = st.tick();
        let note = Note {
            id: id.clone(),
            notebook_id: new.notebook_id,
            title: new.title,
            content: new.content,
            created_ms: now,
            updated_ms: now,
            deleted_ms: None,
            is_private: false,
        };
        let notebook_id = note.notebook_id.clone();
        st.notes.insert(id.clone(), note.clone());
        st.publish_note(&id, &notebook_id);
        Ok(note)
    }

    async fn update_note(&self, note: &NoteRef, patch: NotePatch) -> ApiResult<()> {
        self.begin(
            BackendCall::UpdateNote {
                note: note.clone(),
                patch: patch.clone(),
            },
            true,
        )
        .await?;

        let mut st = self.store.borrow_mut();
        let now = st.tick();
        let stored = st.find_note_mut(note)?;
        patch.apply_to(stored);
        stored.updated_ms = now;
        st.publish_note(&note.note_id, &note.notebook_id);
        Ok(())
    }

    async fn soft_delete_note(&self, note: &NoteRef) -> ApiResult<()> {
        self.begin(
            BackendCall::SoftDeleteNote {
                note_id: note.note_id.clone(),
            },
            true,
        )
        .await?;

        let mut st = self.store.borrow_mut();
        let now = st.tick();
        st.find_note_mut(note)?.deleted_ms = Some(now);
        st.publish_note(&note.note_id, &note.notebook_id);
        Ok(())
    }

    async fn restore_note(&self, note: &NoteRef) -> ApiResult<()> {
        self.begin(
            BackendCall::RestoreNote {
                note_id: note.note_id.clone(),
            },
            true,
        )
        .await?;

        let mut st = self.store.borrow_mut();
        st.find_note_mut(note)?.deleted_ms = None;
        st.publish_note(&note.note_id, &note.notebook_id);
        Ok(())
    }

    async fn permanent_delete_note(&self, note: &NoteRef) -> ApiResult<()> {
        self.begin(
            BackendCall::PermanentDeleteNote {
                note_id: note.note_id.clone(),
            },
            true,
        )
        .await?;

        let mut st = self.store.borrow_mut();
        st.find_note(note)?;
        st.notes.remove(&note.note_id);
        st.publish_note(&note.note_id, &note.notebook_id);
        Ok(())
    }

    async fn commit_batch(&self, batch: WriteBatch) -> ApiResult<()> {
        self.begin(
            BackendCall::CommitBatch {
                batch: batch.clone(),
            },
            true,
        )
        .await?;

        let mut st = self.store.borrow_mut();
        for op in &batch.ops {
            st.check_op(op)?;
        }
        for op in batch.ops {
            st.apply_op(op);
        }
        Ok(())
    }

    async fn fetch_settings(&self) -> ApiResult<Option<UserSettings>> {
        self.begin(BackendCall::FetchSettings, false).await?;
        Ok(self.store.borrow().settings.clone())
    }

    async fn save_settings(&self, settings: &UserSettings) -> ApiResult<()> {
        self.begin(
            BackendCall::SaveSettings {
                settings: settings.clone(),
            },
            true,
        )
        .await?;
        self.store.borrow_mut().settings = Some(settings.clone());
        Ok(())
    }

    fn subscribe_note(&self, note: &NoteRef) -> RemoteStream<Option<Note>> {
        let note = note.clone();
        Self::register(
            |st, tx| {
                st.calls.push(BackendCall::SubscribeNote {
                    note_id: note.note_id.clone(),
                });
                let current = st.find_note(&note).ok().cloned();
                if tx.unbounded_send(Ok(current)).is_ok() {
                    st.note_subs.push((note.note_id.clone(), tx));
                }
            },
            &self.store,
        )
    }

    fn subscribe_notes(&self, notebook_id: &str) -> RemoteStream<Vec<Note>> {
        let notebook_id = notebook_id.to_string();
        Self::register(
            |st, tx| {
                st.calls.push(BackendCall::SubscribeNotes {
                    notebook_id: notebook_id.clone(),
                });
                if tx.unbounded_send(Ok(st.notes_in(&notebook_id))).is_ok() {
                    st.notebook_note_subs.push((notebook_id, tx));
                }
            },
            &self.store,
        )
    }

    fn subscribe_notebooks(&self) -> RemoteStream<Vec<Notebook>> {
        Self::register(
            |st, tx| {
                st.calls.push(BackendCall::SubscribeNotebooks);
                let all: Vec<Notebook> = st.notebooks.values().cloned().collect();
                if tx.unbounded_send(Ok(all)).is_ok() {
                    st.notebook_subs.push(tx);
                }
            },
            &self.store,
        )
    }

    fn subscribe_trash(&self) -> RemoteStream<Vec<Note>> {
        Self::register(
            |st, tx| {
                st.calls.push(BackendCall::SubscribeTrash);
                if tx.unbounded_send(Ok(st.trash())).is_ok() {
                    st.trash_subs.push(tx);
                }
            },
            &self.store,
        )
    }
}
