use crate::backend::NoteBackend;
use crate::cache::ReadCache;
use crate::config::SyncConfig;
use crate::debounce::Debouncer;
use crate::drafts::{CachedNote, DirtyTracker, NoteEdit, NoteField};
use crate::error::{ApiError, SyncError, SyncResult};
use crate::listener::{NoteSink, RemoteSyncListener};
use crate::models::{validate_content, validate_title, Note, NoteContent, NotePatch, NoteRef};
use crate::state::Connectivity;
use leptos::prelude::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing selected, or the selected note turned out not to exist.
    Empty,
    /// Selected, waiting for the first server value.
    Loading,
    Synced,
    /// The buffer holds edits no save has confirmed yet.
    Dirty,
    /// A save for the selected note is on the wire.
    Saving,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveIndicator {
    Saved,
    Saving,
    Offline,
}

/// Outcome of offering a remote value to the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconcile {
    /// The buffer was populated from the remote value.
    Applied,
    /// The buffer was populated from locally cached edits; the remote value
    /// only filled fields that were never edited here.
    Restored,
    NotSelected,
    /// The buffer already completed its first sync for this selection.
    AlreadyLoaded,
    SaveInFlight,
    /// The note carries unconfirmed local edits.
    Dirty,
}

/// The editable copy of the selected note.
#[derive(Clone, Debug, PartialEq)]
pub struct EditBuffer {
    pub note: NoteRef,
    pub title: String,
    pub content: NoteContent,
    pub deleted_ms: Option<i64>,
    pub is_private: bool,
    pub updated_ms: i64,
}

impl EditBuffer {
    fn from_remote(remote: Note, cached: Option<CachedNote>) -> Self {
        let cached = cached.unwrap_or_default();
        Self {
            note: remote.note_ref(),
            title: cached.title.unwrap_or(remote.title),
            content: cached.content.unwrap_or(remote.content),
            deleted_ms: remote.deleted_ms,
            is_private: remote.is_private,
            updated_ms: remote.updated_ms,
        }
    }

    fn refresh_meta(&mut self, remote: &Note) {
        self.deleted_ms = remote.deleted_ms;
        self.is_private = remote.is_private;
        self.updated_ms = remote.updated_ms;
    }

    pub fn is_trashed(&self) -> bool {
        self.deleted_ms.is_some()
    }
}

/// A debounced write: targets one specific note, whatever is selected by the
/// time it runs.
#[derive(Clone, Debug)]
struct SaveRequest<T> {
    note: NoteRef,
    value: T,
    revision: u64,
}

#[derive(Default)]
struct ActiveSlot {
    selected: Option<NoteRef>,
    buffer: Option<EditBuffer>,
    loading: bool,
    /// The buffer's trash marker and privacy came from the server for this
    /// selection, not from cached edits.
    meta_confirmed: bool,
    /// Bumped on every selection; a select that finds it changed was superseded.
    seq: u64,
}

struct SessionCore<B> {
    backend: B,
    config: SyncConfig,
    cache: ReadCache,
    connectivity: Connectivity,
    tracker: RefCell<DirtyTracker>,
    /// Saves on the wire, per note id.
    saving: RefCell<HashMap<String, usize>>,
    slot: RefCell<ActiveSlot>,
    status: RwSignal<SessionState>,
    editor_key: RwSignal<u64>,
}

impl<B: NoteBackend + 'static> SessionCore<B> {
    fn is_current(&self, seq: u64) -> bool {
        self.slot.borrow().seq == seq
    }

    fn is_saving(&self, note_id: &str) -> bool {
        self.saving.borrow().get(note_id).is_some_and(|n| *n > 0)
    }

    fn selected_id(&self) -> Option<String> {
        self.slot
            .borrow()
            .selected
            .as_ref()
            .map(|n| n.note_id.clone())
    }

    fn derive_state(&self) -> SessionState {
        let slot = self.slot.borrow();
        let Some(selected) = slot.selected.as_ref() else {
            return SessionState::Empty;
        };
        if slot.buffer.is_none() {
            return if slot.loading {
                SessionState::Loading
            } else {
                SessionState::Empty
            };
        }
        if self.is_saving(&selected.note_id) {
            SessionState::Saving
        } else if self.tracker.borrow().has_unsaved(&selected.note_id) {
            SessionState::Dirty
        } else {
            SessionState::Synced
        }
    }

    fn refresh_status(&self) {
        let next = self.derive_state();
        if self.status.get_untracked() != next {
            self.status.set(next);
        }
    }

    fn populate(&self, slot: &mut ActiveSlot, buffer: EditBuffer, meta_confirmed: bool) {
        slot.buffer = Some(buffer);
        slot.loading = false;
        slot.meta_confirmed = meta_confirmed;
        // The editor only reads its initial content at mount.
        self.editor_key.update(|k| *k += 1);
    }

    /// The selected note, if its buffer may be edited. A buffer restored from
    /// cached edits stays read-only until the server has said whether the
    /// note is trashed.
    fn editable_note(&self) -> SyncResult<NoteRef> {
        let slot = self.slot.borrow();
        let buffer = slot.buffer.as_ref().ok_or(SyncError::NotLoaded)?;
        if !slot.meta_confirmed {
            return Err(SyncError::NotLoaded);
        }
        if buffer.is_trashed() {
            return Err(SyncError::ReadOnly {
                note_id: buffer.note.note_id.clone(),
            });
        }
        Ok(buffer.note.clone())
    }

    fn offer_remote(&self, remote: Note) -> Reconcile {
        let note_id = remote.id.clone();
        let outcome = self.reconcile(remote);
        match outcome {
            Reconcile::Applied | Reconcile::Restored => {
                tracing::debug!(note_id = %note_id, ?outcome, "buffer populated from remote")
            }
            _ => tracing::debug!(note_id = %note_id, ?outcome, "remote value kept out of buffer"),
        }
        self.refresh_status();
        outcome
    }

    fn reconcile(&self, remote: Note) -> Reconcile {
        let mut slot = self.slot.borrow_mut();
        let is_selected = slot
            .selected
            .as_ref()
            .is_some_and(|s| s.note_id == remote.id);
        if !is_selected {
            return Reconcile::NotSelected;
        }

        // Trash marker and privacy follow the server no matter what.
        if let Some(buffer) = slot.buffer.as_mut() {
            buffer.refresh_meta(&remote);
            slot.meta_confirmed = true;
            return if self.tracker.borrow().is_dirty(&remote.id) {
                Reconcile::Dirty
            } else {
                Reconcile::AlreadyLoaded
            };
        }

        if self.is_saving(&remote.id) {
            return Reconcile::SaveInFlight;
        }

        let cached = self.tracker.borrow().get_cached(&remote.id);
        let outcome = if cached.is_some() {
            Reconcile::Restored
        } else {
            Reconcile::Applied
        };
        self.populate(&mut slot, EditBuffer::from_remote(remote, cached), true);
        outcome
    }

    fn begin_save(&self, note_id: &str) {
        *self
            .saving
            .borrow_mut()
            .entry(note_id.to_string())
            .or_default() += 1;
        self.refresh_status();
    }

    fn end_save(&self, note_id: &str) {
        let mut saving = self.saving.borrow_mut();
        if let Some(n) = saving.get_mut(note_id) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                saving.remove(note_id);
            }
        }
    }

    /// Whether the buffer or the read cache has seen the note in the trash.
    fn known_trashed(&self, note_id: &str) -> bool {
        let in_buffer = self
            .slot
            .borrow()
            .buffer
            .as_ref()
            .is_some_and(|b| b.note.note_id == note_id && b.is_trashed());
        in_buffer || self.cache.note(note_id).is_some_and(|n| n.is_trashed())
    }

    async fn persist(
        &self,
        note: NoteRef,
        patch: NotePatch,
        field: NoteField,
        revision: u64,
    ) -> SyncResult<()> {
        note.validate()?;
        if self.known_trashed(&note.note_id) {
            tracing::warn!(
                note_id = %note.note_id,
                ?field,
                revision,
                "dropping save for a trashed note"
            );
            return Err(SyncError::ReadOnly {
                note_id: note.note_id,
            });
        }

        self.begin_save(&note.note_id);
        let result = self.backend.update_note(&note, patch).await;
        self.end_save(&note.note_id);

        match &result {
            Ok(()) => {
                self.connectivity.mark_backend_online();
                let released =
                    self.tracker
                        .borrow_mut()
                        .confirm_saved(&note.note_id, field, revision);
                tracing::debug!(note_id = %note.note_id, ?field, revision, released, "saved");
            }
            Err(e) => self.connectivity.mark_backend_offline_api(e),
        }
        self.refresh_status();
        result.map_err(SyncError::from)
    }
}

/// Owns the selected note's edit buffer and everything that writes to it.
///
/// Title and content go through separately debounced save channels. Remote
/// values only reach the buffer through [`Reconcile`] rules: the note must be
/// the selected one, the buffer must not be populated yet, no save for it may
/// be in flight, and it must not carry unconfirmed local edits.
pub struct NoteSession<B: NoteBackend + Clone + 'static> {
    core: Rc<SessionCore<B>>,
    listener: RemoteSyncListener<B>,
    title_saves: Debouncer<SaveRequest<String>>,
    content_saves: Debouncer<SaveRequest<NoteContent>>,
}

impl<B: NoteBackend + Clone + 'static> NoteSession<B> {
    pub fn new(
        backend: B,
        config: SyncConfig,
        cache: ReadCache,
        connectivity: Connectivity,
    ) -> Self {
        let core = Rc::new(SessionCore {
            backend: backend.clone(),
            tracker: RefCell::new(DirtyTracker::new(config.dirty_release)),
            config,
            cache,
            connectivity,
            saving: RefCell::new(HashMap::new()),
            slot: RefCell::new(ActiveSlot::default()),
            status: RwSignal::new(SessionState::Empty),
            editor_key: RwSignal::new(0),
        });

        let title_core = core.clone();
        let title_saves = Debouncer::new(
            "title",
            core.config.title_delay(),
            move |req: SaveRequest<String>| {
                let core = title_core.clone();
                async move {
                    core.persist(
                        req.note,
                        NotePatch::title(req.value),
                        NoteField::Title,
                        req.revision,
                    )
                    .await
                }
            },
        );

        let content_core = core.clone();
        let content_saves = Debouncer::new(
            "content",
            core.config.content_delay(),
            move |req: SaveRequest<NoteContent>| {
                let core = content_core.clone();
                async move {
                    core.persist(
                        req.note,
                        NotePatch::content(req.value),
                        NoteField::Content,
                        req.revision,
                    )
                    .await
                }
            },
        );

        Self {
            listener: RemoteSyncListener::new(backend, cache),
            core,
            title_saves,
            content_saves,
        }
    }

    pub fn selected(&self) -> Option<NoteRef> {
        self.core.slot.borrow().selected.clone()
    }

    pub fn buffer(&self) -> Option<EditBuffer> {
        self.core.slot.borrow().buffer.clone()
    }

    pub fn state(&self) -> SessionState {
        self.core.derive_state()
    }

    /// Follows [`NoteSession::state`]; for views.
    pub fn status(&self) -> RwSignal<SessionState> {
        self.core.status
    }

    /// Changes whenever the buffer is filled from outside the editor. Key the
    /// editor surface on it so it remounts with the new content.
    pub fn editor_key(&self) -> RwSignal<u64> {
        self.core.editor_key
    }

    pub fn is_dirty(&self, note_id: &str) -> bool {
        self.core.tracker.borrow().is_dirty(note_id)
    }

    pub fn has_unsaved(&self, note_id: &str) -> bool {
        self.core.tracker.borrow().has_unsaved(note_id)
    }

    pub fn indicator(&self) -> SaveIndicator {
        if !self.core.connectivity.is_online() {
            SaveIndicator::Offline
        } else if self.title_saves.has_pending()
            || self.content_saves.has_pending()
            || !self.core.saving.borrow().is_empty()
        {
            SaveIndicator::Saving
        } else {
            SaveIndicator::Saved
        }
    }

    /// Switches the active note.
    ///
    /// Pending saves of the outgoing note are flushed before anything of the
    /// incoming note is loaded. A note with cached local edits is restored
    /// from them without consulting the server; otherwise the note is fetched
    /// and watched. A newer selection supersedes one still in progress.
    pub async fn select_note(&self, next: Option<NoteRef>) -> SyncResult<()> {
        if let Some(note) = &next {
            note.validate()?;
        }

        let seq = {
            let mut slot = self.core.slot.borrow_mut();
            if slot.selected == next {
                return Ok(());
            }
            slot.seq += 1;
            slot.selected = next.clone();
            // Dirty copies live on in the tracker.
            slot.buffer = None;
            slot.loading = next.is_some();
            slot.meta_confirmed = false;
            slot.seq
        };
        self.listener.unwatch_note();
        self.core.refresh_status();

        if let Err(e) = self.flush().await {
            // The tracker still holds the edits; switching goes ahead.
            tracing::warn!(error = %e, "flushing outgoing note failed");
        }

        if !self.core.is_current(seq) {
            tracing::debug!("selection superseded while flushing");
            return Ok(());
        }
        let Some(note) = next else {
            return Ok(());
        };

        let cached = self
            .core
            .tracker
            .borrow()
            .get_cached(&note.note_id)
            .filter(CachedNote::is_complete);
        let restored = cached.is_some();
        if let Some(cached) = cached {
            self.restore_from_cache(&note, cached);
        }

        self.listener.watch_note(&note, self.sink());
        if restored {
            return Ok(());
        }

        let fetched = self.core.backend.fetch_note(&note).await;
        if !self.core.is_current(seq) {
            return Ok(());
        }
        match fetched {
            Ok(Some(remote)) => {
                self.core.connectivity.mark_backend_online();
                self.core.offer_remote(remote);
                Ok(())
            }
            Ok(None) => {
                self.core.slot.borrow_mut().loading = false;
                self.core.refresh_status();
                Err(ApiError::not_found("note", &note.note_id).into())
            }
            Err(e) => {
                // Still watching: the subscription may deliver the note later.
                self.core.connectivity.mark_backend_offline_api(&e);
                tracing::warn!(note_id = %note.note_id, error = %e, "loading note failed");
                Err(e.into())
            }
        }
    }

    fn restore_from_cache(&self, note: &NoteRef, cached: CachedNote) {
        // Metadata from the cache may be stale; edits wait for the first push.
        let known = self.core.cache.note(&note.note_id);
        let buffer = EditBuffer {
            note: note.clone(),
            title: cached.title.unwrap_or_default(),
            content: cached.content.unwrap_or_default(),
            deleted_ms: known.as_ref().and_then(|n| n.deleted_ms),
            is_private: known.as_ref().is_some_and(|n| n.is_private),
            updated_ms: known.as_ref().map(|n| n.updated_ms).unwrap_or_default(),
        };
        {
            let mut slot = self.core.slot.borrow_mut();
            self.core.populate(&mut slot, buffer, false);
        }
        tracing::debug!(note_id = %note.note_id, "restored unsaved edits");
        self.core.refresh_status();
    }

    fn sink(&self) -> NoteSink {
        let core = Rc::downgrade(&self.core);
        Rc::new(move |remote: Note| {
            if let Some(core) = core.upgrade() {
                core.offer_remote(remote);
            }
        })
    }

    /// Offers a remote value to the buffer under the reconciliation rules.
    pub fn offer_remote(&self, remote: Note) -> Reconcile {
        self.core.offer_remote(remote)
    }

    pub fn on_title_change(&self, title: &str) -> SyncResult<()> {
        let note = self.core.editable_note()?;
        validate_title(title, &self.core.config)?;

        if let Some(buffer) = self.core.slot.borrow_mut().buffer.as_mut() {
            buffer.title = title.to_string();
        }
        let revision = self
            .core
            .tracker
            .borrow_mut()
            .mark_dirty(&note.note_id, NoteEdit::title(title));
        self.title_saves.schedule(SaveRequest {
            note,
            value: title.to_string(),
            revision,
        });
        self.core.refresh_status();
        Ok(())
    }

    /// `source_note_id` is the note the emitting editor was mounted for. Edits
    /// from an editor mounted for another note are dropped.
    pub fn on_content_change(&self, content: NoteContent, source_note_id: &str) -> SyncResult<()> {
        let selected = self.core.selected_id();
        if selected.as_deref() != Some(source_note_id) {
            tracing::warn!(
                source = source_note_id,
                selected = ?selected,
                "dropping content change from a stale editor"
            );
            return Ok(());
        }

        let note = self.core.editable_note()?;
        validate_content(&content, &self.core.config)?;

        if let Some(buffer) = self.core.slot.borrow_mut().buffer.as_mut() {
            buffer.content = content.clone();
        }
        let revision = self
            .core
            .tracker
            .borrow_mut()
            .mark_dirty(&note.note_id, NoteEdit::content(content.clone()));
        self.content_saves.schedule(SaveRequest {
            note,
            value: content,
            revision,
        });
        self.core.refresh_status();
        Ok(())
    }

    /// Sends both channels' pending saves now. The first failure is returned
    /// after both channels settle.
    pub async fn flush(&self) -> SyncResult<()> {
        let (title, content) =
            futures_util::join!(self.title_saves.flush(), self.content_saves.flush());
        title.and(content)
    }

    /// Ends the session: flushes both channels and stops every subscription.
    pub async fn close(&self) -> SyncResult<()> {
        let result = self.flush().await;
        self.listener.unwatch_all();
        tracing::info!("note session closed");
        result
    }

    /// Forgets a permanently deleted note: its unsent saves are dropped, its
    /// cached edits released, and it is deselected if open.
    pub fn discard_note(&self, note_id: &str) {
        let title = self.title_saves.cancel_if(|req| req.note.note_id == note_id);
        let content = self
            .content_saves
            .cancel_if(|req| req.note.note_id == note_id);
        self.core.tracker.borrow_mut().release(note_id);

        let was_selected = {
            let mut slot = self.core.slot.borrow_mut();
            let selected = slot
                .selected
                .as_ref()
                .is_some_and(|s| s.note_id == note_id);
            if selected {
                slot.seq += 1;
                slot.selected = None;
                slot.buffer = None;
                slot.loading = false;
                slot.meta_confirmed = false;
            }
            selected
        };
        if was_selected {
            self.listener.unwatch_note();
        }
        tracing::debug!(note_id, title, content, was_selected, "discarded note");
        self.core.refresh_status();
    }

    /// Launches a flush when the page is being hidden.
    #[cfg(all(target_family = "wasm", target_os = "unknown"))]
    pub fn flush_on_pagehide(self: &Rc<Self>) -> WindowListenerHandle {
        let session = Rc::downgrade(self);
        window_event_listener(
            leptos::ev::pagehide,
            move |_ev: web_sys::PageTransitionEvent| {
                let Some(session) = session.upgrade() else {
                    return;
                };
                crate::runtime::spawn_local(async move {
                    if let Err(e) = session.flush().await {
                        tracing::warn!(error = %e, "pagehide flush failed");
                    }
                });
            },
        )
    }
}

#[cfg(all(test, not(target_family = "wasm")))]
mod tests {
    use super::*;
    use crate::backend::memory::{BackendCall, MemoryBackend};
    use crate::config::DirtyRelease;
    use crate::error::{ApiErrorKind, ValidationError};
    use crate::models::{empty_content, Notebook};
    use serde_json::json;
    use std::time::Duration;
    use tokio::task::LocalSet;
    use tokio::time::sleep;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    async fn settle() {
        sleep(ms(1)).await;
    }

    fn note(id: &str, title: &str) -> Note {
        Note {
            id: id.to_string(),
            notebook_id: "nb".to_string(),
            title: title.to_string(),
            content: empty_content(),
            created_ms: 1,
            updated_ms: 1,
            deleted_ms: None,
            is_private: false,
        }
    }

    fn para(text: &str) -> NoteContent {
        json!([{ "type": "paragraph", "content": [{ "type": "text", "text": text }] }])
    }

    fn a1() -> NoteRef {
        NoteRef::new("A1", "nb")
    }

    fn b1() -> NoteRef {
        NoteRef::new("B1", "nb")
    }

    fn setup(policy: DirtyRelease) -> (MemoryBackend, NoteSession<MemoryBackend>) {
        let backend = MemoryBackend::new();
        backend.insert_notebook(Notebook {
            id: "nb".to_string(),
            title: "Inbox".to_string(),
            parent_id: None,
            created_ms: 1,
            updated_ms: 1,
            deleted_ms: None,
        });
        backend.push_remote_note(note("A1", ""));
        backend.push_remote_note(note("B1", "Shopping"));
        let config = SyncConfig {
            dirty_release: policy,
            ..Default::default()
        };
        let session = NoteSession::new(
            backend.clone(),
            config,
            ReadCache::new(),
            Connectivity::new(),
        );
        (backend, session)
    }

    fn title(session: &NoteSession<MemoryBackend>) -> Option<String> {
        session.buffer().map(|b| b.title)
    }

    fn position(calls: &[BackendCall], pred: impl Fn(&BackendCall) -> bool) -> usize {
        calls
            .iter()
            .position(pred)
            .expect("expected call was not made")
    }

    #[tokio::test(start_paused = true)]
    async fn test_typed_title_saves_once_after_title_delay() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(a1())).await.expect("select");
                assert_eq!(session.state(), SessionState::Synced);

                for prefix in ["H", "He", "Hel", "Hell", "Hello"] {
                    session.on_title_change(prefix).expect("edit");
                    assert_eq!(title(&session).as_deref(), Some(prefix));
                    sleep(ms(50)).await;
                }
                assert_eq!(session.state(), SessionState::Dirty);

                sleep(ms(400)).await;
                assert!(backend.note_updates().is_empty());

                sleep(ms(200)).await;
                assert_eq!(
                    backend.note_updates(),
                    vec![("A1".to_string(), NotePatch::title("Hello"))]
                );
                assert_eq!(session.state(), SessionState::Synced);
                assert_eq!(session.indicator(), SaveIndicator::Saved);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_title_goes_out_before_content() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(a1())).await.expect("select");
                session.on_title_change("Plan").expect("title");
                session
                    .on_content_change(para("draft"), "A1")
                    .expect("content");

                sleep(ms(600)).await;
                assert_eq!(backend.note_updates().len(), 1);
                sleep(ms(500)).await;
                let updates = backend.note_updates();
                assert_eq!(updates.len(), 2);
                assert_eq!(updates[1].1, NotePatch::content(para("draft")));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_flushes_outgoing_before_loading_incoming() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(a1())).await.expect("select A");
                backend.set_latency(ms(30));
                backend.clear_calls();

                session.on_title_change("Hello").expect("title");
                session.on_content_change(para("body"), "A1").expect("content");
                sleep(ms(100)).await;
                session.select_note(Some(b1())).await.expect("select B");

                let calls = backend.calls();
                let update_a = position(&calls, |c| {
                    matches!(c, BackendCall::UpdateNote { note, .. } if note.note_id == "A1")
                });
                let fetch_b = position(&calls, |c| {
                    matches!(c, BackendCall::FetchNote { note_id } if note_id == "B1")
                });
                let watch_b = position(&calls, |c| {
                    matches!(c, BackendCall::SubscribeNote { note_id } if note_id == "B1")
                });
                assert!(update_a < fetch_b);
                assert!(update_a < watch_b);
                assert_eq!(backend.note_updates().len(), 2);

                let stored = backend.note("A1").expect("A1 exists");
                assert_eq!(stored.title, "Hello");
                assert_eq!(stored.content, para("body"));

                let buffer = session.buffer().expect("B loaded");
                assert_eq!(buffer.note, b1());
                assert_eq!(buffer.title, "Shopping");
                assert_eq!(buffer.content, empty_content());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dirty_note_is_shielded_from_remote_pushes() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::Never);
                session.select_note(Some(a1())).await.expect("select");
                session.on_content_change(para("mine"), "A1").expect("edit");
                session.flush().await.expect("flush");
                assert!(session.is_dirty("A1"));

                let mut theirs = note("A1", "Theirs");
                theirs.content = para("theirs");
                backend.push_remote_note(theirs.clone());
                settle().await;
                assert_eq!(session.offer_remote(theirs), Reconcile::Dirty);

                let buffer = session.buffer().expect("buffer");
                assert_eq!(buffer.content, para("mine"));
                assert_eq!(buffer.title, "");

                // Revisiting restores the local copy instead of the server's.
                session.select_note(Some(b1())).await.expect("select B");
                session.select_note(Some(a1())).await.expect("select A");
                assert_eq!(session.buffer().expect("buffer").content, para("mine"));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_save_lets_remote_win_on_revisit() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(a1())).await.expect("select");
                session.on_title_change("Mine").expect("edit");
                session.flush().await.expect("flush");
                assert!(!session.is_dirty("A1"));

                session.select_note(Some(b1())).await.expect("select B");
                backend.push_remote_note(note("A1", "Edited elsewhere"));
                session.select_note(Some(a1())).await.expect("select A");
                assert_eq!(title(&session).as_deref(), Some("Edited elsewhere"));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_loaded_buffer_ignores_later_pushes_but_follows_trash_marker() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(b1())).await.expect("select");

                let mut trashed = note("B1", "Renamed elsewhere");
                trashed.deleted_ms = Some(99);
                backend.push_remote_note(trashed);
                settle().await;

                let buffer = session.buffer().expect("buffer");
                assert_eq!(buffer.title, "Shopping");
                assert!(buffer.is_trashed());
                assert!(matches!(
                    session.on_title_change("x"),
                    Err(SyncError::ReadOnly { .. })
                ));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_editor_content_is_dropped() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(b1())).await.expect("select");
                let before = session.buffer();

                session
                    .on_content_change(para("from the old editor"), "A1")
                    .expect("stale edits are not errors");
                assert_eq!(session.buffer(), before);
                assert!(!session.is_dirty("A1"));
                assert!(!session.is_dirty("B1"));

                sleep(ms(2000)).await;
                assert!(backend.note_updates().is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_trashed_note_refuses_edits() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                let mut trashed = note("T1", "Old");
                trashed.deleted_ms = Some(5);
                backend.push_remote_note(trashed);

                session
                    .select_note(Some(NoteRef::new("T1", "nb")))
                    .await
                    .expect("select");
                assert_eq!(
                    session.on_title_change("New"),
                    Err(SyncError::ReadOnly {
                        note_id: "T1".to_string()
                    })
                );
                assert!(matches!(
                    session.on_content_change(para("x"), "T1"),
                    Err(SyncError::ReadOnly { .. })
                ));
                assert_eq!(title(&session).as_deref(), Some("Old"));

                sleep(ms(2000)).await;
                assert!(backend.note_updates().is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_push_for_permanently_deleted_note_is_harmless() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(a1())).await.expect("select");
                session.on_title_change("Doomed").expect("edit");

                backend
                    .permanent_delete_note(&a1())
                    .await
                    .expect("delete");
                session.discard_note("A1");
                assert_eq!(session.state(), SessionState::Empty);

                backend.deliver_note_event(note("A1", "Late"));
                settle().await;
                assert_eq!(session.offer_remote(note("A1", "Late")), Reconcile::NotSelected);
                assert_eq!(session.buffer(), None);

                sleep(ms(1000)).await;
                assert!(backend.note_updates().is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_edits_while_loading_are_rejected() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                backend.set_latency(ms(100));
                let session = Rc::new(session);

                let selecting = {
                    let session = session.clone();
                    tokio::task::spawn_local(async move { session.select_note(Some(a1())).await })
                };
                settle().await;
                assert_eq!(session.state(), SessionState::Loading);
                assert_eq!(session.on_title_change("early"), Err(SyncError::NotLoaded));

                selecting.await.expect("task").expect("select");
                assert_eq!(session.state(), SessionState::Synced);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_walks_through_saving() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                assert_eq!(session.state(), SessionState::Empty);
                session.select_note(Some(a1())).await.expect("select");
                backend.set_latency(ms(200));

                session.on_title_change("Hi").expect("edit");
                assert_eq!(session.status().get_untracked(), SessionState::Dirty);

                sleep(ms(550)).await;
                assert_eq!(session.state(), SessionState::Saving);
                assert_eq!(session.indicator(), SaveIndicator::Saving);

                // Typing during the save keeps the note dirty afterwards.
                session.on_title_change("Hi!").expect("edit");
                sleep(ms(200)).await;
                assert_eq!(session.state(), SessionState::Dirty);

                sleep(ms(1000)).await;
                assert_eq!(session.state(), SessionState::Synced);
                assert_eq!(
                    backend.note("A1").map(|n| n.title).as_deref(),
                    Some("Hi!")
                );
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsaved_edits_are_restored_on_revisit() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(a1())).await.expect("select");
                let key_after_load = session.editor_key().get_untracked();

                backend.set_offline(true);
                session.on_title_change("Offline title").expect("title");
                session.on_content_change(para("offline body"), "A1").expect("content");
                assert_eq!(session.indicator(), SaveIndicator::Saving);

                // The flush fails, but switching still goes ahead.
                let _ = session.select_note(Some(b1())).await;
                assert_eq!(session.indicator(), SaveIndicator::Offline);
                assert!(session.has_unsaved("A1"));

                backend.set_offline(false);
                backend.clear_calls();
                session.select_note(Some(a1())).await.expect("select A");

                let buffer = session.buffer().expect("restored");
                assert_eq!(buffer.title, "Offline title");
                assert_eq!(buffer.content, para("offline body"));
                assert_eq!(session.state(), SessionState::Dirty);
                assert!(session.editor_key().get_untracked() > key_after_load);
                assert!(!backend
                    .calls()
                    .iter()
                    .any(|c| matches!(c, BackendCall::FetchNote { .. })));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_note_trashed_elsewhere_stays_read_only() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(a1())).await.expect("select");

                backend.set_offline(true);
                session.on_title_change("Offline title").expect("title");
                session.on_content_change(para("offline body"), "A1").expect("content");
                let _ = session.select_note(Some(b1())).await;
                backend.set_offline(false);

                let mut trashed = note("A1", "");
                trashed.deleted_ms = Some(42);
                backend.push_remote_note(trashed);

                session.select_note(Some(a1())).await.expect("select A");
                assert_eq!(title(&session).as_deref(), Some("Offline title"));
                assert_eq!(
                    session.on_title_change("edited in trash"),
                    Err(SyncError::NotLoaded)
                );

                settle().await;
                assert!(session.buffer().expect("buffer").is_trashed());
                assert!(matches!(
                    session.on_title_change("edited in trash"),
                    Err(SyncError::ReadOnly { .. })
                ));

                sleep(ms(2000)).await;
                let stored = backend.note("A1").expect("A1 exists");
                assert_eq!(stored.title, "");
                assert_eq!(stored.deleted_ms, Some(42));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_note_becomes_editable_after_first_push() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(a1())).await.expect("select");
                backend.set_offline(true);
                session.on_title_change("Offline").expect("title");
                session.on_content_change(para("body"), "A1").expect("content");
                let _ = session.select_note(Some(b1())).await;
                backend.set_offline(false);

                session.select_note(Some(a1())).await.expect("select A");
                settle().await;
                session.on_title_change("Back online").expect("edit");
                session.flush().await.expect("flush");
                assert_eq!(
                    backend.note("A1").map(|n| n.title).as_deref(),
                    Some("Back online")
                );
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_save_is_dropped_once_note_is_trashed() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(a1())).await.expect("select");
                session.on_title_change("Draft").expect("edit");

                let mut trashed = note("A1", "");
                trashed.deleted_ms = Some(7);
                backend.push_remote_note(trashed);
                settle().await;
                assert!(session.buffer().expect("buffer").is_trashed());

                let err = session.flush().await.expect_err("save must be refused");
                assert_eq!(
                    err,
                    SyncError::ReadOnly {
                        note_id: "A1".to_string()
                    }
                );
                assert!(backend.note_updates().is_empty());
                assert!(session.has_unsaved("A1"));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_partially_cached_note_is_completed_from_remote() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                let mut b = note("B1", "Shopping");
                b.content = para("milk");
                backend.push_remote_note(b.clone());

                session.select_note(Some(b1())).await.expect("select");
                backend.fail_next(ApiError::network("dropped"));
                session.on_title_change("Groceries").expect("edit");
                session.select_note(Some(a1())).await.expect("select A");

                session.select_note(Some(b1())).await.expect("select B");
                let buffer = session.buffer().expect("loaded");
                assert_eq!(buffer.title, "Groceries");
                assert_eq!(buffer.content, para("milk"));
                assert_eq!(session.offer_remote(b), Reconcile::Dirty);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_edit_leaves_buffer_untouched() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(b1())).await.expect("select");

                let long = "x".repeat(500);
                assert!(matches!(
                    session.on_title_change(&long),
                    Err(SyncError::Validation(ValidationError::TitleTooLong { .. }))
                ));
                assert!(matches!(
                    session.on_content_change(json!({"not": "blocks"}), "B1"),
                    Err(SyncError::Validation(ValidationError::MalformedContent(_)))
                ));
                assert_eq!(title(&session).as_deref(), Some("Shopping"));
                assert!(!session.is_dirty("B1"));

                sleep(ms(2000)).await;
                assert!(backend.note_updates().is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_reports_backend_failure() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(a1())).await.expect("select");
                backend.fail_next(ApiError::http(500, "boom".to_string(), "update note"));
                session.on_title_change("Lost?").expect("edit");

                let err = session.flush().await.expect_err("flush should fail");
                assert!(matches!(err, SyncError::Backend(ref e) if e.kind == ApiErrorKind::Http));
                assert!(session.has_unsaved("A1"));
                assert_eq!(title(&session).as_deref(), Some("Lost?"));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_note_leaves_session_empty() {
        LocalSet::new()
            .run_until(async {
                let (_backend, session) = setup(DirtyRelease::OnConfirmedSave);
                let err = session
                    .select_note(Some(NoteRef::new("nope", "nb")))
                    .await
                    .expect_err("missing note");
                assert!(matches!(err, SyncError::Backend(ref e) if e.kind == ApiErrorKind::NotFound));
                assert_eq!(session.state(), SessionState::Empty);

                assert!(matches!(
                    session.select_note(Some(NoteRef::new("", "nb"))).await,
                    Err(SyncError::Validation(ValidationError::MissingId("note")))
                ));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscriptions_do_not_leak() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(a1())).await.expect("select A");
                session.select_note(Some(b1())).await.expect("select B");
                settle().await;
                assert_eq!(backend.subscriber_count(), 1);

                session.select_note(None).await.expect("deselect");
                settle().await;
                assert_eq!(backend.subscriber_count(), 0);

                session.select_note(Some(a1())).await.expect("select A");
                session.close().await.expect("close");
                settle().await;
                assert_eq!(backend.subscriber_count(), 0);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_session_sends_pending_saves() {
        LocalSet::new()
            .run_until(async {
                let (backend, session) = setup(DirtyRelease::OnConfirmedSave);
                session.select_note(Some(a1())).await.expect("select");
                session.on_content_change(para("last words"), "A1").expect("edit");
                drop(session);

                settle().await;
                assert_eq!(
                    backend.note("A1").map(|n| n.content),
                    Some(para("last words"))
                );
                settle().await;
                assert_eq!(backend.subscriber_count(), 0);
            })
            .await;
    }
}
