//! Remote sync listener.
//!
//! Holds at most one subscription per slot (open note, open notebook, notebook
//! tree, trash). Re-targeting a slot drops the previous subscription, and
//! dropping the listener drops all of them.
//!
//! The listener does not sequence or filter note pushes; whether a pushed note
//! may touch the edit buffer is decided by the sink it hands them to.

use crate::backend::{NoteBackend, RemoteStream};
use crate::cache::ReadCache;
use crate::error::ApiResult;
use crate::models::{Note, NoteRef};
use crate::runtime;
use futures_util::future::{self, AbortHandle, Abortable};
use futures_util::StreamExt;
use std::cell::RefCell;
use std::rc::Rc;

pub type NoteSink = Rc<dyn Fn(Note)>;

struct Watch {
    key: String,
    abort: AbortHandle,
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

fn spawn_watch<T: 'static>(
    stream: RemoteStream<T>,
    mut on_item: impl FnMut(ApiResult<T>) + 'static,
) -> AbortHandle {
    let (abort, registration) = AbortHandle::new_pair();
    let pump = stream.for_each(move |item| {
        on_item(item);
        future::ready(())
    });
    runtime::spawn_local(async move {
        let _ = Abortable::new(pump, registration).await;
    });
    abort
}

pub struct RemoteSyncListener<B> {
    backend: B,
    cache: ReadCache,
    note: RefCell<Option<Watch>>,
    notebook: RefCell<Option<Watch>>,
    notebooks: RefCell<Option<Watch>>,
    trash: RefCell<Option<Watch>>,
}

impl<B: NoteBackend> RemoteSyncListener<B> {
    pub fn new(backend: B, cache: ReadCache) -> Self {
        Self {
            backend,
            cache,
            note: RefCell::new(None),
            notebook: RefCell::new(None),
            notebooks: RefCell::new(None),
            trash: RefCell::new(None),
        }
    }

    pub fn cache(&self) -> ReadCache {
        self.cache
    }

    /// Subscribes to one note, writing each pushed value into the cache and
    /// then offering it to `sink`. Watching the note already watched is a
    /// no-op.
    pub fn watch_note(&self, note: &NoteRef, sink: NoteSink) {
        if is_watching(&self.note, &note.note_id) {
            return;
        }
        // Release the old subscription before opening the new one.
        self.note.borrow_mut().take();

        let cache = self.cache;
        let note_id = note.note_id.clone();
        let abort = spawn_watch(self.backend.subscribe_note(note), move |item| match item {
            Ok(Some(remote)) => {
                cache.put_note(remote.clone());
                sink(remote);
            }
            Ok(None) => {
                tracing::debug!(note_id = %note_id, "watched note no longer exists");
                cache.remove_note(&note_id);
            }
            Err(e) => {
                tracing::warn!(note_id = %note_id, error = %e, "note subscription failed");
                cache.record_error(e.to_string());
            }
        });

        *self.note.borrow_mut() = Some(Watch {
            key: note.note_id.clone(),
            abort,
        });
    }

    pub fn unwatch_note(&self) {
        self.note.borrow_mut().take();
    }

    pub fn watched_note(&self) -> Option<String> {
        self.note.borrow().as_ref().map(|w| w.key.clone())
    }

    /// Keeps the cache's listing for `notebook_id` current. `None` stops
    /// listening.
    pub fn watch_notebook(&self, notebook_id: Option<&str>) {
        let Some(notebook_id) = notebook_id else {
            self.notebook.borrow_mut().take();
            return;
        };
        if is_watching(&self.notebook, notebook_id) {
            return;
        }
        self.notebook.borrow_mut().take();

        let cache = self.cache;
        let id = notebook_id.to_string();
        let abort = spawn_watch(self.backend.subscribe_notes(notebook_id), move |item| {
            match item {
                Ok(notes) => cache.set_notebook_notes(&id, notes),
                Err(e) => {
                    tracing::warn!(notebook_id = %id, error = %e, "notebook subscription failed");
                    cache.record_error(e.to_string());
                }
            }
        });

        *self.notebook.borrow_mut() = Some(Watch {
            key: notebook_id.to_string(),
            abort,
        });
    }

    pub fn watch_notebooks(&self) {
        if self.notebooks.borrow().is_some() {
            return;
        }
        let cache = self.cache;
        let abort = spawn_watch(self.backend.subscribe_notebooks(), move |item| match item {
            Ok(all) => cache.set_notebooks(all),
            Err(e) => {
                tracing::warn!(error = %e, "notebook tree subscription failed");
                cache.record_error(e.to_string());
            }
        });
        *self.notebooks.borrow_mut() = Some(Watch {
            key: String::new(),
            abort,
        });
    }

    pub fn watch_trash(&self) {
        if self.trash.borrow().is_some() {
            return;
        }
        let cache = self.cache;
        let abort = spawn_watch(self.backend.subscribe_trash(), move |item| match item {
            Ok(all) => cache.set_trash(all),
            Err(e) => {
                tracing::warn!(error = %e, "trash subscription failed");
                cache.record_error(e.to_string());
            }
        });
        *self.trash.borrow_mut() = Some(Watch {
            key: String::new(),
            abort,
        });
    }

    pub fn unwatch_trash(&self) {
        self.trash.borrow_mut().take();
    }

    pub fn unwatch_all(&self) {
        for slot in [&self.note, &self.notebook, &self.notebooks, &self.trash] {
            slot.borrow_mut().take();
        }
    }
}

fn is_watching(slot: &RefCell<Option<Watch>>, key: &str) -> bool {
    slot.borrow().as_ref().is_some_and(|w| w.key == key)
}
