mod connectivity;
mod note_sync;
mod ui;

pub use connectivity::Connectivity;
pub use note_sync::{EditBuffer, NoteSession, Reconcile, SaveIndicator, SessionState};
pub use ui::{ThemeColor, UiSnapshot, UiStore};

use crate::backend::NoteBackend;
use crate::cache::ReadCache;
use crate::config::EnvConfig;
use crate::error::SyncResult;
use crate::library::Library;
use crate::listener::RemoteSyncListener;
use crate::storage::SnapshotStore;
use leptos::prelude::*;
use std::rc::Rc;

/// Keeps the list views fed: the notebook tree, the trash, and the listing of
/// whichever notebook the UI has open.
pub struct ListFollower<B: NoteBackend> {
    listener: RemoteSyncListener<B>,
    selected: RwSignal<Option<String>>,
}

impl<B: NoteBackend> ListFollower<B> {
    /// Points the notebook subscription at the current selection.
    pub fn sync(&self) {
        let selected = self.selected.get_untracked();
        self.listener.watch_notebook(selected.as_deref());
    }

    pub fn listener(&self) -> &RemoteSyncListener<B> {
        &self.listener
    }
}

/// Everything the views share, constructed once and passed down.
#[derive(Clone)]
pub struct AppState {
    pub config: EnvConfig,
    pub ui: UiStore,
    pub cache: ReadCache,
    pub connectivity: Connectivity,
    store: Rc<dyn SnapshotStore>,
}

impl AppState {
    pub fn new(config: EnvConfig, store: Rc<dyn SnapshotStore>) -> Self {
        Self {
            ui: UiStore::load(store.as_ref()),
            cache: ReadCache::new(),
            connectivity: Connectivity::new(),
            config,
            store,
        }
    }

    pub fn persist_ui(&self) {
        self.ui.persist(self.store.as_ref());
    }

    /// A session bound to this state's cache, connectivity and sync settings.
    pub fn note_session<B: NoteBackend + Clone + 'static>(&self, backend: B) -> NoteSession<B> {
        NoteSession::new(
            backend,
            self.config.sync.clone(),
            self.cache,
            self.connectivity,
        )
    }

    /// Starts the list subscriptions. In the browser an effect re-targets the
    /// notebook listing whenever `ui.selected_notebook_id` changes; elsewhere
    /// call [`ListFollower::sync`] after changing it.
    pub fn follow_lists<B: NoteBackend + 'static>(&self, backend: B) -> Rc<ListFollower<B>> {
        let lists = Rc::new(ListFollower {
            listener: RemoteSyncListener::new(backend, self.cache),
            selected: self.ui.selected_notebook_id,
        });
        lists.listener.watch_notebooks();
        lists.listener.watch_trash();
        lists.sync();

        #[cfg(all(target_family = "wasm", target_os = "unknown"))]
        {
            let follower = Rc::downgrade(&lists);
            let selected = self.ui.selected_notebook_id;
            Effect::new(move |_| {
                selected.track();
                if let Some(lists) = follower.upgrade() {
                    lists.sync();
                }
            });
        }
        lists
    }

    /// Pulls the account's appearance settings into the UI store. Returns
    /// whether any were found; local values stay otherwise.
    pub async fn pull_settings<B: NoteBackend>(&self, backend: &B) -> SyncResult<bool> {
        match backend.fetch_settings().await {
            Ok(Some(settings)) => {
                self.connectivity.mark_backend_online();
                self.ui.apply_settings(&settings);
                self.persist_ui();
                Ok(true)
            }
            Ok(None) => {
                self.connectivity.mark_backend_online();
                Ok(false)
            }
            Err(e) => {
                self.connectivity.mark_backend_offline_api(&e);
                tracing::warn!(error = %e, "loading account settings failed");
                Err(e.into())
            }
        }
    }

    /// Saves the UI store's appearance settings locally and to the account.
    pub async fn push_settings<B: NoteBackend>(&self, backend: &B) -> SyncResult<()> {
        let settings = self.ui.settings();
        self.persist_ui();
        match backend.save_settings(&settings).await {
            Ok(()) => {
                self.connectivity.mark_backend_online();
                Ok(())
            }
            Err(e) => {
                self.connectivity.mark_backend_offline_api(&e);
                Err(e.into())
            }
        }
    }

    pub fn library<B: NoteBackend>(&self, backend: B) -> Library<B> {
        Library::new(
            backend,
            self.config.sync.clone(),
            self.cache,
            self.connectivity,
        )
    }
}
