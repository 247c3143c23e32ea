//! Client-side sync core for a multi-device notes app: debounced saves, a
//! dirty-entry shield against late remote pushes, remote subscriptions and the
//! active note session, plus the notebook tree and per-device UI state.

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod debounce;
pub mod drafts;
pub mod error;
pub mod library;
pub mod listener;
pub mod logging;
pub mod models;
pub mod runtime;
pub mod state;
pub mod storage;
pub mod tree;
pub mod util;

pub use api::ApiClient;
pub use backend::{NoteBackend, RemoteStream, WriteBatch, WriteOp};
pub use config::{DirtyRelease, EnvConfig, SyncConfig};
pub use debounce::Debouncer;
pub use drafts::DirtyTracker;
pub use error::{ApiError, ApiErrorKind, SyncError, SyncResult};
pub use library::Library;
pub use listener::RemoteSyncListener;
pub use state::{AppState, NoteSession};

// Needed for `#[wasm_bindgen(start)]` on the wasm entrypoint.
#[cfg(all(target_family = "wasm", target_os = "unknown", not(test)))]
use wasm_bindgen::prelude::wasm_bindgen;

/// Browser entrypoint: wires the sync core to the HTTP backend and reopens
/// whatever note was selected when the page was last closed.
// Only register the start function for normal builds, otherwise
// wasm-bindgen-test ends up with multiple entry symbols.
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
#[cfg_attr(not(test), wasm_bindgen(start))]
pub fn main() {
    use leptos::prelude::{window_event_listener, GetUntracked};

    logging::init_logging();
    // Effects need an executor even without a mounted view.
    if let Err(e) = leptos::task::Executor::init_wasm_bindgen() {
        tracing::debug!(error = ?e, "executor already initialized");
    }

    let config = EnvConfig::from_env();
    let store = storage::default_store();
    let app = AppState::new(config.clone(), store.clone());
    let backend = ApiClient::load_from_storage(&config, store.as_ref());
    let session = std::rc::Rc::new(app.note_session(backend.clone()));
    let lists = app.follow_lists(backend.clone());

    let persisted = app.clone();
    let handles = (
        app.connectivity.follow_browser(),
        session.flush_on_pagehide(),
        window_event_listener(
            leptos::ev::pagehide,
            move |_ev: web_sys::PageTransitionEvent| persisted.persist_ui(),
        ),
    );
    // Listeners stay registered for the lifetime of the page.
    std::mem::forget(handles);
    std::mem::forget(lists);

    let selected = app.ui.selected_note.get_untracked();
    tracing::info!(api_url = %config.api_url, reopening = selected.is_some(), "sync core started");

    let running = session.clone();
    runtime::spawn_local(async move {
        if let Err(e) = running.select_note(selected).await {
            tracing::warn!(error = %e, "could not reopen the last selected note");
        }
    });
    runtime::spawn_local(async move {
        // Failures are logged inside; the locally persisted values stay.
        let _ = app.pull_settings(&backend).await;
    });
    // The session owns the live subscriptions and lives as long as the page.
    std::mem::forget(session);
}
