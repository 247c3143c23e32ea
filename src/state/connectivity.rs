use crate::error::ApiError;
use leptos::prelude::*;

/// What the save indicator knows about reachability. Purely informational:
/// writes are attempted regardless.
#[derive(Clone, Copy)]
pub struct Connectivity {
    /// The browser's own online/offline signal.
    pub online: RwSignal<bool>,
    /// Cleared by network-kind backend failures, set again by any success.
    pub backend_online: RwSignal<bool>,
    pub last_error: RwSignal<Option<String>>,
}

impl Connectivity {
    pub fn new() -> Self {
        Self {
            online: RwSignal::new(initial_online()),
            backend_online: RwSignal::new(true),
            last_error: RwSignal::new(None),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.get_untracked() && self.backend_online.get_untracked()
    }

    pub fn set_online(&self, online: bool) {
        if self.online.get_untracked() != online {
            tracing::info!(online, "connectivity changed");
            self.online.set(online);
        }
    }

    pub fn mark_backend_online(&self) {
        if !self.backend_online.get_untracked() {
            tracing::info!("backend reachable again");
        }
        self.backend_online.set(true);
        self.last_error.set(None);
    }

    /// Only network failures say anything about reachability.
    pub fn mark_backend_offline_api(&self, e: &ApiError) {
        if e.is_network() {
            self.backend_online.set(false);
            self.last_error.set(Some(e.to_string()));
        }
    }

    /// Mirrors the window's `online`/`offline` events. Keep the handles alive
    /// for as long as the signal should follow them.
    #[cfg(all(target_family = "wasm", target_os = "unknown"))]
    pub fn follow_browser(&self) -> [WindowListenerHandle; 2] {
        let this = *self;
        let up = window_event_listener(leptos::ev::online, move |_ev: web_sys::Event| {
            this.set_online(true);
        });
        let down = window_event_listener(leptos::ev::offline, move |_ev: web_sys::Event| {
            this.set_online(false);
        });
        [up, down]
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(target_family = "wasm", target_os = "unknown"))]
fn initial_online() -> bool {
    web_sys::window()
        .map(|w| w.navigator().on_line())
        .unwrap_or(true)
}

#[cfg(not(all(target_family = "wasm", target_os = "unknown")))]
fn initial_online() -> bool {
    true
}
