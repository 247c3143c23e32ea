use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub const UI_STATE_KEY: &str = "folio_ui_state";
pub const TOKEN_KEY: &str = "folio_token";

/// Per-device key/value persistence for snapshots.
pub trait SnapshotStore {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str);
    fn remove_item(&self, key: &str);
}

/// A missing or unreadable value yields `None`.
pub fn load_json<T: DeserializeOwned>(store: &dyn SnapshotStore, key: &str) -> Option<T> {
    let json = store.get_item(key)?;
    match serde_json::from_str(&json) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding unreadable stored value");
            None
        }
    }
}

pub fn save_json<T: Serialize>(store: &dyn SnapshotStore, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => store.set_item(key, &json),
        Err(e) => tracing::warn!(key, error = %e, "could not serialize value for storage"),
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    items: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) {
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    fn remove_item(&self, key: &str) {
        self.items.borrow_mut().remove(key);
    }
}

/// `window.localStorage`. Quota and privacy-mode failures are ignored.
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
#[derive(Clone, Copy, Default)]
pub struct LocalStorageStore;

#[cfg(all(target_family = "wasm", target_os = "unknown"))]
impl LocalStorageStore {
    fn storage() -> Option<web_sys::Storage> {
        web_sys::window().and_then(|w| w.local_storage().ok().flatten())
    }
}

#[cfg(all(target_family = "wasm", target_os = "unknown"))]
impl SnapshotStore for LocalStorageStore {
    fn get_item(&self, key: &str) -> Option<String> {
        Self::storage()?.get_item(key).ok().flatten()
    }

    fn set_item(&self, key: &str, value: &str) {
        if let Some(storage) = Self::storage() {
            let _ = storage.set_item(key, value);
        }
    }

    fn remove_item(&self, key: &str) {
        if let Some(storage) = Self::storage() {
            let _ = storage.remove_item(key);
        }
    }
}

#[cfg(all(target_family = "wasm", target_os = "unknown"))]
pub fn default_store() -> Rc<dyn SnapshotStore> {
    Rc::new(LocalStorageStore)
}

#[cfg(not(all(target_family = "wasm", target_os = "unknown")))]
pub fn default_store() -> Rc<dyn SnapshotStore> {
    Rc::new(MemoryStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Prefs {
        dark: bool,
    }

    #[test]
    fn test_json_roundtrip_through_memory_store() {
        let store = MemoryStore::new();
        save_json(&store, "prefs", &Prefs { dark: true });
        assert_eq!(load_json::<Prefs>(&store, "prefs"), Some(Prefs { dark: true }));

        store.remove_item("prefs");
        assert_eq!(load_json::<Prefs>(&store, "prefs"), None);
    }

    #[test]
    fn test_corrupt_value_loads_as_none() {
        let store = MemoryStore::new();
        store.set_item("prefs", "{not json");
        assert_eq!(load_json::<Prefs>(&store, "prefs"), None);
    }
}
