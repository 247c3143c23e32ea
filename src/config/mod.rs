use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_API_URL: &str = "http://localhost:6689";

/// When a note stops being shielded from remote pushes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DirtyRelease {
    /// Once edited, a note keeps its local copy for the whole client session.
    Never,
    /// The local copy is dropped after the client itself saw every edited field
    /// saved at its latest revision.
    #[default]
    OnConfirmedSave,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Titles are cheap and highly visible, so they go out sooner.
    pub title_save_delay_ms: u64,
    pub content_save_delay_ms: u64,
    pub max_title_len: usize,
    /// Serialized size ceiling for a note's content.
    pub max_content_bytes: usize,
    /// Used by the HTTP backend, which emulates push by polling.
    pub poll_interval_ms: u64,
    pub dirty_release: DirtyRelease,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            title_save_delay_ms: 500,
            content_save_delay_ms: 1000,
            max_title_len: 200,
            max_content_bytes: 1_000_000,
            poll_interval_ms: 5000,
            dirty_release: DirtyRelease::default(),
        }
    }
}

impl SyncConfig {
    pub fn title_delay(&self) -> Duration {
        Duration::from_millis(self.title_save_delay_ms)
    }

    pub fn content_delay(&self) -> Duration {
        Duration::from_millis(self.content_save_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(250))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EnvConfig {
    pub api_url: String,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            sync: SyncConfig::default(),
        }
    }
}

impl EnvConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Browser: `window.ENV.API_URL` (or legacy `window.ENV.api_url`) plus an
    /// optional `window.ENV.SYNC` object.
    #[cfg(all(target_family = "wasm", target_os = "unknown"))]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        let Some(env) = web_sys::window().and_then(|w| w.get("ENV")) else {
            return config;
        };
        if env.is_undefined() || !env.is_object() {
            return config;
        }

        for key in ["API_URL", "api_url"] {
            if let Some(url) = js_sys::Reflect::get(&env, &key.into())
                .ok()
                .and_then(|v| v.as_string())
            {
                config.api_url = url;
                break;
            }
        }

        if let Ok(sync) = js_sys::Reflect::get(&env, &"SYNC".into()) {
            if sync.is_object() {
                let parsed = js_sys::JSON::stringify(&sync)
                    .ok()
                    .and_then(|s| s.as_string())
                    .and_then(|s| serde_json::from_str::<SyncConfig>(&s).ok());
                match parsed {
                    Some(sync) => config.sync = sync,
                    None => tracing::warn!("ignoring malformed window.ENV.SYNC"),
                }
            }
        }

        config
    }

    /// Native: `FOLIO_API_URL` plus an optional `FOLIO_SYNC` JSON object.
    #[cfg(not(all(target_family = "wasm", target_os = "unknown")))]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("FOLIO_API_URL") {
            if !url.trim().is_empty() {
                config.api_url = url;
            }
        }

        if let Ok(raw) = std::env::var("FOLIO_SYNC") {
            match serde_json::from_str::<SyncConfig>(&raw) {
                Ok(sync) => config.sync = sync,
                Err(e) => tracing::warn!(error = %e, "ignoring malformed FOLIO_SYNC"),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_config_defaults_match_editor_timings() {
        let c = SyncConfig::default();
        assert_eq!(c.title_delay(), Duration::from_millis(500));
        assert_eq!(c.content_delay(), Duration::from_millis(1000));
        assert!(c.title_delay() < c.content_delay());
        assert_eq!(c.dirty_release, DirtyRelease::OnConfirmedSave);
    }

    #[test]
    fn test_env_config_partial_json_fills_defaults() {
        let c = EnvConfig::from_json(
            r#"{"api_url": "https://notes.example", "sync": {"content_save_delay_ms": 2500, "dirty_release": "never"}}"#,
        )
        .expect("config should parse");
        assert_eq!(c.api_url, "https://notes.example");
        assert_eq!(c.sync.content_save_delay_ms, 2500);
        assert_eq!(c.sync.title_save_delay_ms, 500);
        assert_eq!(c.sync.dirty_release, DirtyRelease::Never);
    }

    #[test]
    fn test_poll_interval_has_a_floor() {
        let c = SyncConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(c.poll_interval(), Duration::from_millis(250));
    }
}
