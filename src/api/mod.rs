//! HTTP implementation of the backend over the hosted JSON API.
//!
//! The API has no push channel, so subscriptions poll and only emit when the
//! fetched value differs from the last one delivered.

use crate::backend::{NoteBackend, RemoteStream, WriteBatch};
use crate::config::EnvConfig;
use crate::error::{ApiError, ApiErrorKind, ApiResult};
use crate::models::{
    NewNote, NewNotebook, Note, NoteRef, NotePatch, Notebook, NotebookPatch, UserSettings,
};
use crate::runtime;
use crate::storage::{SnapshotStore, TOKEN_KEY};
use futures_util::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
struct NotebookIdRequest<'a> {
    notebook_id: &'a str,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
struct UpdateNotebookRequest<'a> {
    notebook_id: &'a str,
    #[serde(flatten)]
    patch: NotebookPatch,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
struct UpdateNoteRequest<'a> {
    #[serde(flatten)]
    note: &'a NoteRef,
    #[serde(flatten)]
    patch: NotePatch,
}

#[derive(Deserialize, Clone, Debug)]
struct NoteEnvelope {
    #[serde(default)]
    note: Option<Note>,
}

#[derive(Deserialize, Clone, Debug)]
struct SettingsEnvelope {
    #[serde(default)]
    settings: Option<UserSettings>,
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    poll_interval: Duration,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(config: &EnvConfig) -> Self {
        Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: None,
            poll_interval: config.sync.poll_interval(),
            http: reqwest::Client::new(),
        }
    }

    /// Picks up a token saved by an earlier session.
    pub fn load_from_storage(config: &EnvConfig, store: &dyn SnapshotStore) -> Self {
        let mut client = Self::new(config);
        client.token = store.get_item(TOKEN_KEY).filter(|t| !t.trim().is_empty());
        client
    }

    pub fn save_to_storage(&self, store: &dyn SnapshotStore) {
        match &self.token {
            Some(token) => store.set_item(TOKEN_KEY, token),
            None => store.remove_item(TOKEN_KEY),
        }
    }

    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_auth_headers(
        mut req: reqwest::RequestBuilder,
        token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        req
    }

    async fn request_api<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> ApiResult<T> {
        let req = self.http.post(self.endpoint(path)).json(body);
        let req = Self::with_auth_headers(req, self.token.as_deref());

        let res = req.send().await.map_err(ApiError::network)?;
        let status = res.status();

        if status.is_success() {
            res.json().await.map_err(ApiError::parse)
        } else if status.as_u16() == 401 {
            Err(ApiError::unauthorized())
        } else if status.as_u16() == 404 {
            Err(ApiError::not_found("resource", path))
        } else {
            let body = res.text().await.unwrap_or_default();
            Err(ApiError::http(status.as_u16(), body, path))
        }
    }

    /// For endpoints whose response body carries nothing we need.
    async fn post(&self, path: &str, body: &impl Serialize) -> ApiResult<()> {
        let _: serde_json::Value = self.request_api(path, body).await?;
        Ok(())
    }

    async fn list_notebooks_raw(&self) -> ApiResult<Vec<Notebook>> {
        let data: serde_json::Value = self
            .request_api("/folio/get-notebook-list", &serde_json::json!({}))
            .await?;
        Ok(parse_list(data, "notebook-list"))
    }

    async fn list_trash_raw(&self) -> ApiResult<Vec<Note>> {
        let data: serde_json::Value = self
            .request_api("/folio/get-trash-note-list", &serde_json::json!({}))
            .await?;
        Ok(parse_list(data, "note-list"))
    }

    async fn set_note_deleted(&self, note: &NoteRef, deleted: bool) -> ApiResult<()> {
        self.post(
            "/folio/set-note-deleted",
            &serde_json::json!({
                "note-id": note.note_id,
                "notebook-id": note.notebook_id,
                "is-delete": deleted,
            }),
        )
        .await
    }
}

/// Items under `key` that parse as `T`. Malformed entries are skipped so one
/// bad document does not hide the rest of the listing.
pub(crate) fn parse_list<T: DeserializeOwned>(data: serde_json::Value, key: &str) -> Vec<T> {
    let list = match data {
        serde_json::Value::Object(mut map) => map.remove(key),
        _ => None,
    };
    let Some(serde_json::Value::Array(items)) = list else {
        return Vec::new();
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value(item) {
            Ok(v) => out.push(v),
            Err(e) => tracing::warn!(key, error = %e, "skipping malformed list entry"),
        }
    }
    out
}

/// Polls `fetch` every `interval`. The first successful value is always
/// delivered; later ones only when they changed. A failure is delivered once
/// per outage instead of on every tick.
pub(crate) fn poll_stream<T, F, Fut>(interval: Duration, fetch: F) -> RemoteStream<T>
where
    T: PartialEq + Clone + 'static,
    F: Fn() -> Fut + 'static,
    Fut: Future<Output = ApiResult<T>> + 'static,
{
    struct Poll<T, F> {
        fetch: F,
        last: Option<T>,
        failing: bool,
        started: bool,
    }

    let initial = Poll {
        fetch,
        last: None,
        failing: false,
        started: false,
    };

    stream::unfold(initial, move |mut poll| async move {
        loop {
            if poll.started {
                runtime::sleep(interval).await;
            }
            poll.started = true;

            match (poll.fetch)().await {
                Ok(value) => {
                    poll.failing = false;
                    if poll.last.as_ref() != Some(&value) {
                        poll.last = Some(value.clone());
                        return Some((Ok(value), poll));
                    }
                }
                Err(e) if !poll.failing => {
                    poll.failing = true;
                    return Some((Err(e), poll));
                }
                Err(_) => {}
            }
        }
    })
    .boxed_local()
}

impl NoteBackend for ApiClient {
    async fn list_notebooks(&self) -> ApiResult<Vec<Notebook>> {
        self.list_notebooks_raw().await
    }

    async fn create_notebook(&self, new: NewNotebook) -> ApiResult<Notebook> {
        let data: serde_json::Value = self.request_api("/folio/new-notebook", &new).await?;
        let notebook = data.get("notebook").cloned().unwrap_or(data);
        serde_json::from_value(notebook).map_err(ApiError::parse)
    }

    async fn update_notebook(&self, notebook_id: &str, patch: NotebookPatch) -> ApiResult<()> {
        self.post(
            "/folio/update-notebook",
            &UpdateNotebookRequest { notebook_id, patch },
        )
        .await
    }

    async fn list_notes(&self, notebook_id: &str) -> ApiResult<Vec<Note>> {
        let data: serde_json::Value = self
            .request_api("/folio/get-note-list", &NotebookIdRequest { notebook_id })
            .await?;
        Ok(parse_list(data, "note-list"))
    }

    async fn fetch_note(&self, note: &NoteRef) -> ApiResult<Option<Note>> {
        match self
            .request_api::<NoteEnvelope>("/folio/get-note", note)
            .await
        {
            Ok(envelope) => Ok(envelope.note),
            Err(e) if e.kind == ApiErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_note(&self, new: NewNote) -> ApiResult<Note> {
        let envelope: NoteEnvelope = self.request_api("/folio/new-note", &new).await?;
        envelope
            .note
            .ok_or_else(|| ApiError::parse("create note response is missing the note"))
    }

    async fn update_note(&self, note: &NoteRef, patch: NotePatch) -> ApiResult<()> {
        self.post("/folio/update-note", &UpdateNoteRequest { note, patch })
            .await
    }

    async fn soft_delete_note(&self, note: &NoteRef) -> ApiResult<()> {
        self.set_note_deleted(note, true).await
    }

    async fn restore_note(&self, note: &NoteRef) -> ApiResult<()> {
        self.set_note_deleted(note, false).await
    }

    async fn permanent_delete_note(&self, note: &NoteRef) -> ApiResult<()> {
        self.post("/folio/delete-note", note).await
    }

    async fn commit_batch(&self, batch: WriteBatch) -> ApiResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.post("/folio/commit-batch", &batch).await
    }

    async fn fetch_settings(&self) -> ApiResult<Option<UserSettings>> {
        let envelope: SettingsEnvelope = self
            .request_api("/folio/get-settings", &serde_json::json!({}))
            .await?;
        Ok(envelope.settings)
    }

    async fn save_settings(&self, settings: &UserSettings) -> ApiResult<()> {
        self.post("/folio/update-settings", settings).await
    }

    fn subscribe_note(&self, note: &NoteRef) -> RemoteStream<Option<Note>> {
        let client = self.clone();
        let note = note.clone();
        poll_stream(self.poll_interval, move || {
            let client = client.clone();
            let note = note.clone();
            async move { client.fetch_note(&note).await }
        })
    }

    fn subscribe_notes(&self, notebook_id: &str) -> RemoteStream<Vec<Note>> {
        let client = self.clone();
        let notebook_id = notebook_id.to_string();
        poll_stream(self.poll_interval, move || {
            let client = client.clone();
            let notebook_id = notebook_id.clone();
            async move { client.list_notes(&notebook_id).await }
        })
    }

    fn subscribe_notebooks(&self) -> RemoteStream<Vec<Notebook>> {
        let client = self.clone();
        poll_stream(self.poll_interval, move || {
            let client = client.clone();
            async move { client.list_notebooks_raw().await }
        })
    }

    fn subscribe_trash(&self) -> RemoteStream<Vec<Note>> {
        let client = self.clone();
        poll_stream(self.poll_interval, move || {
            let client = client.clone();
            async move { client.list_trash_raw().await }
        })
    }
}
