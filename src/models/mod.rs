use crate::config::SyncConfig;
use crate::error::ValidationError;
use crate::util::is_blank;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

pub const DEFAULT_TITLE: &str = "Untitled";

/// Ordered tree of rich-text blocks. Opaque beyond "a JSON array".
pub type NoteContent = serde_json::Value;

/// One empty paragraph, what a freshly created note opens with.
pub fn empty_content() -> NoteContent {
    serde_json::json!([{ "type": "paragraph", "content": [] }])
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Note {
    pub id: String,
    pub notebook_id: String,
    pub title: String,
    #[serde(default = "empty_content")]
    pub content: NoteContent,
    pub created_ms: i64,
    pub updated_ms: i64,
    /// Soft-delete marker; `Some` means the note is in the trash.
    #[serde(default)]
    pub deleted_ms: Option<i64>,
    #[serde(default)]
    pub is_private: bool,
}

impl Note {
    pub fn is_trashed(&self) -> bool {
        self.deleted_ms.is_some()
    }

    pub fn note_ref(&self) -> NoteRef {
        NoteRef::new(&self.id, &self.notebook_id)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Notebook {
    pub id: String,
    pub title: String,
    /// `None` for root notebooks.
    #[serde(default)]
    pub parent_id: Option<String>,
    pub created_ms: i64,
    pub updated_ms: i64,
    #[serde(default)]
    pub deleted_ms: Option<i64>,
}

impl Notebook {
    pub fn is_trashed(&self) -> bool {
        self.deleted_ms.is_some()
    }
}

/// A note is addressed by its id *within* its owning notebook.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub struct NoteRef {
    pub note_id: String,
    pub notebook_id: String,
}

impl NoteRef {
    pub fn new(note_id: impl Into<String>, notebook_id: impl Into<String>) -> Self {
        Self {
            note_id: note_id.into(),
            notebook_id: notebook_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if is_blank(&self.note_id) {
            return Err(ValidationError::MissingId("note"));
        }
        if is_blank(&self.notebook_id) {
            return Err(ValidationError::MissingId("notebook"));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct NotePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<NoteContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_private: Option<bool>,
}

impl NotePatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn content(content: NoteContent) -> Self {
        Self {
            content: Some(content),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.is_private.is_none()
    }

    pub fn apply_to(&self, note: &mut Note) {
        if let Some(title) = &self.title {
            note.title = title.clone();
        }
        if let Some(content) = &self.content {
            note.content = content.clone();
        }
        if let Some(is_private) = self.is_private {
            note.is_private = is_private;
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct NotebookPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// `Some(None)` moves the notebook to the root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Option<String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct NewNote {
    pub notebook_id: String,
    pub title: String,
    pub content: NoteContent,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct NewNotebook {
    pub title: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ThemeColor {
    #[default]
    Blue,
    Red,
    Yellow,
    Green,
    Grey,
    Black,
    Purple,
    Pink,
}

/// Appearance preferences that follow the account across devices.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct UserSettings {
    pub dark_mode: bool,
    pub theme_color: ThemeColor,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            dark_mode: true,
            theme_color: ThemeColor::default(),
        }
    }
}

pub fn validate_title(title: &str, config: &SyncConfig) -> Result<(), ValidationError> {
    let len = title.chars().count();
    if len > config.max_title_len {
        return Err(ValidationError::TitleTooLong {
            len,
            max: config.max_title_len,
        });
    }
    Ok(())
}

pub fn validate_content(content: &NoteContent, config: &SyncConfig) -> Result<(), ValidationError> {
    if !content.is_array() {
        return Err(ValidationError::MalformedContent(
            "expected an array of blocks".to_string(),
        ));
    }
    let bytes = serde_json::to_vec(content)
        .map_err(|e| ValidationError::MalformedContent(e.to_string()))?
        .len();
    if bytes > config.max_content_bytes {
        return Err(ValidationError::ContentTooLarge {
            bytes,
            max: config.max_content_bytes,
        });
    }
    Ok(())
}

/// Non-deleted notes, most recently updated first.
pub fn active_notes(notes: Vec<Note>) -> Vec<Note> {
    let mut out: Vec<Note> = notes.into_iter().filter(|n| !n.is_trashed()).collect();
    out.sort_by(|a, b| b.updated_ms.cmp(&a.updated_ms));
    out
}

/// Trashed notes, most recently deleted first.
pub fn trashed_notes(notes: Vec<Note>) -> Vec<Note> {
    let mut out: Vec<Note> = notes.into_iter().filter(|n| n.is_trashed()).collect();
    out.sort_by(|a, b| b.deleted_ms.cmp(&a.deleted_ms));
    out
}

/// Splits into (active sorted by title ignoring case, trashed by deletion time desc).
pub fn partition_notebooks(notebooks: Vec<Notebook>) -> (Vec<Notebook>, Vec<Notebook>) {
    let (mut trashed, mut active): (Vec<Notebook>, Vec<Notebook>) =
        notebooks.into_iter().partition(|nb| nb.is_trashed());
    active.sort_by_key(|nb| nb.title.to_lowercase());
    trashed.sort_by(|a, b| b.deleted_ms.cmp(&a.deleted_ms));
    (active, trashed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: &str, updated_ms: i64, deleted_ms: Option<i64>) -> Note {
        Note {
            id: id.to_string(),
            notebook_id: "nb".to_string(),
            title: id.to_string(),
            content: empty_content(),
            created_ms: 0,
            updated_ms,
            deleted_ms,
            is_private: false,
        }
    }

    #[test]
    fn test_note_deserialize_fills_optional_fields() {
        let json = r#"{
            "id": "n1",
            "notebook-id": "nb1",
            "title": "Groceries",
            "created-ms": 1,
            "updated-ms": 2
        }"#;
        let n: Note = serde_json::from_str(json).expect("note should parse");
        assert_eq!(n.content, empty_content());
        assert!(!n.is_trashed());
        assert!(!n.is_private);
        assert_eq!(n.note_ref(), NoteRef::new("n1", "nb1"));
    }

    #[test]
    fn test_note_patch_serializes_only_present_fields() {
        let v = serde_json::to_value(NotePatch::title("Hello")).expect("should serialize");
        assert_eq!(v, serde_json::json!({ "title": "Hello" }));
        assert!(NotePatch::default().is_empty());
    }

    #[test]
    fn test_note_ref_requires_both_ids() {
        assert_eq!(
            NoteRef::new("", "nb").validate(),
            Err(ValidationError::MissingId("note"))
        );
        assert_eq!(
            NoteRef::new("n", "  ").validate(),
            Err(ValidationError::MissingId("notebook"))
        );
        assert!(NoteRef::new("n", "nb").validate().is_ok());
    }

    #[test]
    fn test_validate_content_rejects_non_arrays_and_oversized() {
        let config = SyncConfig {
            max_content_bytes: 64,
            ..Default::default()
        };
        assert!(matches!(
            validate_content(&serde_json::json!({"type": "paragraph"}), &config),
            Err(ValidationError::MalformedContent(_))
        ));

        let big = serde_json::json!([{ "type": "paragraph", "content": "x".repeat(100) }]);
        assert!(matches!(
            validate_content(&big, &config),
            Err(ValidationError::ContentTooLarge { max: 64, .. })
        ));
        assert!(validate_content(&empty_content(), &config).is_ok());
    }

    #[test]
    fn test_validate_title_counts_chars_not_bytes() {
        let config = SyncConfig {
            max_title_len: 3,
            ..Default::default()
        };
        assert!(validate_title("日本語", &config).is_ok());
        assert_eq!(
            validate_title("日本語!", &config),
            Err(ValidationError::TitleTooLong { len: 4, max: 3 })
        );
    }

    #[test]
    fn test_list_orders() {
        let notes = vec![
            note("old", 1, None),
            note("gone", 5, Some(10)),
            note("new", 3, None),
            note("gone-later", 2, Some(20)),
        ];
        let active: Vec<_> = active_notes(notes.clone()).into_iter().map(|n| n.id).collect();
        assert_eq!(active, vec!["new", "old"]);
        let trash: Vec<_> = trashed_notes(notes).into_iter().map(|n| n.id).collect();
        assert_eq!(trash, vec!["gone-later", "gone"]);
    }

    #[test]
    fn test_partition_notebooks_sorts_titles_case_insensitively() {
        let nb = |id: &str, title: &str, deleted_ms| Notebook {
            id: id.to_string(),
            title: title.to_string(),
            parent_id: None,
            created_ms: 0,
            updated_ms: 0,
            deleted_ms,
        };
        let (active, trashed) = partition_notebooks(vec![
            nb("1", "beta", None),
            nb("2", "Alpha", None),
            nb("3", "zeta", Some(5)),
        ]);
        let titles: Vec<_> = active.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "beta"]);
        assert_eq!(trashed.len(), 1);
    }
}
