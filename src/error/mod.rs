use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiErrorKind {
    Unauthorized,
    Network,
    Http,
    Parse,
    NotFound,
}

/// Failure reported by the persistence/sync backend.
///
/// Only `Network` failures flip the connectivity indicator; every other kind is
/// a definitive answer from the backend.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn network(e: impl std::fmt::Display) -> Self {
        Self {
            kind: ApiErrorKind::Network,
            message: e.to_string(),
        }
    }

    pub fn parse(e: impl std::fmt::Display) -> Self {
        Self {
            kind: ApiErrorKind::Parse,
            message: e.to_string(),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized,
            message: "Unauthorized".to_string(),
        }
    }

    pub fn http(status: u16, body: String, ctx: &str) -> Self {
        Self {
            kind: ApiErrorKind::Http,
            message: format!("{ctx} ({status}): {body}"),
        }
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        Self {
            kind: ApiErrorKind::NotFound,
            message: format!("{what} {id} not found"),
        }
    }

    pub fn is_network(&self) -> bool {
        self.kind == ApiErrorKind::Network
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Rejected before any network call is made.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("title is {len} characters long (max {max})")]
    TitleTooLong { len: usize, max: usize },
    #[error("content is {bytes} bytes when serialized (max {max})")]
    ContentTooLarge { bytes: usize, max: usize },
    #[error("malformed content: {0}")]
    MalformedContent(String),
    #[error("missing {0} id")]
    MissingId(&'static str),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("notebook {id} cannot be its own parent")]
    SelfParent { id: String },
    #[error("moving notebook {id} under {parent} would create a cycle")]
    Cycle { id: String, parent: String },
    #[error("unknown notebook {id}")]
    UnknownNotebook { id: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Backend(#[from] ApiError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("note {note_id} is in the trash and cannot be edited")]
    ReadOnly { note_id: String },
    #[error("no note is loaded for editing")]
    NotLoaded,
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_message_includes_context_and_status() {
        let e = ApiError::http(503, "busy".to_string(), "update note");
        assert_eq!(e.kind, ApiErrorKind::Http);
        assert_eq!(e.to_string(), "update note (503): busy");
        assert!(!e.is_network());
    }

    #[test]
    fn test_sync_error_is_transparent_over_sources() {
        let e: SyncError = ValidationError::TitleTooLong { len: 300, max: 200 }.into();
        assert_eq!(e.to_string(), "title is 300 characters long (max 200)");

        let e: SyncError = ApiError::network("connection reset").into();
        assert_eq!(e.to_string(), "connection reset");
    }
}
