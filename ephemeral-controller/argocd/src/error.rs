use reqwest::StatusCode;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("application query must set at least one field")]
    EmptyQuery,

    #[error("application name and namespace must be set")]
    MissingIdentity,

    #[error("application not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("login failed with {status}: {message}")]
    Login { status: StatusCode, message: String },

    #[error("argocd responded with {status}: {message}")]
    Api { status: StatusCode, message: String },

    #[error("session token is not a valid header value")]
    InvalidToken,

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// gRPC status codes that the API gateway embeds in error bodies.
const GRPC_NOT_FOUND: i32 = 5;
const GRPC_UNAUTHENTICATED: i32 = 16;

// === impl Error ===

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    pub(crate) fn from_response(status: StatusCode, code: Option<i32>, message: String) -> Self {
        if status == StatusCode::UNAUTHORIZED || code == Some(GRPC_UNAUTHENTICATED) {
            return Self::Unauthorized(message);
        }
        if status == StatusCode::NOT_FOUND || code == Some(GRPC_NOT_FOUND) {
            return Self::NotFound(message);
        }
        Self::Api { status, message }
    }
}
