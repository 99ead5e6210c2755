use rocket::http::Status;
use rocket::serde::json::Json;

/// Error taxonomy shared by every component and both transports.
///
/// Storage and validation errors propagate to the API boundary unchanged.
/// Mailbox saturation and transient storage failures surface as
/// `Unavailable` so clients can retry or fall back to the local queue.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn http_status(&self) -> Status {
        match self {
            Error::NotFound(_) => Status::NotFound,
            Error::AlreadyExists(_) => Status::Conflict,
            Error::InvalidArgument(_) => Status::BadRequest,
            Error::PermissionDenied(_) => Status::Forbidden,
            Error::Unavailable(_) | Error::Cancelled => Status::ServiceUnavailable,
            Error::Internal(_) => Status::InternalServerError,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::PermissionDenied(_) => "permission_denied",
            Error::Unavailable(_) => "unavailable",
            Error::Internal(_) => "internal",
            Error::Cancelled => "cancelled",
        }
    }
}

/// The error shape every REST route returns (status plus JSON body).
pub type ApiError = (Status, Json<serde_json::Value>);

impl From<Error> for ApiError {
    fn from(e: Error) -> ApiError {
        (
            e.http_status(),
            Json(serde_json::json!({"error": e.to_string(), "code": e.code()})),
        )
    }
}

impl From<Error> for tonic::Status {
    fn from(e: Error) -> tonic::Status {
        let msg = e.to_string();
        match e {
            Error::NotFound(_) => tonic::Status::not_found(msg),
            Error::AlreadyExists(_) => tonic::Status::already_exists(msg),
            Error::InvalidArgument(_) => tonic::Status::invalid_argument(msg),
            Error::PermissionDenied(_) => tonic::Status::permission_denied(msg),
            Error::Unavailable(_) => tonic::Status::unavailable(msg),
            Error::Internal(_) => tonic::Status::internal(msg),
            Error::Cancelled => tonic::Status::cancelled(msg),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Error {
        match e {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound("row".to_string()),
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::DatabaseBusy
                    || err.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                Error::Unavailable(e.to_string())
            }
            other => Error::Internal(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
