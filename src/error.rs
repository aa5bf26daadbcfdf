#[cfg(feature = "web")]
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Failures of the inventory tables and their snapshot file.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot encoding failed: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("No product with SKU {sku} at {location}")]
    ProductNotFound { sku: String, location: String },

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Failures while turning an uploaded CSV into rows.
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("file missing")]
    MissingFile,

    #[error("File is not valid UTF-8")]
    Encoding,

    #[error("Failed to read CSV row {row}: {source}")]
    Csv {
        row: usize,
        #[source]
        source: csv::Error,
    },
}

/// Failures writing an export.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV buffer flush failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV output is not UTF-8")]
    Encoding,

    #[cfg(feature = "web")]
    #[error("XLSX write failed: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

/// Failures of the user directory.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("email, password and role (Edit|View) are required")]
    MissingFields,

    #[error("Email address is already registered")]
    EmailTaken,

    #[error("User not found")]
    UserNotFound,

    #[error("Password hashing failed")]
    Hashing,

    #[error("Failed to access users file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse users data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("User directory lock poisoned")]
    Poisoned,
}

/// Error returned by HTTP handlers.
#[cfg(feature = "web")]
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Not signed in")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Misconfigured(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[cfg(feature = "web")]
impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Store(StoreError::ProductNotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Import(_) => StatusCode::BAD_REQUEST,
            AppError::Export(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Auth(AuthError::MissingFields) | AppError::Auth(AuthError::EmailTaken) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Auth(AuthError::UserNotFound) => StatusCode::NOT_FOUND,
            AppError::Auth(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(feature = "web")]
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        }

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
