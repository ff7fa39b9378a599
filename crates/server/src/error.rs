use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::fmt;

use wrgld_api_types::{CsvLocation, ErrorResponse};
use wrgld_objects::ingest::IngestError;
use wrgld_objects::StoreError;
use wrgld_store::{RefError, TxError};

/// Unified API error type.
///
/// Produces `{"error": "<message>"}` JSON responses; CSV parse failures also
/// carry a `{row, column}` location.
pub struct ApiErr {
    status: StatusCode,
    message: String,
    csv: Option<CsvLocation>,
}

impl ApiErr {
    fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            csv: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }

    pub fn gone(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::GONE, msg)
    }

    pub fn unsupported_media_type(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Build a closure that logs a store/IO error and returns a generic 500.
    /// Handlers never leak internal detail to the client.
    pub fn from_internal<E: fmt::Display>(context: &'static str) -> impl FnOnce(E) -> Self {
        move |e| {
            tracing::error!("{context}: {e}");
            Self::internal("internal server error")
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<StoreError> for ApiErr {
    fn from(e: StoreError) -> Self {
        if e.is_not_found() {
            return ApiErr::not_found(e.to_string());
        }
        tracing::error!("object store error: {e}");
        ApiErr::internal("internal server error")
    }
}

impl From<RefError> for ApiErr {
    fn from(e: RefError) -> Self {
        match e {
            RefError::NotFound(_) | RefError::TxNotFound(_) => ApiErr::not_found(e.to_string()),
            RefError::CasFailed { .. } => ApiErr::conflict(e.to_string()),
            RefError::DuplicateTx(_) => ApiErr::conflict(e.to_string()),
            RefError::TxNotOpen { .. } => ApiErr::bad_request(e.to_string()),
            RefError::Sqlite(e) => {
                tracing::error!("ref store error: {e}");
                ApiErr::internal("internal server error")
            }
        }
    }
}

impl From<TxError> for ApiErr {
    fn from(e: TxError) -> Self {
        match e {
            TxError::Ref(e) => e.into(),
            TxError::Store(e) => e.into(),
            TxError::Precondition { .. } => ApiErr::conflict(e.to_string()),
            TxError::Sqlite(e) => {
                tracing::error!("transaction error: {e}");
                ApiErr::internal("internal server error")
            }
        }
    }
}

impl From<IngestError> for ApiErr {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Csv { row, column, .. } => Self {
                status: StatusCode::BAD_REQUEST,
                message: e.to_string(),
                csv: Some(CsvLocation { row, column }),
            },
            IngestError::MissingPkColumn(_) | IngestError::MissingHeader => {
                ApiErr::bad_request(format!("ingest error: {e}"))
            }
            IngestError::Store(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                csv: self.csv,
            }),
        )
            .into_response()
    }
}
