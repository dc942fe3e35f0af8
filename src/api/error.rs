use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::error;
use crate::error::LibraryError;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("error in the request body")]
    UnprocessableEntity {
        errors: HashMap<Cow<'static, str>, Vec<Cow<'static, str>>>,
    },

    #[error(transparent)]
    Library(#[from] LibraryError),
}

impl ApiError {
    pub fn unprocessable_entity<K, V>(errors: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Cow<'static, str>>,
        V: Into<Cow<'static, str>>,
    {
        let mut error_map = HashMap::new();

        for (key, val) in errors {
            error_map
                .entry(key.into())
                .or_insert_with(Vec::new)
                .push(val.into());
        }

        Self::UnprocessableEntity { errors: error_map }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnprocessableEntity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Library(e) => match e {
                LibraryError::NotFound(_) => StatusCode::NOT_FOUND,
                LibraryError::Conflict(_) => StatusCode::CONFLICT,
                LibraryError::MalformedFilename(_)
                | LibraryError::InvalidInput(_)
                | LibraryError::Upload(_) => StatusCode::UNPROCESSABLE_ENTITY,
                LibraryError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
                LibraryError::SyncTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                LibraryError::CorruptStore { .. }
                | LibraryError::Git { .. }
                | LibraryError::Io(_)
                | LibraryError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

#[derive(serde::Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    retryable: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            Self::UnprocessableEntity { errors } => {
                #[derive(serde::Serialize)]
                struct Errors {
                    errors: HashMap<Cow<'static, str>, Vec<Cow<'static, str>>>,
                }

                (status, Json(Errors { errors })).into_response()
            }

            Self::Library(e) => {
                if status.is_server_error() {
                    error!("{} failed: {:?}", e.kind(), e);
                }
                let body = ErrorBody { error: e.kind(), message: e.to_string(), retryable: e.is_retryable() };
                (status, Json(body)).into_response()
            }
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(value: std::io::Error) -> Self {
        Self::Library(LibraryError::Io(value))
    }
}
