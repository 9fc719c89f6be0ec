//! Errors raised while simulating a request.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// A downstream route could not be reached.
    #[error("error calling {target}: {source}")]
    Route {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    /// A response body could not be encoded.
    #[error("failed to encode response body: {0}")]
    Encode(#[from] serde_json::Error),
}

impl IntoResponse for SimError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}
