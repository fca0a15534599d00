//! HTTP/SSE control surface
//!
//! Session lifecycle, navigation and preset control, the frame push endpoint
//! for an external feature extractor, and the realtime event stream.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, run, AppContext};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::Error;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::CaptureUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidPreset(_) | Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::EvaluationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Common(ppc_common::Error::UnknownValue { .. })
            | Error::Common(ppc_common::Error::InvalidPayload { .. }) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(json!({
                "status": "error",
                "error": self.to_string(),
            })),
        )
            .into_response()
    }
}
