//! Gateway error responses.
//!
//! # Responsibilities
//! - Turn a `Status` returned by a route into an HTTP response
//! - Provide the default JSON error body
//!
//! # Design Decisions
//! - The translator is a plain shared function, replaceable through the builder
//! - HTTP status follows the usual RPC-code-to-HTTP mapping

use axum::body::Body;
use axum::http::Response;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

use crate::rpc::status::Status;

/// Converts a route failure into the response sent to the client.
pub type ErrorTranslator = Arc<dyn Fn(&Status) -> Response<Body> + Send + Sync>;

/// `{"code": <rpc code>, "message": "...", "details": []}` with the mapped HTTP status.
pub fn default_error_response(status: &Status) -> Response<Body> {
    let body = serde_json::json!({
        "code": status.code().as_i32(),
        "message": status.message(),
        "details": [],
    });
    (status.code().http_status(), Json(body)).into_response()
}

pub fn default_translator() -> ErrorTranslator {
    Arc::new(default_error_response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn default_body_carries_code_and_message() {
        let response = default_error_response(&Status::not_found("no route for GET /nope"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], 5);
        assert_eq!(json["message"], "no route for GET /nope");
        assert_eq!(json["details"], serde_json::json!([]));
    }

    #[test]
    fn invalid_argument_maps_to_bad_request() {
        let translate = default_translator();
        let response = translate(&Status::invalid_argument("bad"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
