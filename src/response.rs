//! What a resource hands back to the HTTP layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

/// Status and JSON body of a handled request, rendered verbatim.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ResourceResponse {
    pub fn ok(body: Value) -> Self {
        ResourceResponse {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn created(body: Value) -> Self {
        ResourceResponse {
            status: StatusCode::CREATED,
            body,
        }
    }
}

impl IntoResponse for ResourceResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
