//! Build a `RequestContext` from an axum request: method, query pairs, path parameters, headers, JSON body.

use crate::error::AppError;
use crate::resource::RequestContext;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Query, RawPathParams, Request},
};

#[async_trait]
impl<S> FromRequest<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let path_params = match RawPathParams::from_request_parts(&mut parts, state).await {
            Ok(params) => params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Err(_) => Vec::new(),
        };
        // pairs in request order, repeated keys kept
        let params = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map(|q| q.0)
            .map_err(|e| AppError::bad_request(format!("Malformed query string: {}", e)))?;
        let method = parts.method.clone();
        let headers = parts.headers.clone();

        let bytes = Bytes::from_request(Request::from_parts(parts, body), state)
            .await
            .map_err(|e| AppError::bad_request(format!("Could not read request body: {}", e)))?;
        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(
                serde_json::from_slice(&bytes)
                    .map_err(|e| AppError::bad_request(format!("Malformed JSON body: {}", e)))?,
            )
        };
        Ok(RequestContext {
            method,
            params,
            path_params,
            headers,
            body,
            identity: None,
        })
    }
}
