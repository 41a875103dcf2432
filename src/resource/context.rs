//! Per-request input handed to resources and hooks.

use crate::error::AppError;
use axum::http::{HeaderMap, Method};
use serde_json::Value;

#[derive(Clone, Debug)]
pub struct RequestContext {
    pub method: Method,
    /// Query-string pairs in request order.
    pub params: Vec<(String, String)>,
    /// Path parameters in route order.
    pub path_params: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    /// Set by an `Identifier`; read by authorizers and hooks.
    pub identity: Option<Value>,
}

impl RequestContext {
    pub fn new(method: Method) -> Self {
        RequestContext {
            method,
            params: Vec::new(),
            path_params: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            identity: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_path(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|(k, _)| k == name)
    }

    /// Last value given for `name`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.iter().rev().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    /// Comma-separated list parameter; empty items are dropped.
    pub fn param_list(&self, name: &str) -> Option<Vec<String>> {
        self.param(name).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    /// Non-negative integer parameter. Present but malformed is a client error.
    pub fn param_u64(&self, name: &str) -> Result<Option<u64>, AppError> {
        match self.param(name) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| AppError::bad_request(format!("The \"{}\" parameter is invalid", name))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_helpers() {
        let ctx = RequestContext::new(Method::GET)
            .with_param("__sort", "name,-id")
            .with_param("__limit", "2")
            .with_param("__offset", "-1");
        assert_eq!(ctx.param_list("__sort").unwrap(), vec!["name", "-id"]);
        assert_eq!(ctx.param_u64("__limit").unwrap(), Some(2));
        assert!(ctx.param_u64("__offset").is_err());
        assert_eq!(ctx.param_u64("__missing").unwrap(), None);
    }
}
