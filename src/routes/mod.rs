//! Route builders.

pub mod resource;

pub use resource::{resource_routes, DEFAULT_BODY_LIMIT};
