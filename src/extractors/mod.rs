//! Request extractors.

pub mod context;
