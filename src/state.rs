//! Shared application state: the resolved schema and the store every resource runs against.

use crate::config::{ResourceConfig, Schema};
use crate::error::ConfigError;
use crate::resource::{CollectionResource, SingleResource};
use crate::routes::resource_routes;
use crate::store::Store;
use axum::Router;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub schema: Arc<Schema>,
    pub store: Arc<dyn Store>,
}

impl AppState {
    pub fn new(schema: Arc<Schema>, store: Arc<dyn Store>) -> Self {
        AppState { schema, store }
    }

    /// Default configuration for a model of this schema.
    pub fn resource(&self, model: &str) -> Result<ResourceConfig, ConfigError> {
        ResourceConfig::new(self.schema.clone(), model)
    }

    /// Routes for one model: `collection` serves `collection_path`, `single` serves `single_path`.
    pub fn routes(
        &self,
        collection_path: &str,
        single_path: &str,
        collection: ResourceConfig,
        single: ResourceConfig,
    ) -> Router {
        resource_routes(
            collection_path,
            single_path,
            CollectionResource::new(collection, self.store.clone()),
            SingleResource::new(single, self.store.clone()),
        )
    }
}
