//! autocrud: declarative CRUD resources over HTTP. Query-string filters, sorting and pagination compiled
//! into fetch plans; typed field codecs in both directions; nested bodies linked one level deep.

pub mod codec;
pub mod config;
pub mod deserializer;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod query;
pub mod record;
pub mod resource;
pub mod response;
pub mod routes;
pub mod serializer;
pub mod session;
pub mod state;
pub mod store;

pub use codec::{CodecPlugin, FieldCodec, FieldValue};
pub use config::{load_from_file, resolve, schema_from_json, FullConfig, ResourceConfig, Schema};
pub use error::{AppError, ConfigError, StoreError};
pub use query::{FetchPlan, OperatorTable, Predicate};
pub use record::{Record, Row};
pub use resource::{CollectionResource, RequestContext, ResourceHooks, ResourceResponse, SingleResource};
pub use routes::resource_routes;
pub use state::AppState;
pub use store::{ensure_tables, MemoryStore, PgStore, Store, Transaction};
