//! Per-route resource configuration. Built once at route registration and read-only afterwards.

use crate::codec::{CodecPlugin, FieldCodec, FieldValue, GeometryAxes};
use crate::config::{Model, Schema};
use crate::error::{AppError, ConfigError};
use crate::query::{OperatorTable, Predicate, Projection};
use crate::record::{Record, Row};
use crate::resource::{Authorizer, Identifier, IncludeResolver, NoHooks, RequestContext, ResourceHooks};
use axum::http::Method;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Filter built from a path value for a lookup-only attribute.
pub type LookupFn = Arc<dyn Fn(&str) -> Result<Predicate, AppError> + Send + Sync>;

/// Where an external (path) attribute name points.
#[derive(Clone)]
pub enum AttrTarget {
    Column(String),
    /// Not an attribute of the model at all.
    Ignore,
    /// Only meaningful for lookups; skipped when building records.
    Custom(LookupFn),
}

impl fmt::Debug for AttrTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrTarget::Column(c) => f.debug_tuple("Column").field(c).finish(),
            AttrTarget::Ignore => f.write_str("Ignore"),
            AttrTarget::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

pub type AttrMap = HashMap<String, AttrTarget>;

pub type FieldsFn = Arc<dyn Fn(&RequestContext, &Row) -> Option<Vec<String>> + Send + Sync>;

/// Which columns a response carries.
#[derive(Clone, Default)]
pub enum ResponseFields {
    #[default]
    All,
    Static(Vec<String>),
    /// Decided per request and record; `None` means all columns.
    Dynamic(FieldsFn),
}

impl ResponseFields {
    pub fn resolve(&self, ctx: &RequestContext, row: &Row) -> Option<Vec<String>> {
        match self {
            ResponseFields::All => None,
            ResponseFields::Static(fields) => Some(fields.clone()),
            ResponseFields::Dynamic(f) => f(ctx, row),
        }
    }
}

pub type MetaFn = Arc<dyn Fn(&Row) -> Value + Send + Sync>;
pub type DynamicMetaFn = Arc<dyn Fn(&RequestContext, &Row) -> Option<Map<String, Value>> + Send + Sync>;

/// Producers of the per-record meta block.
#[derive(Clone, Default)]
pub enum MetaSpec {
    #[default]
    None,
    Static(Vec<(String, MetaFn)>),
    /// Returning `None` emits no meta block.
    Dynamic(DynamicMetaFn),
}

impl MetaSpec {
    pub fn produce(&self, ctx: &RequestContext, row: &Row) -> Option<Map<String, Value>> {
        match self {
            MetaSpec::None => None,
            MetaSpec::Static(entries) if entries.is_empty() => None,
            MetaSpec::Static(entries) => Some(entries.iter().map(|(k, f)| (k.clone(), f(row))).collect()),
            MetaSpec::Dynamic(f) => f(ctx, row),
        }
    }
}

/// A sub-resource that single GET may expand through `__included`.
#[derive(Clone)]
pub struct IncludedSpec {
    pub link: Arc<dyn IncludeResolver>,
    pub response_fields: ResponseFields,
    pub geometry_axes: GeometryAxes,
}

impl IncludedSpec {
    pub fn new(link: Arc<dyn IncludeResolver>) -> Self {
        IncludedSpec {
            link,
            response_fields: ResponseFields::All,
            geometry_axes: GeometryAxes::new(),
        }
    }

    pub fn fields(mut self, fields: ResponseFields) -> Self {
        self.response_fields = fields;
        self
    }

    pub fn axes(mut self, axes: GeometryAxes) -> Self {
        self.geometry_axes = axes;
        self
    }
}

/// Produces a value for a key the body left out.
pub type DefaultFn = Arc<dyn Fn(&RequestContext, &Record) -> FieldValue + Send + Sync>;

/// Body shapes a POST accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PostTypes {
    pub object: bool,
    pub array: bool,
}

impl Default for PostTypes {
    fn default() -> Self {
        PostTypes {
            object: true,
            array: true,
        }
    }
}

/// What happens to body keys that are neither column, writable property nor linkable relationship.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UnknownKeys {
    #[default]
    Drop,
    Reject,
}

#[derive(Clone)]
pub struct ResourceConfig {
    pub schema: Arc<Schema>,
    pub model: Arc<Model>,
    pub collection_methods: Vec<Method>,
    pub single_methods: Vec<Method>,
    pub attr_map: AttrMap,
    pub inbound_attr_map: Option<AttrMap>,
    pub lookup_attr_map: Option<AttrMap>,
    pub response_fields: ResponseFields,
    pub default_sort: Option<Vec<String>>,
    pub extra_select: Vec<Projection>,
    pub meta: MetaSpec,
    pub hooks: Arc<dyn ResourceHooks>,
    pub identifiers: HashMap<Method, Arc<dyn Identifier>>,
    pub authorizers: HashMap<Method, Arc<dyn Authorizer>>,
    pub geometry_axes: GeometryAxes,
    pub codec: FieldCodec,
    pub param_filters: OperatorTable,
    pub allow_subresources: bool,
    pub post_types: PostTypes,
    pub allow_put_insert: bool,
    pub allowed_included: HashMap<String, IncludedSpec>,
    /// Collection PATCH `add` paths and the model each creates. Empty means `/` creates this model.
    pub patch_paths: Vec<(String, Arc<Model>)>,
    pub post_defaults: Vec<(String, DefaultFn)>,
    pub put_defaults: Vec<(String, DefaultFn)>,
    pub patch_defaults: Vec<(String, DefaultFn)>,
    pub unknown_keys: UnknownKeys,
}

impl fmt::Debug for ResourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceConfig")
            .field("model", &self.model.name)
            .field("collection_methods", &self.collection_methods)
            .field("single_methods", &self.single_methods)
            .field("default_sort", &self.default_sort)
            .field("extra_select", &self.extra_select)
            .field("allow_subresources", &self.allow_subresources)
            .field("allow_put_insert", &self.allow_put_insert)
            .field("unknown_keys", &self.unknown_keys)
            .finish_non_exhaustive()
    }
}

impl ResourceConfig {
    pub fn new(schema: Arc<Schema>, model: &str) -> Result<Self, ConfigError> {
        let model = schema.model(model).cloned().ok_or_else(|| ConfigError::MissingReference {
            kind: "model",
            id: model.to_string(),
        })?;
        Ok(ResourceConfig {
            schema,
            model,
            collection_methods: vec![Method::GET, Method::POST, Method::PATCH],
            single_methods: vec![Method::GET, Method::PUT, Method::PATCH, Method::DELETE],
            attr_map: AttrMap::new(),
            inbound_attr_map: None,
            lookup_attr_map: None,
            response_fields: ResponseFields::All,
            default_sort: None,
            extra_select: Vec::new(),
            meta: MetaSpec::None,
            hooks: Arc::new(NoHooks),
            identifiers: HashMap::new(),
            authorizers: HashMap::new(),
            geometry_axes: GeometryAxes::new(),
            codec: FieldCodec::new(),
            param_filters: OperatorTable::default(),
            allow_subresources: false,
            post_types: PostTypes::default(),
            allow_put_insert: false,
            allowed_included: HashMap::new(),
            patch_paths: Vec::new(),
            post_defaults: Vec::new(),
            put_defaults: Vec::new(),
            patch_defaults: Vec::new(),
            unknown_keys: UnknownKeys::Drop,
        })
    }

    pub fn collection_methods(mut self, methods: Vec<Method>) -> Self {
        self.collection_methods = methods;
        self
    }

    pub fn single_methods(mut self, methods: Vec<Method>) -> Self {
        self.single_methods = methods;
        self
    }

    /// Shared remap for both inbound and lookup use, unless overridden.
    pub fn map_attr(mut self, external: impl Into<String>, target: AttrTarget) -> Self {
        self.attr_map.insert(external.into(), target);
        self
    }

    pub fn inbound_attr_map(mut self, map: AttrMap) -> Self {
        self.inbound_attr_map = Some(map);
        self
    }

    pub fn lookup_attr_map(mut self, map: AttrMap) -> Self {
        self.lookup_attr_map = Some(map);
        self
    }

    pub fn response_fields(mut self, fields: ResponseFields) -> Self {
        self.response_fields = fields;
        self
    }

    pub fn default_sort<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.default_sort = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn extra_select(mut self, extra: Vec<Projection>) -> Self {
        self.extra_select = extra;
        self
    }

    pub fn meta(mut self, meta: MetaSpec) -> Self {
        self.meta = meta;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ResourceHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn identifier(mut self, method: Method, identifier: Arc<dyn Identifier>) -> Self {
        self.identifiers.insert(method, identifier);
        self
    }

    pub fn authorizer(mut self, method: Method, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizers.insert(method, authorizer);
        self
    }

    pub fn geometry_axes<S: Into<String>>(mut self, attribute: impl Into<String>, axes: impl IntoIterator<Item = S>) -> Self {
        self.geometry_axes
            .insert(attribute.into(), axes.into_iter().map(Into::into).collect());
        self
    }

    pub fn naive_datetime(mut self, attribute: impl Into<String>) -> Self {
        self.codec = self.codec.naive(attribute);
        self
    }

    pub fn datetime_in_epoch_seconds(mut self, attribute: impl Into<String>) -> Self {
        self.codec = self.codec.epoch_seconds(attribute);
        self
    }

    pub fn codec_plugin(mut self, plugin: Arc<dyn CodecPlugin>) -> Self {
        self.codec = self.codec.plugin(plugin);
        self
    }

    pub fn param_filters(mut self, table: OperatorTable) -> Self {
        self.param_filters = table;
        self
    }

    pub fn allow_subresources(mut self, allow: bool) -> Self {
        self.allow_subresources = allow;
        self
    }

    pub fn post_types(mut self, object: bool, array: bool) -> Self {
        self.post_types = PostTypes { object, array };
        self
    }

    pub fn allow_put_insert(mut self, allow: bool) -> Self {
        self.allow_put_insert = allow;
        self
    }

    pub fn include(mut self, name: impl Into<String>, spec: IncludedSpec) -> Self {
        self.allowed_included.insert(name.into(), spec);
        self
    }

    pub fn patch_path(mut self, path: impl Into<String>, model: Arc<Model>) -> Self {
        self.patch_paths.push((path.into(), model));
        self
    }

    pub fn post_default(mut self, attribute: impl Into<String>, f: DefaultFn) -> Self {
        self.post_defaults.push((attribute.into(), f));
        self
    }

    pub fn put_default(mut self, attribute: impl Into<String>, f: DefaultFn) -> Self {
        self.put_defaults.push((attribute.into(), f));
        self
    }

    pub fn patch_default(mut self, attribute: impl Into<String>, f: DefaultFn) -> Self {
        self.patch_defaults.push((attribute.into(), f));
        self
    }

    pub fn unknown_keys(mut self, policy: UnknownKeys) -> Self {
        self.unknown_keys = policy;
        self
    }

    /// Target of an inbound (record-building) path attribute.
    pub fn inbound_target(&self, name: &str) -> AttrTarget {
        self.inbound_attr_map
            .as_ref()
            .unwrap_or(&self.attr_map)
            .get(name)
            .cloned()
            .unwrap_or_else(|| AttrTarget::Column(name.to_string()))
    }

    /// Target of a lookup path attribute.
    pub fn lookup_target(&self, name: &str) -> AttrTarget {
        self.lookup_attr_map
            .as_ref()
            .unwrap_or(&self.attr_map)
            .get(name)
            .cloned()
            .unwrap_or_else(|| AttrTarget::Column(name.to_string()))
    }

    /// `(path, model)` pairs accepted by a collection PATCH.
    pub fn patch_targets(&self) -> Vec<(String, Arc<Model>)> {
        if self.patch_paths.is_empty() {
            vec![("/".to_string(), self.model.clone())]
        } else {
            self.patch_paths.clone()
        }
    }
}
