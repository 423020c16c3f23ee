//! A resource client for conventional JSON REST APIs.
//!
//! ## Conventions
//!
//! - Every entity has a collection path, by default its lowercased name
//!   plus `s` (`Post` → `/posts`).
//! - Representations carry their identifier in the `id` field, as text or
//!   integer.
//! - Collection bodies are arrays, optionally wrapped in an envelope object
//!   such as `{"data": [...]}`.
//! - Embedded resources sit under the relationship name. Scalars in those
//!   slots are references by identifier.
//! - Queries send top-level equalities on text, integer and boolean values
//!   as query parameters. Any other predicate is evaluated locally on the
//!   response, and paging is then applied locally too.
//!
//! | Operation | Request |
//! |---|---|
//! | query | `GET /posts?author=7&limit=10&offset=20&sort=-score` |
//! | fetch object | `GET /posts/42` |
//! | create | `POST /posts` |
//! | update | `PUT /posts/42` (or `PATCH`) |
//! | delete | `DELETE /posts/42` |
//! | fetch relationship | `GET /posts/42/comments` |

use crate::client::{ObjectRef, Representations, ResourceClient};
use crate::context::Context;
use crate::error::{FaultResult, MappingError, MappingResult};
use crate::query::{Predicate, Query, SortDirection};
use crate::request::{Method, Request, ResponseMeta};
use faultline_codec::Value;
use faultline_store::{EntitySchema, Model, RelationshipSchema};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Convention-based REST client.
#[derive(Debug, Clone)]
pub struct RestClient {
    model: Arc<Model>,
    id_field: String,
    paths: HashMap<String, String>,
    envelope_keys: Vec<String>,
    /// entity -> schema name -> wire name
    renames: HashMap<String, HashMap<String, String>>,
}

impl RestClient {
    /// Creates a client with default conventions.
    pub fn new(model: impl Into<Arc<Model>>) -> Self {
        Self {
            model: model.into(),
            id_field: "id".to_string(),
            paths: HashMap::new(),
            envelope_keys: Vec::new(),
            renames: HashMap::new(),
        }
    }

    /// Sets the field that carries resource identifiers.
    #[must_use]
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Sets the collection path of an entity.
    #[must_use]
    pub fn with_path(mut self, entity: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = format!("/{}", path.trim_matches('/'));
        self.paths.insert(entity.into(), path);
        self
    }

    /// Adds an envelope key unwrapped from response bodies.
    #[must_use]
    pub fn with_envelope(mut self, key: impl Into<String>) -> Self {
        self.envelope_keys.push(key.into());
        self
    }

    /// Maps a schema attribute or relationship to a different wire name.
    #[must_use]
    pub fn with_rename(
        mut self,
        entity: impl Into<String>,
        name: impl Into<String>,
        wire: impl Into<String>,
    ) -> Self {
        self.renames
            .entry(entity.into())
            .or_default()
            .insert(name.into(), wire.into());
        self
    }

    /// Returns the model.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Collection path of an entity.
    pub fn path_for(&self, entity: &str) -> String {
        self.paths
            .get(entity)
            .cloned()
            .unwrap_or_else(|| format!("/{}s", entity.to_lowercase()))
    }

    /// Wire name of an attribute or relationship.
    pub fn wire_name<'n>(&'n self, entity: &str, name: &'n str) -> &'n str {
        self.renames
            .get(entity)
            .and_then(|names| names.get(name))
            .map_or(name, String::as_str)
    }

    fn unwrap_envelope<'v>(&self, body: &'v Value) -> &'v Value {
        self.envelope_keys
            .iter()
            .find_map(|key| body.get(key))
            .unwrap_or(body)
    }

    fn object_path(&self, object: ObjectRef<'_>) -> FaultResult<String> {
        let rid = object.resource_id().ok_or_else(|| MappingError::MissingIdentifier {
            entity: object.entity.name.clone(),
        })?;
        Ok(format!("{}/{rid}", self.path_for(&object.entity.name)))
    }

    fn body_for(&self, object: ObjectRef<'_>) -> Value {
        let entity = &object.entity.name;
        Value::object(
            object
                .record
                .attributes
                .iter()
                .map(|(name, value)| (self.wire_name(entity, name).to_string(), value.clone())),
        )
    }
}

fn with_context(mut request: Request, context: &Context) -> Request {
    request.headers.extend(context.headers.iter().cloned());
    request
}

fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Integer(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn expressible(predicate: &Predicate) -> bool {
    match predicate {
        Predicate::All => true,
        Predicate::Eq(_, value) => query_value(value).is_some(),
        Predicate::And(all) => all.iter().all(expressible),
        _ => false,
    }
}

impl ResourceClient for RestClient {
    fn representations(
        &self,
        body: &Value,
        entity: &EntitySchema,
        _meta: &ResponseMeta,
    ) -> MappingResult<Representations> {
        match self.unwrap_envelope(body) {
            Value::Array(items) => Ok(Representations::Many(items.clone())),
            Value::Null => Ok(Representations::Many(Vec::new())),
            map @ Value::Map(_) => Ok(Representations::One(map.clone())),
            other => Err(MappingError::invalid(
                &entity.name,
                format!("response body is {}", other.kind()),
            )),
        }
    }

    fn related_representations(
        &self,
        representation: &Value,
        entity: &EntitySchema,
        _meta: &ResponseMeta,
    ) -> MappingResult<BTreeMap<String, Value>> {
        Ok(entity
            .relationships
            .iter()
            .filter_map(|rel| {
                representation
                    .get(self.wire_name(&entity.name, &rel.name))
                    .map(|value| (rel.name.clone(), value.clone()))
            })
            .collect())
    }

    fn resource_identifier(
        &self,
        representation: &Value,
        _entity: &EntitySchema,
        _meta: &ResponseMeta,
    ) -> Option<String> {
        representation
            .get(&self.id_field)
            .and_then(Value::as_identifier)
    }

    fn attributes(
        &self,
        representation: &Value,
        entity: &EntitySchema,
        _meta: &ResponseMeta,
    ) -> MappingResult<BTreeMap<String, Value>> {
        Ok(entity
            .attributes
            .iter()
            .filter_map(|attr| {
                representation
                    .get(self.wire_name(&entity.name, &attr.name))
                    .map(|value| (attr.name.clone(), value.clone()))
            })
            .collect())
    }

    fn query_request(&self, query: &Query, context: &Context) -> FaultResult<Request> {
        let mut request = Request::get(self.path_for(&query.entity));
        for (name, value) in query.predicate.equalities() {
            if let Some(value) = query_value(value) {
                request = request.with_query(self.wire_name(&query.entity, name), value);
            }
        }
        if !query.sort.is_empty() {
            let keys: Vec<String> = query
                .sort
                .iter()
                .map(|key| {
                    let wire = self.wire_name(&query.entity, &key.attribute);
                    match key.direction {
                        SortDirection::Ascending => wire.to_string(),
                        SortDirection::Descending => format!("-{wire}"),
                    }
                })
                .collect();
            request = request.with_query("sort", keys.join(","));
        }
        if self.sends_predicate(query) {
            if let Some(limit) = query.limit {
                request = request.with_query("limit", limit.to_string());
            }
            if let Some(offset) = query.offset {
                request = request.with_query("offset", offset.to_string());
            }
        }
        Ok(with_context(request, context))
    }

    fn sends_predicate(&self, query: &Query) -> bool {
        expressible(&query.predicate)
    }

    fn object_request(
        &self,
        method: Method,
        object: ObjectRef<'_>,
        context: &Context,
    ) -> FaultResult<Request> {
        let request = match method {
            Method::Get | Method::Delete => Request::new(method, self.object_path(object)?),
            Method::Put | Method::Patch => {
                Request::new(method, self.object_path(object)?).with_body(self.body_for(object))
            }
            Method::Post => Request::new(method, self.path_for(&object.entity.name))
                .with_body(self.body_for(object)),
        };
        Ok(with_context(request, context))
    }

    fn relationship_request(
        &self,
        method: Method,
        relationship: &RelationshipSchema,
        object: ObjectRef<'_>,
        context: &Context,
    ) -> FaultResult<Request> {
        let path = format!(
            "{}/{}",
            self.object_path(object)?,
            self.wire_name(&object.entity.name, &relationship.name)
        );
        Ok(with_context(Request::new(method, path), context))
    }
}
