//! The pluggable resource client.

use crate::context::Context;
use crate::error::{FaultError, FaultResult, MappingError, MappingResult};
use crate::query::Query;
use crate::request::{Method, Request, ResponseMeta};
use faultline_codec::Value;
use faultline_store::{EntitySchema, ObjectId, ObjectRecord, RelationshipSchema};
use std::collections::BTreeMap;

/// Top-level representations extracted from a response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Representations {
    /// The body describes one resource.
    One(Value),
    /// The body describes an ordered collection.
    Many(Vec<Value>),
}

impl Representations {
    /// Flattens into an ordered list.
    pub fn into_vec(self) -> Vec<Value> {
        match self {
            Representations::One(value) => vec![value],
            Representations::Many(values) => values,
        }
    }

    /// Number of representations.
    pub fn len(&self) -> usize {
        match self {
            Representations::One(_) => 1,
            Representations::Many(values) => values.len(),
        }
    }

    /// Returns true if there are no representations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A borrowed view of a local object handed to the client.
#[derive(Debug, Clone, Copy)]
pub struct ObjectRef<'a> {
    /// Local identity.
    pub id: ObjectId,
    /// Entity schema of the object.
    pub entity: &'a EntitySchema,
    /// Current committed record.
    pub record: &'a ObjectRecord,
}

impl<'a> ObjectRef<'a> {
    /// Creates an object view.
    pub fn new(id: ObjectId, entity: &'a EntitySchema, record: &'a ObjectRecord) -> Self {
        Self { id, entity, record }
    }

    /// Remote identifier, if the object has been saved or fetched.
    pub fn resource_id(&self) -> Option<&'a str> {
        self.record.resource_id.as_deref()
    }
}

/// Translates between the local object graph and a remote protocol.
///
/// Implementors must provide [`resource_identifier`](Self::resource_identifier)
/// and [`attributes`](Self::attributes). Request builders a client does not
/// override fail with [`FaultError::Unimplemented`] when first used, and the
/// three `should_fetch_*` policy hooks allow every fetch by default.
///
/// Implementations must be deterministic: the same representation always
/// yields the same identifier and attributes.
pub trait ResourceClient: Send + Sync {
    /// Normalizes a decoded body into one representation or a sequence.
    ///
    /// The default treats a map as one representation, an array as a
    /// sequence and `null` as an empty sequence.
    fn representations(
        &self,
        body: &Value,
        entity: &EntitySchema,
        _meta: &ResponseMeta,
    ) -> MappingResult<Representations> {
        match body {
            Value::Map(_) => Ok(Representations::One(body.clone())),
            Value::Array(items) => Ok(Representations::Many(items.clone())),
            Value::Null => Ok(Representations::Many(Vec::new())),
            other => Err(MappingError::invalid(
                &entity.name,
                format!("response body is {}", other.kind()),
            )),
        }
    }

    /// Embedded resources of a representation, keyed by relationship name.
    ///
    /// Values may be a map (one embedded resource), an array (several), a
    /// scalar (a reference by identifier) or `null` (cleared). The default
    /// reports no embedded resources.
    fn related_representations(
        &self,
        _representation: &Value,
        _entity: &EntitySchema,
        _meta: &ResponseMeta,
    ) -> MappingResult<BTreeMap<String, Value>> {
        Ok(BTreeMap::new())
    }

    /// Stable identifier of the resource a representation describes.
    fn resource_identifier(
        &self,
        representation: &Value,
        entity: &EntitySchema,
        meta: &ResponseMeta,
    ) -> Option<String>;

    /// Attribute values of a representation, keyed by schema attribute name.
    ///
    /// Keys absent from the result leave the stored attribute untouched.
    fn attributes(
        &self,
        representation: &Value,
        entity: &EntitySchema,
        meta: &ResponseMeta,
    ) -> MappingResult<BTreeMap<String, Value>>;

    /// Builds the request for a query.
    ///
    /// Unless [`sends_predicate`](Self::sends_predicate) says otherwise, the
    /// request must carry the whole predicate and the paging.
    fn query_request(&self, _query: &Query, _context: &Context) -> FaultResult<Request> {
        Err(FaultError::Unimplemented {
            method: "query_request",
        })
    }

    /// Whether [`query_request`](Self::query_request) hands the server the
    /// whole predicate of `query`.
    ///
    /// When this returns `false` the request may narrow the result by any
    /// part of the predicate but must not page it. The store then evaluates
    /// the predicate against the merged records and applies offset and limit
    /// itself, keeping the response order.
    fn sends_predicate(&self, _query: &Query) -> bool {
        true
    }

    /// Builds the request for one object.
    fn object_request(
        &self,
        _method: Method,
        _object: ObjectRef<'_>,
        _context: &Context,
    ) -> FaultResult<Request> {
        Err(FaultError::Unimplemented {
            method: "object_request",
        })
    }

    /// Builds the request for one relationship of an object.
    fn relationship_request(
        &self,
        _method: Method,
        _relationship: &RelationshipSchema,
        _object: ObjectRef<'_>,
        _context: &Context,
    ) -> FaultResult<Request> {
        Err(FaultError::Unimplemented {
            method: "relationship_request",
        })
    }

    /// Whether accessing an object's attributes may fetch them.
    fn should_fetch_attributes(&self, _object: ObjectRef<'_>, _context: &Context) -> bool {
        true
    }

    /// Whether accessing a relationship may fetch it.
    fn should_fetch_relationship(
        &self,
        _relationship: &RelationshipSchema,
        _object: ObjectRef<'_>,
        _context: &Context,
    ) -> bool {
        true
    }

    /// Whether executing a query may fetch it.
    fn should_fetch_query(&self, _query: &Query, _context: &Context) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_store::AttributeType;

    struct Minimal;

    impl ResourceClient for Minimal {
        fn resource_identifier(
            &self,
            representation: &Value,
            _entity: &EntitySchema,
            _meta: &ResponseMeta,
        ) -> Option<String> {
            representation.get("id").and_then(Value::as_identifier)
        }

        fn attributes(
            &self,
            _representation: &Value,
            _entity: &EntitySchema,
            _meta: &ResponseMeta,
        ) -> MappingResult<BTreeMap<String, Value>> {
            Ok(BTreeMap::new())
        }
    }

    fn post() -> EntitySchema {
        EntitySchema::new("Post").with_attribute("title", AttributeType::Text)
    }

    #[test]
    fn request_builders_default_to_unimplemented() {
        let entity = post();
        let record = ObjectRecord::shell("Post", "1");
        let object = ObjectRef::new(ObjectId::new(), &entity, &record);
        let ctx = Context::new();

        let err = Minimal
            .query_request(&Query::new("Post"), &ctx)
            .unwrap_err();
        assert_eq!(err, FaultError::Unimplemented { method: "query_request" });

        let err = Minimal.object_request(Method::Get, object, &ctx).unwrap_err();
        assert_eq!(err, FaultError::Unimplemented { method: "object_request" });
    }

    #[test]
    fn policy_hooks_default_to_allow() {
        let entity = post();
        let record = ObjectRecord::shell("Post", "1");
        let object = ObjectRef::new(ObjectId::new(), &entity, &record);
        let ctx = Context::new();
        assert!(Minimal.should_fetch_attributes(object, &ctx));
        assert!(Minimal.should_fetch_query(&Query::new("Post"), &ctx));
        assert_eq!(object.resource_id(), Some("1"));
    }

    #[test]
    fn default_representations_by_shape() {
        let entity = post();
        let meta = ResponseMeta::new(200, "/posts");
        let one = Value::object([("id", Value::from(1))]);
        assert_eq!(
            Minimal.representations(&one, &entity, &meta).unwrap(),
            Representations::One(one.clone())
        );
        let many = Minimal
            .representations(&Value::Array(vec![one.clone(), one]), &entity, &meta)
            .unwrap();
        assert_eq!(many.len(), 2);
        assert!(Minimal
            .representations(&Value::Null, &entity, &meta)
            .unwrap()
            .is_empty());
        assert!(matches!(
            Minimal.representations(&Value::from("x"), &entity, &meta),
            Err(MappingError::InvalidRepresentation { .. })
        ));
    }
}
