//! Maps response bodies onto the model.
//!
//! The mapper is a pure transformation: it asks the resource client for the
//! top-level representations of a body, their identifiers, attributes and
//! embedded resources, and checks everything against the entity schemas.
//! No store access happens here.

use crate::client::ResourceClient;
use crate::error::{MappingError, MappingResult};
use crate::request::ResponseMeta;
use faultline_codec::Value;
use faultline_store::{EntitySchema, Model};
use std::collections::BTreeMap;

/// One representation mapped onto an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRepresentation {
    /// Entity name.
    pub entity: String,
    /// Resource identifier.
    pub resource_id: String,
    /// Attribute values present in the representation.
    pub attributes: BTreeMap<String, Value>,
    /// Relationships present in the representation.
    pub related: BTreeMap<String, MappedRelated>,
}

/// The mapped value of one relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedRelated {
    /// To-one: a node, or `None` to clear the reference.
    One(Option<RelatedNode>),
    /// To-many: nodes in response order; empty clears the relationship.
    Many(Vec<RelatedNode>),
}

/// One destination object of a relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelatedNode {
    /// A nested representation, merged recursively.
    Embedded(Box<MappedRepresentation>),
    /// A reference by resource identifier.
    Reference(String),
}

/// Turns response bodies into [`MappedRepresentation`] trees.
pub struct RepresentationMapper<'a, C: ?Sized> {
    client: &'a C,
    model: &'a Model,
}

impl<'a, C: ResourceClient + ?Sized> RepresentationMapper<'a, C> {
    /// Creates a mapper.
    pub fn new(client: &'a C, model: &'a Model) -> Self {
        Self { client, model }
    }

    /// Maps a response body originating from a request for `entity`.
    pub fn map_body(
        &self,
        body: &Value,
        entity: &str,
        meta: &ResponseMeta,
    ) -> MappingResult<Vec<MappedRepresentation>> {
        let schema = self.schema(entity)?;
        self.client
            .representations(body, schema, meta)?
            .into_vec()
            .iter()
            .map(|rep| self.map_one(rep, schema, meta))
            .collect()
    }

    /// Maps a single representation.
    pub fn map_one(
        &self,
        representation: &Value,
        entity: &EntitySchema,
        meta: &ResponseMeta,
    ) -> MappingResult<MappedRepresentation> {
        if !representation.is_map() {
            return Err(MappingError::invalid(
                &entity.name,
                format!("representation is {}", representation.kind()),
            ));
        }

        let resource_id = self
            .client
            .resource_identifier(representation, entity, meta)
            .filter(|rid| !rid.is_empty())
            .ok_or_else(|| MappingError::MissingIdentifier {
                entity: entity.name.clone(),
            })?;

        let attributes = self.client.attributes(representation, entity, meta)?;
        for (name, value) in &attributes {
            let attr = entity
                .attribute(name)
                .ok_or_else(|| MappingError::UnknownAttribute {
                    entity: entity.name.clone(),
                    attribute: name.clone(),
                })?;
            if !attr.accepts(value) {
                return Err(MappingError::TypeMismatch {
                    entity: entity.name.clone(),
                    attribute: name.clone(),
                    expected: attr.kind.to_string(),
                    found: value.kind().to_string(),
                });
            }
        }

        let mut related = BTreeMap::new();
        for (name, value) in self
            .client
            .related_representations(representation, entity, meta)?
        {
            let relationship =
                entity
                    .relationship(&name)
                    .ok_or_else(|| MappingError::UnknownRelationship {
                        entity: entity.name.clone(),
                        relationship: name.clone(),
                    })?;
            let destination = self.schema(&relationship.destination)?;

            let mapped = if relationship.is_to_many() {
                let items: &[Value] = match &value {
                    Value::Null => &[],
                    Value::Array(items) => items,
                    single => std::slice::from_ref(single),
                };
                MappedRelated::Many(
                    items
                        .iter()
                        .map(|item| self.node(item, destination, meta))
                        .collect::<MappingResult<_>>()?,
                )
            } else {
                match &value {
                    Value::Null => MappedRelated::One(None),
                    Value::Array(_) => {
                        return Err(MappingError::ArityMismatch {
                            entity: entity.name.clone(),
                            relationship: name,
                            expected: "to-one",
                            found: "array".to_string(),
                        })
                    }
                    single => MappedRelated::One(Some(self.node(single, destination, meta)?)),
                }
            };
            related.insert(name, mapped);
        }

        Ok(MappedRepresentation {
            entity: entity.name.clone(),
            resource_id,
            attributes,
            related,
        })
    }

    fn node(
        &self,
        value: &Value,
        entity: &EntitySchema,
        meta: &ResponseMeta,
    ) -> MappingResult<RelatedNode> {
        if value.is_map() {
            return Ok(RelatedNode::Embedded(Box::new(
                self.map_one(value, entity, meta)?,
            )));
        }
        value
            .as_identifier()
            .map(RelatedNode::Reference)
            .ok_or_else(|| {
                MappingError::invalid(
                    &entity.name,
                    format!("related value is {}", value.kind()),
                )
            })
    }

    fn schema(&self, entity: &str) -> MappingResult<&'a EntitySchema> {
        self.model
            .entity(entity)
            .ok_or_else(|| MappingError::invalid(entity, "entity is not part of the model"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_store::AttributeType;

    /// Reads `id`, every declared attribute by name, and every declared
    /// relationship by name.
    struct Plain;

    impl ResourceClient for Plain {
        fn related_representations(
            &self,
            representation: &Value,
            entity: &EntitySchema,
            _meta: &ResponseMeta,
        ) -> MappingResult<BTreeMap<String, Value>> {
            Ok(entity
                .relationships
                .iter()
                .filter_map(|r| {
                    representation
                        .get(&r.name)
                        .map(|v| (r.name.clone(), v.clone()))
                })
                .collect())
        }

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
            representation: &Value,
            entity: &EntitySchema,
            _meta: &ResponseMeta,
        ) -> MappingResult<BTreeMap<String, Value>> {
            Ok(representation
                .entries()
                .filter(|(k, _)| *k != "id" && entity.relationship(k).is_none())
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect())
        }
    }

    fn model() -> Model {
        Model::new()
            .with_entity(
                EntitySchema::new("Post")
                    .with_attribute("title", AttributeType::Text)
                    .with_to_one("author", "Author")
                    .with_to_many("comments", "Comment", true),
            )
            .with_entity(EntitySchema::new("Author").with_attribute("name", AttributeType::Text))
            .with_entity(EntitySchema::new("Comment").with_attribute("body", AttributeType::Text))
    }

    fn meta() -> ResponseMeta {
        ResponseMeta::new(200, "/posts/42")
    }

    #[test]
    fn maps_nested_representations() {
        let model = model();
        let mapper = RepresentationMapper::new(&Plain, &model);
        let body = Value::object([
            ("id", Value::from(42)),
            ("title", Value::from("Hello")),
            ("author", Value::from("7")),
            (
                "comments",
                Value::Array(vec![
                    Value::object([("id", Value::from(1)), ("body", Value::from("a"))]),
                    Value::object([("id", Value::from(2)), ("body", Value::from("b"))]),
                ]),
            ),
        ]);

        let mapped = mapper.map_body(&body, "Post", &meta()).unwrap();
        assert_eq!(mapped.len(), 1);
        let post = &mapped[0];
        assert_eq!(post.resource_id, "42");
        assert_eq!(post.attributes.get("title"), Some(&Value::from("Hello")));
        assert_eq!(
            post.related.get("author"),
            Some(&MappedRelated::One(Some(RelatedNode::Reference("7".into()))))
        );
        let MappedRelated::Many(comments) = &post.related["comments"] else {
            panic!("comments should be to-many");
        };
        let ids: Vec<&str> = comments
            .iter()
            .map(|c| match c {
                RelatedNode::Embedded(rep) => rep.resource_id.as_str(),
                RelatedNode::Reference(rid) => rid.as_str(),
            })
            .collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn null_and_single_values_keep_arity() {
        let model = model();
        let mapper = RepresentationMapper::new(&Plain, &model);
        let body = Value::object([
            ("id", Value::from(1)),
            ("author", Value::Null),
            ("comments", Value::object([("id", Value::from(5))])),
        ]);
        let post = &mapper.map_body(&body, "Post", &meta()).unwrap()[0];
        assert_eq!(post.related["author"], MappedRelated::One(None));
        assert!(matches!(&post.related["comments"], MappedRelated::Many(items) if items.len() == 1));

        let cleared = Value::object([("id", Value::from(1)), ("comments", Value::Null)]);
        let post = &mapper.map_body(&cleared, "Post", &meta()).unwrap()[0];
        assert_eq!(post.related["comments"], MappedRelated::Many(Vec::new()));
    }

    #[test]
    fn mapping_errors() {
        let model = model();
        let mapper = RepresentationMapper::new(&Plain, &model);

        let missing = Value::object([("title", Value::from("x"))]);
        assert_eq!(
            mapper.map_body(&missing, "Post", &meta()).unwrap_err(),
            MappingError::MissingIdentifier { entity: "Post".into() }
        );

        let mistyped = Value::object([("id", Value::from(1)), ("title", Value::from(3))]);
        assert!(matches!(
            mapper.map_body(&mistyped, "Post", &meta()),
            Err(MappingError::TypeMismatch { .. })
        ));

        let unknown = Value::object([("id", Value::from(1)), ("rating", Value::from(3))]);
        assert!(matches!(
            mapper.map_body(&unknown, "Post", &meta()),
            Err(MappingError::UnknownAttribute { .. })
        ));

        let arity = Value::object([
            ("id", Value::from(1)),
            ("author", Value::Array(vec![Value::from("7")])),
        ]);
        assert!(matches!(
            mapper.map_body(&arity, "Post", &meta()),
            Err(MappingError::ArityMismatch { .. })
        ));

        let nested_missing = Value::object([
            ("id", Value::from(1)),
            ("comments", Value::Array(vec![Value::object([("body", Value::from("x"))])])),
        ]);
        assert_eq!(
            mapper.map_body(&nested_missing, "Post", &meta()).unwrap_err(),
            MappingError::MissingIdentifier { entity: "Comment".into() }
        );
    }

    #[test]
    fn empty_collection_maps_to_nothing() {
        let model = model();
        let mapper = RepresentationMapper::new(&Plain, &model);
        assert!(mapper
            .map_body(&Value::Array(Vec::new()), "Post", &meta())
            .unwrap()
            .is_empty());
    }
}
