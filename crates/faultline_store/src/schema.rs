//! Entity model: the read-only schema the store and engine validate against.
//!
//! Models are plain data and load from JSON:
//!
//! ```
//! use faultline_store::Model;
//!
//! let model = Model::from_json(r#"{
//!     "entities": [
//!         {"name": "Post",
//!          "attributes": [{"name": "title", "type": "text"}],
//!          "relationships": [{"name": "comments", "destination": "Comment",
//!                             "cardinality": "to_many", "ordered": true}]},
//!         {"name": "Comment",
//!          "attributes": [{"name": "body", "type": "text", "optional": true}]}
//!     ]
//! }"#).unwrap();
//! assert!(model.entity("Post").unwrap().relationship("comments").is_some());
//! ```

use crate::error::{StoreError, StoreResult};
use faultline_codec::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Declared type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// Boolean.
    Bool,
    /// Signed 64-bit integer.
    Integer,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Bytes,
    /// Sequence of values.
    Array,
    /// Nested map.
    Map,
    /// Any value.
    Any,
}

impl AttributeType {
    /// Returns true if a non-null value has this type.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (AttributeType::Any, _)
                | (AttributeType::Bool, Value::Bool(_))
                | (AttributeType::Integer, Value::Integer(_))
                | (AttributeType::Text, Value::Text(_))
                | (AttributeType::Bytes, Value::Bytes(_))
                | (AttributeType::Array, Value::Array(_))
                | (AttributeType::Map, Value::Map(_))
        )
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeType::Bool => "bool",
            AttributeType::Integer => "integer",
            AttributeType::Text => "text",
            AttributeType::Bytes => "bytes",
            AttributeType::Array => "array",
            AttributeType::Map => "map",
            AttributeType::Any => "any",
        };
        f.write_str(name)
    }
}

/// A typed attribute of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    /// Attribute name.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub kind: AttributeType,
    /// Whether null is accepted.
    #[serde(default)]
    pub optional: bool,
}

impl AttributeSchema {
    /// Returns true if `value` may be stored in this attribute.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return self.optional || self.kind == AttributeType::Any;
        }
        self.kind.matches(value)
    }
}

/// Relationship arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// At most one destination object.
    ToOne,
    /// Any number of destination objects.
    ToMany,
}

/// A typed relationship from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipSchema {
    /// Relationship name.
    pub name: String,
    /// Destination entity name.
    pub destination: String,
    /// Arity.
    pub cardinality: Cardinality,
    /// Whether to-many members keep their order.
    #[serde(default)]
    pub ordered: bool,
}

impl RelationshipSchema {
    /// Returns true for to-many relationships.
    #[must_use]
    pub fn is_to_many(&self) -> bool {
        self.cardinality == Cardinality::ToMany
    }
}

/// A named entity type with attributes and relationships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity name.
    pub name: String,
    /// Attributes.
    #[serde(default)]
    pub attributes: Vec<AttributeSchema>,
    /// Relationships.
    #[serde(default)]
    pub relationships: Vec<RelationshipSchema>,
}

impl EntitySchema {
    /// Creates an entity with no attributes or relationships.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Adds a required attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, kind: AttributeType) -> Self {
        self.attributes.push(AttributeSchema {
            name: name.into(),
            kind,
            optional: false,
        });
        self
    }

    /// Adds an attribute that accepts null.
    #[must_use]
    pub fn with_optional(mut self, name: impl Into<String>, kind: AttributeType) -> Self {
        self.attributes.push(AttributeSchema {
            name: name.into(),
            kind,
            optional: true,
        });
        self
    }

    /// Adds a to-one relationship.
    #[must_use]
    pub fn with_to_one(mut self, name: impl Into<String>, destination: impl Into<String>) -> Self {
        self.relationships.push(RelationshipSchema {
            name: name.into(),
            destination: destination.into(),
            cardinality: Cardinality::ToOne,
            ordered: false,
        });
        self
    }

    /// Adds a to-many relationship.
    #[must_use]
    pub fn with_to_many(
        mut self,
        name: impl Into<String>,
        destination: impl Into<String>,
        ordered: bool,
    ) -> Self {
        self.relationships.push(RelationshipSchema {
            name: name.into(),
            destination: destination.into(),
            cardinality: Cardinality::ToMany,
            ordered,
        });
        self
    }

    /// Looks up an attribute by name.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Looks up a relationship by name.
    #[must_use]
    pub fn relationship(&self, name: &str) -> Option<&RelationshipSchema> {
        self.relationships.iter().find(|r| r.name == name)
    }
}

/// The complete set of entities a store holds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Model {
    /// Entities in declaration order.
    pub entities: Vec<EntitySchema>,
}

impl Model {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity.
    #[must_use]
    pub fn with_entity(mut self, entity: EntitySchema) -> Self {
        self.entities.push(entity);
        self
    }

    /// Parses a model from JSON and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidModel`] if the JSON is malformed or the
    /// model fails [`Model::validate`].
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let model: Model = serde_json::from_str(json)
            .map_err(|e| StoreError::invalid_model(format!("malformed model JSON: {e}")))?;
        model.validate()?;
        Ok(model)
    }

    /// Serializes the model to pretty-printed JSON.
    pub fn to_json(&self) -> StoreResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StoreError::invalid_model(format!("cannot serialize model: {e}")))
    }

    /// Looks up an entity by name.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Looks up an entity by name, failing if it is not declared.
    pub fn require_entity(&self, name: &str) -> StoreResult<&EntitySchema> {
        self.entity(name)
            .ok_or_else(|| StoreError::unknown_entity(name))
    }

    /// Checks the model for internal consistency.
    ///
    /// Rejects empty models, blank or duplicate names, attribute and
    /// relationship names that collide within an entity, and relationships
    /// whose destination is not declared.
    pub fn validate(&self) -> StoreResult<()> {
        if self.entities.is_empty() {
            return Err(StoreError::invalid_model("model declares no entities"));
        }

        let mut entity_names = HashSet::new();
        for entity in &self.entities {
            if entity.name.trim().is_empty() {
                return Err(StoreError::invalid_model("entity with empty name"));
            }
            if !entity_names.insert(entity.name.as_str()) {
                return Err(StoreError::invalid_model(format!(
                    "duplicate entity {}",
                    entity.name
                )));
            }

            let mut property_names = HashSet::new();
            let properties = entity
                .attributes
                .iter()
                .map(|a| a.name.as_str())
                .chain(entity.relationships.iter().map(|r| r.name.as_str()));
            for name in properties {
                if name.trim().is_empty() {
                    return Err(StoreError::invalid_model(format!(
                        "{} has a property with an empty name",
                        entity.name
                    )));
                }
                if !property_names.insert(name) {
                    return Err(StoreError::invalid_model(format!(
                        "duplicate property {}.{name}",
                        entity.name
                    )));
                }
            }
        }

        for entity in &self.entities {
            for rel in &entity.relationships {
                if !entity_names.contains(rel.destination.as_str()) {
                    return Err(StoreError::invalid_model(format!(
                        "{}.{} points at undeclared entity {}",
                        entity.name, rel.name, rel.destination
                    )));
                }
            }
        }

        Ok(())
    }
}
