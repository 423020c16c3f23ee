//! Stored object records and their canonical encoding.

use crate::id::ObjectId;
use faultline_codec::{CodecError, CodecResult, Decode, Encode, Value};
use std::collections::BTreeMap;

/// Value of one relationship slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipValue {
    /// To-one reference, possibly empty.
    ToOne(Option<ObjectId>),
    /// To-many references in order.
    ToMany(Vec<ObjectId>),
}

impl RelationshipValue {
    /// Iterate over every referenced object.
    pub fn targets(&self) -> impl Iterator<Item = ObjectId> + '_ {
        let (one, many): (Option<ObjectId>, &[ObjectId]) = match self {
            RelationshipValue::ToOne(target) => (*target, &[][..]),
            RelationshipValue::ToMany(targets) => (None, targets),
        };
        one.into_iter().chain(many.iter().copied())
    }

    /// Remove every reference to `id`. Returns true if anything changed.
    pub fn unlink(&mut self, id: ObjectId) -> bool {
        match self {
            RelationshipValue::ToOne(target) if *target == Some(id) => {
                *target = None;
                true
            }
            RelationshipValue::ToOne(_) => false,
            RelationshipValue::ToMany(targets) => {
                let before = targets.len();
                targets.retain(|t| *t != id);
                targets.len() != before
            }
        }
    }

    fn to_value(&self) -> Value {
        match self {
            RelationshipValue::ToOne(None) => Value::Null,
            RelationshipValue::ToOne(Some(id)) => id.to_value(),
            RelationshipValue::ToMany(ids) => {
                Value::Array(ids.iter().map(ObjectId::to_value).collect())
            }
        }
    }

    fn from_value(value: &Value) -> CodecResult<Self> {
        let id = |v: &Value| {
            ObjectId::from_value(v)
                .ok_or_else(|| CodecError::invalid_structure("relationship target is not an id"))
        };
        match value {
            Value::Null => Ok(RelationshipValue::ToOne(None)),
            Value::Bytes(_) => Ok(RelationshipValue::ToOne(Some(id(value)?))),
            Value::Array(items) => items
                .iter()
                .map(id)
                .collect::<CodecResult<Vec<_>>>()
                .map(RelationshipValue::ToMany),
            other => Err(CodecError::invalid_structure(format!(
                "relationship encoded as {}",
                other.kind()
            ))),
        }
    }
}

/// The persisted state of one object.
///
/// A record with no attributes and no relationships is a shell: it stands
/// for a remote resource whose data has not been fetched yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Entity name.
    pub entity: String,
    /// Remote identifier, absent for objects created locally and never saved.
    pub resource_id: Option<String>,
    /// Attribute values by name.
    pub attributes: BTreeMap<String, Value>,
    /// Relationship values by name.
    pub relationships: BTreeMap<String, RelationshipValue>,
}

impl ObjectRecord {
    /// Creates an empty record for `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            resource_id: None,
            attributes: BTreeMap::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// Creates a shell record bound to a remote identifier.
    pub fn shell(entity: impl Into<String>, resource_id: impl Into<String>) -> Self {
        let mut record = Self::new(entity);
        record.resource_id = Some(resource_id.into());
        record
    }

    /// Returns true if nothing has been materialized yet.
    #[must_use]
    pub fn is_shell(&self) -> bool {
        self.attributes.is_empty() && self.relationships.is_empty()
    }

    /// Returns an attribute value.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Returns a relationship value.
    #[must_use]
    pub fn relationship(&self, name: &str) -> Option<&RelationshipValue> {
        self.relationships.get(name)
    }

    /// Returns the target of a to-one relationship.
    #[must_use]
    pub fn to_one(&self, name: &str) -> Option<ObjectId> {
        match self.relationships.get(name) {
            Some(RelationshipValue::ToOne(target)) => *target,
            _ => None,
        }
    }

    /// Returns the members of a to-many relationship.
    #[must_use]
    pub fn to_many(&self, name: &str) -> &[ObjectId] {
        match self.relationships.get(name) {
            Some(RelationshipValue::ToMany(targets)) => targets,
            _ => &[],
        }
    }

    /// Sets an attribute, returning true if the stored value changed.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) -> bool {
        let name = name.into();
        if self.attributes.get(&name) == Some(&value) {
            return false;
        }
        self.attributes.insert(name, value);
        true
    }

    /// Sets a relationship, returning true if the stored value changed.
    pub fn set_relationship(&mut self, name: impl Into<String>, value: RelationshipValue) -> bool {
        let name = name.into();
        if self.relationships.get(&name) == Some(&value) {
            return false;
        }
        self.relationships.insert(name, value);
        true
    }

    /// Attributes as a text-keyed map value.
    #[must_use]
    pub fn attributes_value(&self) -> Value {
        Value::object(self.attributes.iter().map(|(k, v)| (k.clone(), v.clone())))
    }
}

impl Encode for ObjectRecord {
    fn to_value(&self) -> Value {
        Value::object([
            ("entity", Value::from(self.entity.as_str())),
            ("resource_id", Value::from(self.resource_id.clone())),
            ("attributes", self.attributes_value()),
            (
                "relationships",
                Value::object(
                    self.relationships
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_value())),
                ),
            ),
        ])
    }
}

impl Decode for ObjectRecord {
    fn from_value(value: Value) -> CodecResult<Self> {
        let entity = value
            .get("entity")
            .and_then(Value::as_text)
            .ok_or_else(|| CodecError::invalid_structure("record without entity"))?
            .to_string();
        let resource_id = match value.get("resource_id") {
            None | Some(Value::Null) => None,
            Some(Value::Text(rid)) => Some(rid.clone()),
            Some(other) => {
                return Err(CodecError::invalid_structure(format!(
                    "resource_id encoded as {}",
                    other.kind()
                )))
            }
        };
        let attributes = value
            .get("attributes")
            .map(|attrs| {
                attrs
                    .entries()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let mut relationships = BTreeMap::new();
        if let Some(rels) = value.get("relationships") {
            for (name, rel) in rels.entries() {
                relationships.insert(name.to_string(), RelationshipValue::from_value(rel)?);
            }
        }
        Ok(Self {
            entity,
            resource_id,
            attributes,
            relationships,
        })
    }
}
