//! Cross-crate integration test helpers.
//!
//! Provides a harness that feeds payloads through the engine and checks
//! the local store against what the remote side sent.

use crate::fixtures::{blog_store, StoreFixture};
use faultline_codec::Value;
use faultline_store::ObjectId;
use std::collections::HashMap;

/// A test harness for merge scenarios.
///
/// Every imported representation is remembered by entity and resource id,
/// so tests can verify that the store holds the latest values.
pub struct ScenarioHarness {
    /// The store under test.
    pub fixture: StoreFixture,
    expected: HashMap<(String, String), Value>,
}

impl ScenarioHarness {
    /// Creates a harness over a blog store.
    pub fn new() -> Self {
        Self::with_fixture(blog_store())
    }

    /// Creates a harness over an existing fixture.
    pub fn with_fixture(fixture: StoreFixture) -> Self {
        Self {
            fixture,
            expected: HashMap::new(),
        }
    }

    /// Imports a payload and tracks the attributes of its top-level
    /// representations.
    pub fn import(&mut self, entity: &str, payload: &Value) -> Vec<ObjectId> {
        let ids = self
            .fixture
            .import(entity, payload)
            .expect("Failed to import payload");
        let schema = self
            .fixture
            .model()
            .entity(entity)
            .expect("Unknown entity")
            .clone();
        let representations = match payload {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        for representation in representations {
            let rid = representation
                .get("id")
                .and_then(Value::as_identifier)
                .expect("Representation without id");
            let merged = self
                .expected
                .entry((entity.to_string(), rid))
                .or_insert_with(Value::empty_map);
            for (key, value) in representation.entries() {
                if schema.attribute(key).is_some() {
                    merged.insert(key, value.clone());
                }
            }
        }
        ids
    }

    /// Verifies every tracked attribute against the store.
    pub fn verify_all(&self) {
        for ((entity, rid), attributes) in &self.expected {
            let id = self
                .fixture
                .object_for_resource(entity, rid)
                .unwrap_or_else(|| panic!("{entity} {rid} is not in the store"));
            let record = self
                .fixture
                .object(id)
                .expect("Failed to read object")
                .unwrap_or_else(|| panic!("{entity} {rid} has no record"));
            for (name, value) in attributes.entries() {
                assert_eq!(
                    record.attribute(name),
                    Some(value),
                    "attribute {name} of {entity} {rid}"
                );
            }
        }
    }

    /// Returns the count of tracked objects.
    pub fn tracked_count(&self) -> usize {
        self.expected.len()
    }
}

impl Default for ScenarioHarness {
    fn default() -> Self {
        Self::new()
    }
}
