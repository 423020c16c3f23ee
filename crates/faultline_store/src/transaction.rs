//! Single-writer transactions.

use crate::database::Database;
use crate::error::{StoreError, StoreResult};
use crate::id::ObjectId;
use crate::record::{ObjectRecord, RelationshipValue};
use crate::schema::{Cardinality, Model};
use crate::types::{ResourceKey, SequenceNumber, TransactionId};
use parking_lot::MutexGuard;
use std::collections::{HashMap, HashSet};

/// A staged write.
#[derive(Debug, Clone)]
pub(crate) enum PendingWrite {
    /// Insert or replace an object.
    Put(ObjectRecord),
    /// Remove an object.
    Delete,
}

/// An open write transaction.
///
/// Holds the database's write lock for its whole lifetime, so at most one
/// transaction exists at a time. Writes are staged and become visible to
/// other readers only on commit; the transaction itself reads its own
/// writes. Dropping a transaction without committing discards it.
pub struct Transaction<'db> {
    db: &'db Database,
    id: TransactionId,
    writes: HashMap<ObjectId, PendingWrite>,
    /// First-touch order of written objects.
    order: Vec<ObjectId>,
    index: HashMap<ResourceKey, Option<ObjectId>>,
    _guard: MutexGuard<'db, ()>,
}

impl<'db> Transaction<'db> {
    pub(crate) fn new(db: &'db Database, id: TransactionId, guard: MutexGuard<'db, ()>) -> Self {
        Self {
            db,
            id,
            writes: HashMap::new(),
            order: Vec::new(),
            index: HashMap::new(),
            _guard: guard,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the model records are validated against.
    #[must_use]
    pub fn model(&self) -> &Model {
        self.db.model()
    }

    /// Returns the number of staged writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Reads an object, seeing this transaction's own writes.
    pub fn get(&self, id: ObjectId) -> StoreResult<Option<ObjectRecord>> {
        match self.writes.get(&id) {
            Some(PendingWrite::Put(record)) => Ok(Some(record.clone())),
            Some(PendingWrite::Delete) => Ok(None),
            None => self.db.get(id),
        }
    }

    /// Reads an object that must exist.
    pub fn require(&self, id: ObjectId) -> StoreResult<ObjectRecord> {
        self.get(id)?.ok_or(StoreError::ObjectNotFound(id))
    }

    /// Returns true if the object exists in this transaction's view.
    pub fn exists(&self, id: ObjectId) -> StoreResult<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Finds the object bound to a remote identifier.
    #[must_use]
    pub fn lookup(&self, entity: &str, resource_id: &str) -> Option<ObjectId> {
        let key = ResourceKey::new(entity, resource_id);
        match self.index.get(&key) {
            Some(binding) => *binding,
            None => self.db.lookup(entity, resource_id),
        }
    }

    /// Inserts a new object and returns its freshly assigned ID.
    pub fn insert(&mut self, record: ObjectRecord) -> StoreResult<ObjectId> {
        let id = ObjectId::new();
        self.put(id, record)?;
        Ok(id)
    }

    /// Inserts or replaces an object.
    ///
    /// The record is validated against the model: attributes and
    /// relationships must be declared, values must match their declared
    /// types, relationship arity must match, and every target must exist
    /// with the destination entity. Its resource identifier, if any, is
    /// bound in the resource index.
    pub fn put(&mut self, id: ObjectId, record: ObjectRecord) -> StoreResult<()> {
        validate_record(self.db.model(), id, &record, |target| {
            Ok(self.get(target)?.map(|r| r.entity))
        })?;

        let previous = self.get(id)?;
        if let Some(previous) = &previous {
            if previous.entity != record.entity {
                return Err(StoreError::schema_violation(
                    &record.entity,
                    format!("object {id} already exists as {}", previous.entity),
                ));
            }
        }

        let old_rid = previous.and_then(|p| p.resource_id);
        if old_rid != record.resource_id {
            if let Some(rid) = &record.resource_id {
                if let Some(existing) = self.lookup(&record.entity, rid) {
                    if existing != id {
                        return Err(StoreError::DuplicateResource {
                            entity: record.entity.clone(),
                            resource_id: rid.clone(),
                            existing,
                        });
                    }
                }
                self.index
                    .insert(ResourceKey::new(&record.entity, rid), Some(id));
            }
            if let Some(old) = old_rid {
                self.index.insert(ResourceKey::new(&record.entity, old), None);
            }
        }

        self.stage(id, PendingWrite::Put(record));
        Ok(())
    }

    /// Binds a remote identifier to an existing object.
    pub fn bind_resource(&mut self, id: ObjectId, resource_id: impl Into<String>) -> StoreResult<()> {
        let mut record = self.require(id)?;
        record.resource_id = Some(resource_id.into());
        self.put(id, record)
    }

    /// Deletes an object and removes every reference to it.
    ///
    /// Returns false if the object did not exist.
    pub fn delete(&mut self, id: ObjectId) -> StoreResult<bool> {
        let Some(record) = self.get(id)? else {
            return Ok(false);
        };
        if let Some(rid) = record.resource_id {
            self.index.insert(ResourceKey::new(&record.entity, rid), None);
        }
        self.stage(id, PendingWrite::Delete);

        let mut candidates: Vec<ObjectId> = self.db.object_ids();
        candidates.extend(self.order.iter().copied());
        let mut seen = HashSet::new();
        for other in candidates {
            if other == id || !seen.insert(other) {
                continue;
            }
            let Some(mut referrer) = self.get(other)? else {
                continue;
            };
            let mut changed = false;
            for rel in referrer.relationships.values_mut() {
                changed |= rel.unlink(id);
            }
            if changed {
                self.stage(other, PendingWrite::Put(referrer));
            }
        }
        Ok(true)
    }

    /// Commits all staged writes atomically.
    pub fn commit(self) -> StoreResult<SequenceNumber> {
        let Transaction {
            db,
            id,
            mut writes,
            order,
            index,
            _guard,
        } = self;
        let staged: Vec<(ObjectId, PendingWrite)> = order
            .into_iter()
            .filter_map(|oid| writes.remove(&oid).map(|w| (oid, w)))
            .collect();
        let seq = db.apply(staged, index);
        tracing::trace!(txn = %id, %seq, "transaction committed");
        Ok(seq)
    }

    /// Discards all staged writes.
    pub fn abort(self) {
        tracing::trace!(txn = %self.id, writes = self.writes.len(), "transaction aborted");
    }

    fn stage(&mut self, id: ObjectId, write: PendingWrite) {
        if self.writes.insert(id, write).is_none() {
            self.order.push(id);
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("writes", &self.writes.len())
            .finish_non_exhaustive()
    }
}

/// Checks a record against the model.
///
/// `resolve` returns the entity of a relationship target, or `None` if the
/// target does not exist.
pub(crate) fn validate_record(
    model: &Model,
    id: ObjectId,
    record: &ObjectRecord,
    resolve: impl Fn(ObjectId) -> StoreResult<Option<String>>,
) -> StoreResult<()> {
    let entity = model.require_entity(&record.entity)?;

    if record.resource_id.as_deref() == Some("") {
        return Err(StoreError::schema_violation(
            &entity.name,
            "empty resource identifier",
        ));
    }

    for (name, value) in &record.attributes {
        let attr = entity
            .attribute(name)
            .ok_or_else(|| StoreError::UnknownAttribute {
                entity: entity.name.clone(),
                attribute: name.clone(),
            })?;
        if !attr.accepts(value) {
            return Err(StoreError::schema_violation(
                &entity.name,
                format!("{name} expects {}, found {}", attr.kind, value.kind()),
            ));
        }
    }

    for (name, value) in &record.relationships {
        let rel = entity
            .relationship(name)
            .ok_or_else(|| StoreError::UnknownRelationship {
                entity: entity.name.clone(),
                relationship: name.clone(),
            })?;
        match (rel.cardinality, value) {
            (Cardinality::ToOne, RelationshipValue::ToOne(_)) => {}
            (Cardinality::ToMany, RelationshipValue::ToMany(targets)) => {
                let unique: HashSet<_> = targets.iter().collect();
                if unique.len() != targets.len() {
                    return Err(StoreError::schema_violation(
                        &entity.name,
                        format!("{name} lists an object twice"),
                    ));
                }
            }
            _ => {
                return Err(StoreError::schema_violation(
                    &entity.name,
                    format!("{name} has the wrong arity"),
                ))
            }
        }
        for target in value.targets() {
            let target_entity = if target == id {
                Some(record.entity.clone())
            } else {
                resolve(target)?
            };
            match target_entity {
                None => return Err(StoreError::ObjectNotFound(target)),
                Some(found) if found != rel.destination => {
                    return Err(StoreError::schema_violation(
                        &entity.name,
                        format!("{name} expects {}, found {found}", rel.destination),
                    ))
                }
                Some(_) => {}
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::database::Database;
    use crate::error::StoreError;
    use crate::record::{ObjectRecord, RelationshipValue};
    use crate::schema::{AttributeType, EntitySchema, Model};
    use faultline_codec::Value;

    fn db() -> Database {
        let model = Model::new()
            .with_entity(
                EntitySchema::new("Post")
                    .with_attribute("title", AttributeType::Text)
                    .with_to_many("comments", "Comment", true),
            )
            .with_entity(
                EntitySchema::new("Comment")
                    .with_optional("body", AttributeType::Text)
                    .with_to_one("post", "Post"),
            );
        Database::open_in_memory(model).unwrap()
    }

    #[test]
    fn reads_own_writes() {
        let db = db();
        db.transaction(|txn| {
            let id = txn.insert(ObjectRecord::shell("Post", "42"))?;
            assert!(txn.exists(id)?);
            assert_eq!(txn.lookup("Post", "42"), Some(id));
            assert_eq!(db.lookup("Post", "42"), None);
            Ok::<_, StoreError>(())
        })
        .unwrap();
        assert!(db.lookup("Post", "42").is_some());
    }

    #[test]
    fn error_discards_writes() {
        let db = db();
        let result: Result<(), StoreError> = db.transaction(|txn| {
            txn.insert(ObjectRecord::shell("Post", "1"))?;
            Err(StoreError::invalid_model("boom"))
        });
        assert!(result.is_err());
        assert_eq!(db.len(), 0);
        assert!(db.lookup("Post", "1").is_none());
    }

    #[test]
    fn schema_is_enforced() {
        let db = db();
        let mut txn = db.begin();

        let mut post = ObjectRecord::new("Post");
        post.set_attribute("title", Value::from(5));
        assert!(matches!(
            txn.insert(post),
            Err(StoreError::SchemaViolation { .. })
        ));

        let mut post = ObjectRecord::new("Post");
        post.set_attribute("rating", Value::from(5));
        assert!(matches!(
            txn.insert(post),
            Err(StoreError::UnknownAttribute { .. })
        ));

        let mut post = ObjectRecord::new("Post");
        post.set_relationship("comments", RelationshipValue::ToOne(None));
        assert!(matches!(
            txn.insert(post),
            Err(StoreError::SchemaViolation { .. })
        ));

        assert!(matches!(
            txn.insert(ObjectRecord::new("Tag")),
            Err(StoreError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn relationship_targets_must_match_destination() {
        let db = db();
        let mut txn = db.begin();
        let other_post = txn.insert(ObjectRecord::shell("Post", "9")).unwrap();

        let mut post = ObjectRecord::new("Post");
        post.set_relationship("comments", RelationshipValue::ToMany(vec![other_post]));
        assert!(matches!(
            txn.insert(post),
            Err(StoreError::SchemaViolation { .. })
        ));

        let missing = crate::ObjectId::new();
        let mut comment = ObjectRecord::new("Comment");
        comment.set_relationship("post", RelationshipValue::ToOne(Some(missing)));
        assert_eq!(txn.insert(comment), Err(StoreError::ObjectNotFound(missing)));
    }

    #[test]
    fn resource_ids_are_unique_per_entity() {
        let db = db();
        let mut txn = db.begin();
        let first = txn.insert(ObjectRecord::shell("Post", "1")).unwrap();
        let err = txn.insert(ObjectRecord::shell("Post", "1")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateResource { existing, .. } if existing == first));

        // Same identifier, different entity.
        txn.insert(ObjectRecord::shell("Comment", "1")).unwrap();
    }

    #[test]
    fn rebinding_moves_the_index_entry() {
        let db = db();
        let id = db
            .transaction(|txn| txn.insert(ObjectRecord::new("Post")))
            .unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().resource_id, None);

        db.transaction(|txn| txn.bind_resource(id, "77")).unwrap();
        assert_eq!(db.lookup("Post", "77"), Some(id));

        db.transaction(|txn| txn.bind_resource(id, "78")).unwrap();
        assert_eq!(db.lookup("Post", "77"), None);
        assert_eq!(db.lookup("Post", "78"), Some(id));
    }

    #[test]
    fn delete_unlinks_referrers() {
        let db = db();
        let (post, comment) = db
            .transaction(|txn| {
                let post = txn.insert(ObjectRecord::shell("Post", "1"))?;
                let mut comment = ObjectRecord::shell("Comment", "c1");
                comment.set_relationship("post", RelationshipValue::ToOne(Some(post)));
                let comment = txn.insert(comment)?;
                let mut record = txn.require(post)?;
                record.set_relationship("comments", RelationshipValue::ToMany(vec![comment]));
                txn.put(post, record)?;
                Ok::<_, StoreError>((post, comment))
            })
            .unwrap();

        let deleted = db.transaction(|txn| txn.delete(comment)).unwrap();
        assert!(deleted);
        assert!(db.get(comment).unwrap().is_none());
        assert!(db.lookup("Comment", "c1").is_none());
        assert!(db.get(post).unwrap().unwrap().to_many("comments").is_empty());

        assert!(!db.transaction(|txn| txn.delete(comment)).unwrap());
    }

    #[test]
    fn self_reference_is_allowed() {
        let model = Model::new().with_entity(EntitySchema::new("Node").with_to_one("next", "Node"));
        let db = Database::open_in_memory(model).unwrap();
        let id = crate::ObjectId::new();
        let mut node = ObjectRecord::shell("Node", "n");
        node.set_relationship("next", RelationshipValue::ToOne(Some(id)));
        db.transaction(|txn| txn.put(id, node)).unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().to_one("next"), Some(id));
    }
}
