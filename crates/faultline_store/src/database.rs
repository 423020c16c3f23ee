//! The local object store.

use crate::error::{StoreError, StoreResult};
use crate::id::ObjectId;
use crate::record::ObjectRecord;
use crate::schema::Model;
use crate::transaction::{PendingWrite, Transaction};
use crate::types::{ResourceKey, SequenceNumber, TransactionId};
use faultline_codec::{Decode, Encode};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One committed object.
#[derive(Debug, Clone)]
pub(crate) struct StoredObject {
    /// Entity name, kept beside the payload for cheap filtering.
    pub(crate) entity: String,
    /// Canonical CBOR encoding of the record.
    pub(crate) payload: Vec<u8>,
    /// Commit that last wrote this object.
    pub(crate) sequence: SequenceNumber,
    /// Creation order, used for stable listing.
    pub(crate) created: u64,
}

/// Committed state guarded by one lock so readers see whole commits.
#[derive(Debug, Default)]
pub(crate) struct StoreState {
    pub(crate) objects: HashMap<ObjectId, StoredObject>,
    pub(crate) index: HashMap<ResourceKey, ObjectId>,
    pub(crate) next_created: u64,
}

/// An in-memory object store with single-writer transactions.
///
/// Records are kept as canonical CBOR and validated against the model on
/// every write. A resource index maps `(entity, resource id)` pairs to
/// object IDs. The whole store can be exported to a snapshot and reloaded.
///
/// ```
/// use faultline_store::{AttributeType, Database, EntitySchema, Model, ObjectRecord, StoreError};
/// use faultline_codec::Value;
///
/// let model = Model::new()
///     .with_entity(EntitySchema::new("Post").with_attribute("title", AttributeType::Text));
/// let db = Database::open_in_memory(model).unwrap();
///
/// let id = db.transaction(|txn| {
///     let mut post = ObjectRecord::shell("Post", "42");
///     post.set_attribute("title", Value::from("Hello"));
///     txn.insert(post)
/// }).unwrap();
///
/// assert_eq!(db.lookup("Post", "42"), Some(id));
/// ```
pub struct Database {
    model: Arc<Model>,
    pub(crate) state: RwLock<StoreState>,
    write_lock: Mutex<()>,
    next_txid: AtomicU64,
    committed_seq: AtomicU64,
}

impl Database {
    /// Opens an empty store for a model.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidModel`] if the model fails validation.
    pub fn open_in_memory(model: impl Into<Arc<Model>>) -> StoreResult<Self> {
        let model = model.into();
        model.validate()?;
        Ok(Self {
            model,
            state: RwLock::new(StoreState::default()),
            write_lock: Mutex::new(()),
            next_txid: AtomicU64::new(1),
            committed_seq: AtomicU64::new(0),
        })
    }

    /// Returns the model.
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Returns a shared handle to the model.
    #[must_use]
    pub fn shared_model(&self) -> Arc<Model> {
        Arc::clone(&self.model)
    }

    /// Begins a write transaction, blocking while another one is open.
    pub fn begin(&self) -> Transaction<'_> {
        let guard = self.write_lock.lock();
        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        Transaction::new(self, id, guard)
    }

    /// Executes a function within a write transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is aborted.
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut txn = self.begin();
        match f(&mut txn) {
            Ok(result) => {
                txn.commit()?;
                Ok(result)
            }
            Err(e) => {
                txn.abort();
                Err(e)
            }
        }
    }

    /// Reads the latest committed version of an object.
    pub fn get(&self, id: ObjectId) -> StoreResult<Option<ObjectRecord>> {
        let payload = match self.state.read().objects.get(&id) {
            Some(stored) => stored.payload.clone(),
            None => return Ok(None),
        };
        Ok(Some(ObjectRecord::decode(&payload)?))
    }

    /// Returns true if the object exists.
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.state.read().objects.contains_key(&id)
    }

    /// Returns the entity of an object.
    #[must_use]
    pub fn entity_of(&self, id: ObjectId) -> Option<String> {
        self.state.read().objects.get(&id).map(|o| o.entity.clone())
    }

    /// Returns the commit that last wrote an object.
    #[must_use]
    pub fn sequence_of(&self, id: ObjectId) -> Option<SequenceNumber> {
        self.state.read().objects.get(&id).map(|o| o.sequence)
    }

    /// Finds the object bound to a remote identifier.
    #[must_use]
    pub fn lookup(&self, entity: &str, resource_id: &str) -> Option<ObjectId> {
        self.state
            .read()
            .index
            .get(&ResourceKey::new(entity, resource_id))
            .copied()
    }

    /// Lists every object of an entity in creation order.
    pub fn list(&self, entity: &str) -> StoreResult<Vec<(ObjectId, ObjectRecord)>> {
        let mut rows: Vec<(u64, ObjectId, Vec<u8>)> = {
            let state = self.state.read();
            state
                .objects
                .iter()
                .filter(|(_, o)| o.entity == entity)
                .map(|(id, o)| (o.created, *id, o.payload.clone()))
                .collect()
        };
        rows.sort_by_key(|(created, _, _)| *created);
        rows.into_iter()
            .map(|(_, id, payload)| Ok((id, ObjectRecord::decode(&payload)?)))
            .collect()
    }

    /// Returns the number of objects of an entity.
    #[must_use]
    pub fn count(&self, entity: &str) -> usize {
        self.state
            .read()
            .objects
            .values()
            .filter(|o| o.entity == entity)
            .count()
    }

    /// Returns the total number of objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().objects.len()
    }

    /// Returns true if the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the sequence number of the latest commit.
    #[must_use]
    pub fn committed_seq(&self) -> SequenceNumber {
        SequenceNumber::new(self.committed_seq.load(Ordering::SeqCst))
    }

    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    pub(crate) fn object_ids(&self) -> Vec<ObjectId> {
        self.state.read().objects.keys().copied().collect()
    }

    pub(crate) fn set_committed_seq(&self, seq: SequenceNumber) {
        self.committed_seq.store(seq.as_u64(), Ordering::SeqCst);
    }

    /// Applies staged writes under the state lock. Called with the write
    /// lock held.
    pub(crate) fn apply(
        &self,
        writes: Vec<(ObjectId, PendingWrite)>,
        index: HashMap<ResourceKey, Option<ObjectId>>,
    ) -> SequenceNumber {
        if writes.is_empty() && index.is_empty() {
            return self.committed_seq();
        }
        let seq = self.committed_seq().next();
        let mut state = self.state.write();
        for (id, write) in writes {
            match write {
                PendingWrite::Put(record) => {
                    let payload = record.encode();
                    let existing = state.objects.get(&id).map(|o| o.created);
                    let created = match existing {
                        Some(created) => created,
                        None => {
                            state.next_created += 1;
                            state.next_created
                        }
                    };
                    state.objects.insert(
                        id,
                        StoredObject {
                            entity: record.entity,
                            payload,
                            sequence: seq,
                            created,
                        },
                    );
                }
                PendingWrite::Delete => {
                    state.objects.remove(&id);
                }
            }
        }
        for (key, binding) in index {
            match binding {
                Some(id) => {
                    state.index.insert(key, id);
                }
                None => {
                    state.index.remove(&key);
                }
            }
        }
        self.set_committed_seq(seq);
        seq
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("objects", &self.len())
            .field("committed_seq", &self.committed_seq())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeType, EntitySchema};
    use faultline_codec::Value;
    use std::thread;

    fn model() -> Model {
        Model::new()
            .with_entity(EntitySchema::new("Post").with_attribute("title", AttributeType::Text))
            .with_entity(EntitySchema::new("Comment"))
    }

    fn titled(rid: &str, title: &str) -> ObjectRecord {
        let mut post = ObjectRecord::shell("Post", rid);
        post.set_attribute("title", Value::from(title));
        post
    }

    #[test]
    fn invalid_model_is_rejected() {
        assert!(matches!(
            Database::open_in_memory(Model::new()),
            Err(StoreError::InvalidModel { .. })
        ));
    }

    #[test]
    fn commits_advance_sequence() {
        let db = Database::open_in_memory(model()).unwrap();
        assert_eq!(db.committed_seq(), SequenceNumber::new(0));

        let id = db.transaction(|txn| txn.insert(titled("1", "a"))).unwrap();
        assert_eq!(db.committed_seq(), SequenceNumber::new(1));
        assert_eq!(db.sequence_of(id), Some(SequenceNumber::new(1)));

        // An empty transaction does not produce a commit.
        db.transaction(|_| Ok::<_, StoreError>(())).unwrap();
        assert_eq!(db.committed_seq(), SequenceNumber::new(1));
    }

    #[test]
    fn list_is_in_creation_order_per_entity() {
        let db = Database::open_in_memory(model()).unwrap();
        let ids: Vec<ObjectId> = (0..5)
            .map(|i| {
                db.transaction(|txn| txn.insert(titled(&i.to_string(), "t")))
                    .unwrap()
            })
            .collect();
        db.transaction(|txn| txn.insert(ObjectRecord::shell("Comment", "c")))
            .unwrap();

        let listed: Vec<ObjectId> = db.list("Post").unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(listed, ids);
        assert_eq!(db.count("Post"), 5);
        assert_eq!(db.count("Comment"), 1);
        assert_eq!(db.len(), 6);

        // Updating keeps the original position.
        db.transaction(|txn| txn.put(ids[0], titled("0", "updated"))).unwrap();
        let first = &db.list("Post").unwrap()[0];
        assert_eq!(first.0, ids[0]);
        assert_eq!(first.1.attribute("title"), Some(&Value::from("updated")));
    }

    #[test]
    fn writers_are_serialized() {
        let db = Arc::new(Database::open_in_memory(model()).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = Arc::clone(&db);
                thread::spawn(move || {
                    db.transaction(|txn| txn.insert(titled(&format!("p{i}"), "t")))
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(db.count("Post"), 8);
        assert_eq!(db.committed_seq(), SequenceNumber::new(8));
    }
}
