//! Snapshot export and import.
//!
//! ## Snapshot Format
//!
//! ```text
//! | magic "FLSN" (4) | version (2, big-endian) | canonical CBOR body |
//! ```
//!
//! The body is a map with the commit `sequence` and an `objects` array of
//! `[id, record]` pairs in creation order. Importing validates every record
//! against the current model before replacing the store contents.

use crate::database::{Database, StoreState, StoredObject};
use crate::error::{StoreError, StoreResult};
use crate::id::ObjectId;
use crate::record::ObjectRecord;
use crate::transaction::validate_record;
use crate::types::{ResourceKey, SequenceNumber};
use faultline_codec::{from_cbor, to_canonical_cbor, Decode, Encode, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Magic bytes for snapshot files.
const SNAPSHOT_MAGIC: [u8; 4] = *b"FLSN";
/// Current snapshot format version.
const SNAPSHOT_VERSION: u16 = 1;
/// Header size (magic + version).
const HEADER_SIZE: usize = 4 + 2;

/// Summary of an imported snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Commit sequence the snapshot was taken at.
    pub sequence: SequenceNumber,
    /// Number of objects restored.
    pub objects: usize,
}

impl Database {
    /// Serializes every committed object into snapshot bytes.
    #[must_use]
    pub fn export_snapshot(&self) -> Vec<u8> {
        let _writer = self.lock_writer();
        let (sequence, objects) = {
            let state = self.state.read();
            let mut rows: Vec<(&ObjectId, &StoredObject)> = state.objects.iter().collect();
            rows.sort_by_key(|(_, o)| o.created);
            let objects: Vec<(ObjectId, Vec<u8>)> =
                rows.into_iter().map(|(id, o)| (*id, o.payload.clone())).collect();
            (self.committed_seq(), objects)
        };

        let mut entries = Vec::with_capacity(objects.len());
        for (id, payload) in objects {
            // Payloads were produced by the encoder, so they always decode.
            if let Ok(record) = from_cbor(&payload) {
                entries.push(Value::Array(vec![id.to_value(), record]));
            }
        }
        #[allow(clippy::cast_possible_wrap)]
        let body = Value::object([
            ("sequence", Value::Integer(sequence.as_u64() as i64)),
            ("objects", Value::Array(entries)),
        ]);

        let mut out = Vec::with_capacity(HEADER_SIZE);
        out.extend_from_slice(&SNAPSHOT_MAGIC);
        out.extend_from_slice(&SNAPSHOT_VERSION.to_be_bytes());
        out.extend_from_slice(&to_canonical_cbor(&body));
        out
    }

    /// Replaces the store contents with a snapshot.
    ///
    /// Nothing changes if any record fails validation.
    pub fn import_snapshot(&self, bytes: &[u8]) -> StoreResult<SnapshotInfo> {
        if bytes.len() < HEADER_SIZE || bytes[..4] != SNAPSHOT_MAGIC {
            return Err(StoreError::invalid_snapshot("missing snapshot header"));
        }
        let version = u16::from_be_bytes([bytes[4], bytes[5]]);
        if version != SNAPSHOT_VERSION {
            return Err(StoreError::invalid_snapshot(format!(
                "unsupported snapshot version {version}"
            )));
        }

        let body = from_cbor(&bytes[HEADER_SIZE..])?;
        let sequence = body
            .get("sequence")
            .and_then(Value::as_integer)
            .and_then(|n| u64::try_from(n).ok())
            .map(SequenceNumber::new)
            .ok_or_else(|| StoreError::invalid_snapshot("missing sequence"))?;
        let entries = body
            .get("objects")
            .and_then(Value::as_array)
            .ok_or_else(|| StoreError::invalid_snapshot("missing objects"))?;

        let mut records: Vec<(ObjectId, ObjectRecord)> = Vec::with_capacity(entries.len());
        for entry in entries {
            let pair = entry.as_array().unwrap_or(&[]);
            let [id, record] = pair else {
                return Err(StoreError::invalid_snapshot("object entry is not a pair"));
            };
            let id = ObjectId::from_value(id)
                .ok_or_else(|| StoreError::invalid_snapshot("object id is not 16 bytes"))?;
            records.push((id, ObjectRecord::from_value(record.clone())?));
        }

        let entities: HashMap<ObjectId, &str> = records
            .iter()
            .map(|(id, r)| (*id, r.entity.as_str()))
            .collect();
        if entities.len() != records.len() {
            return Err(StoreError::invalid_snapshot("duplicate object id"));
        }

        let mut state = StoreState::default();
        for (id, record) in &records {
            validate_record(self.model(), *id, record, |target| {
                Ok(entities.get(&target).map(|e| (*e).to_string()))
            })?;
            if let Some(rid) = &record.resource_id {
                let key = ResourceKey::new(&record.entity, rid);
                if let Some(existing) = state.index.insert(key, *id) {
                    return Err(StoreError::DuplicateResource {
                        entity: record.entity.clone(),
                        resource_id: rid.clone(),
                        existing,
                    });
                }
            }
            state.next_created += 1;
            state.objects.insert(
                *id,
                StoredObject {
                    entity: record.entity.clone(),
                    payload: record.encode(),
                    sequence,
                    created: state.next_created,
                },
            );
        }

        let objects = records.len();
        let _writer = self.lock_writer();
        *self.state.write() = state;
        self.set_committed_seq(sequence);
        tracing::debug!(objects, %sequence, "snapshot imported");
        Ok(SnapshotInfo { sequence, objects })
    }

    /// Writes a snapshot to a file, replacing it atomically.
    pub fn save_to(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        let bytes = self.export_snapshot();
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, path)?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "snapshot saved");
        Ok(())
    }

    /// Opens a store for `model` populated from a snapshot file.
    pub fn open_from(
        model: impl Into<std::sync::Arc<crate::schema::Model>>,
        path: impl AsRef<Path>,
    ) -> StoreResult<Self> {
        let db = Self::open_in_memory(model)?;
        let bytes = fs::read(path.as_ref())?;
        db.import_snapshot(&bytes)?;
        Ok(db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RelationshipValue;
    use crate::schema::{AttributeType, EntitySchema, Model};
    use tempfile::tempdir;

    fn model() -> Model {
        Model::new()
            .with_entity(
                EntitySchema::new("Post")
                    .with_attribute("title", AttributeType::Text)
                    .with_to_many("comments", "Comment", true),
            )
            .with_entity(EntitySchema::new("Comment").with_to_one("post", "Post"))
    }

    fn populated() -> (Database, ObjectId) {
        let db = Database::open_in_memory(model()).unwrap();
        let post = db
            .transaction(|txn| {
                let post = txn.insert(ObjectRecord::shell("Post", "42"))?;
                let mut comments = Vec::new();
                for rid in ["1", "2"] {
                    let mut comment = ObjectRecord::shell("Comment", rid);
                    comment.set_relationship("post", RelationshipValue::ToOne(Some(post)));
                    comments.push(txn.insert(comment)?);
                }
                let mut record = txn.require(post)?;
                record.set_attribute("title", Value::from("Hello"));
                record.set_relationship("comments", RelationshipValue::ToMany(comments));
                txn.put(post, record)?;
                Ok::<_, StoreError>(post)
            })
            .unwrap();
        (db, post)
    }

    #[test]
    fn snapshot_restores_objects_and_index() {
        let (db, post) = populated();
        let bytes = db.export_snapshot();

        let restored = Database::open_in_memory(model()).unwrap();
        let info = restored.import_snapshot(&bytes).unwrap();
        assert_eq!(info.objects, 3);
        assert_eq!(info.sequence, db.committed_seq());

        assert_eq!(restored.lookup("Post", "42"), Some(post));
        assert_eq!(restored.get(post).unwrap(), db.get(post).unwrap());
        assert_eq!(restored.list("Comment").unwrap(), db.list("Comment").unwrap());
    }

    #[test]
    fn snapshot_bytes_are_deterministic() {
        let (db, _) = populated();
        let restored = Database::open_in_memory(model()).unwrap();
        restored.import_snapshot(&db.export_snapshot()).unwrap();
        assert_eq!(restored.export_snapshot(), db.export_snapshot());
    }

    #[test]
    fn bad_header_is_rejected() {
        let db = Database::open_in_memory(model()).unwrap();
        assert!(matches!(
            db.import_snapshot(b"NOPE\x00\x01"),
            Err(StoreError::InvalidSnapshot { .. })
        ));
        let mut bytes = populated().0.export_snapshot();
        bytes[5] = 9;
        assert!(matches!(
            db.import_snapshot(&bytes),
            Err(StoreError::InvalidSnapshot { .. })
        ));
    }

    #[test]
    fn snapshot_for_other_model_is_rejected_atomically() {
        let (db, _) = populated();
        let bytes = db.export_snapshot();

        let other = Model::new().with_entity(EntitySchema::new("Post"));
        let target = Database::open_in_memory(other).unwrap();
        target
            .transaction(|txn| txn.insert(ObjectRecord::shell("Post", "keep")))
            .unwrap();

        assert!(target.import_snapshot(&bytes).is_err());
        assert_eq!(target.len(), 1);
        assert!(target.lookup("Post", "keep").is_some());
    }

    #[test]
    fn save_and_open_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.flsn");
        let (db, post) = populated();
        db.save_to(&path).unwrap();

        let reopened = Database::open_from(model(), &path).unwrap();
        assert_eq!(reopened.lookup("Post", "42"), Some(post));
        assert_eq!(reopened.len(), 3);

        let missing = Database::open_from(model(), dir.path().join("absent"));
        assert!(matches!(missing, Err(StoreError::Io { .. })));
    }
}
