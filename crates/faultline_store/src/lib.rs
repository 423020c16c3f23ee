//! # Faultline Store
//!
//! The local persistence engine behind the faulting engine: a typed object
//! graph held in memory, written through single-writer transactions, and
//! exportable as snapshots.
//!
//! - [`Model`] describes entities, typed attributes and relationships.
//! - [`Database`] stores [`ObjectRecord`]s addressed by [`ObjectId`] and keeps
//!   a resource index from `(entity, resource id)` to object.
//! - [`Transaction`] stages writes, reads its own writes, and commits
//!   atomically. Only one transaction is open at a time.
//!
//! Object records with no data yet are shells; the engine creates them the
//! first time a remote identifier is seen and fills them in on fetch.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod database;
mod error;
mod id;
mod record;
mod schema;
mod snapshot;
mod transaction;
mod types;

pub use database::Database;
pub use error::{StoreError, StoreResult};
pub use id::ObjectId;
pub use record::{ObjectRecord, RelationshipValue};
pub use schema::{
    AttributeSchema, AttributeType, Cardinality, EntitySchema, Model, RelationshipSchema,
};
pub use snapshot::SnapshotInfo;
pub use transaction::Transaction;
pub use types::{ResourceKey, SequenceNumber, TransactionId};
