//! Resource identity resolution.
//!
//! Maps `(entity, resource id)` pairs to local object identities. The first
//! resolution of a pair creates a shell object inside the caller's
//! transaction; later resolutions return the same identity.
//!
//! Resolutions made during a merge are collected in a [`ResolveScope`] and
//! only published to the shared cache after the merge transaction commits,
//! so identities created by an aborted merge never leak.

use crate::error::{FaultResult, MappingError};
use faultline_store::{Database, ObjectId, ObjectRecord, ResourceKey, Transaction};
use parking_lot::RwLock;
use std::collections::HashMap;

/// The result of one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    /// Local identity.
    pub id: ObjectId,
    /// True if a shell was created for this resolution.
    pub created: bool,
}

/// Resolutions made within one transaction.
#[derive(Debug, Default)]
pub struct ResolveScope {
    resolved: HashMap<ResourceKey, ObjectId>,
    created: Vec<ObjectId>,
}

impl ResolveScope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shells created in this scope.
    pub fn created(&self) -> &[ObjectId] {
        &self.created
    }

    /// Number of keys resolved in this scope.
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    /// Returns true if nothing was resolved.
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Cache of resolved identities shared by every merge.
///
/// The cache is an accelerator only; the store's resource index is the
/// source of truth, and cached entries are checked against it before use.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    cache: RwLock<HashMap<ResourceKey, ObjectId>>,
}

impl IdentityResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a pair to a local identity, creating a shell if needed.
    ///
    /// An empty resource id is reported as a missing identifier.
    pub fn resolve(
        &self,
        txn: &mut Transaction<'_>,
        scope: &mut ResolveScope,
        entity: &str,
        resource_id: &str,
    ) -> FaultResult<Resolved> {
        if resource_id.is_empty() {
            return Err(MappingError::MissingIdentifier {
                entity: entity.to_string(),
            }
            .into());
        }
        let key = ResourceKey::new(entity, resource_id);

        if let Some(id) = scope.resolved.get(&key) {
            return Ok(Resolved {
                id: *id,
                created: false,
            });
        }

        let cached = self.cache.read().get(&key).copied();
        let existing = match cached {
            Some(id) if txn.lookup(entity, resource_id) == Some(id) => Some(id),
            Some(_) => {
                self.cache.write().remove(&key);
                txn.lookup(entity, resource_id)
            }
            None => txn.lookup(entity, resource_id),
        };

        let resolved = match existing {
            Some(id) => Resolved { id, created: false },
            None => {
                let id = txn.insert(ObjectRecord::shell(entity, resource_id))?;
                scope.created.push(id);
                tracing::trace!(entity, resource_id, %id, "created shell");
                Resolved { id, created: true }
            }
        };
        scope.resolved.insert(key, resolved.id);
        Ok(resolved)
    }

    /// Looks up a pair without creating anything.
    pub fn find(&self, db: &Database, entity: &str, resource_id: &str) -> Option<ObjectId> {
        let key = ResourceKey::new(entity, resource_id);
        if let Some(id) = self.cache.read().get(&key).copied() {
            if db.lookup(entity, resource_id) == Some(id) {
                return Some(id);
            }
        }
        let id = db.lookup(entity, resource_id)?;
        self.cache.write().insert(key, id);
        Some(id)
    }

    /// Publishes the resolutions of a committed transaction.
    pub fn publish(&self, scope: ResolveScope) {
        if scope.resolved.is_empty() {
            return;
        }
        self.cache.write().extend(scope.resolved);
    }

    /// Records a binding made outside a merge.
    pub fn remember(&self, entity: &str, resource_id: &str, id: ObjectId) {
        self.cache
            .write()
            .insert(ResourceKey::new(entity, resource_id), id);
    }

    /// Drops a cached pair.
    pub fn forget(&self, entity: &str, resource_id: &str) -> bool {
        self.cache
            .write()
            .remove(&ResourceKey::new(entity, resource_id))
            .is_some()
    }

    /// Drops every cached pair pointing at an object.
    pub fn forget_object(&self, id: ObjectId) {
        self.cache.write().retain(|_, cached| *cached != id);
    }

    /// Returns the cached identity of a pair.
    pub fn cached(&self, entity: &str, resource_id: &str) -> Option<ObjectId> {
        self.cache
            .read()
            .get(&ResourceKey::new(entity, resource_id))
            .copied()
    }

    /// Number of cached pairs.
    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }
}
