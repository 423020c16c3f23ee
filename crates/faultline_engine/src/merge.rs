//! Merging mapped representations into the local store.
//!
//! A merge runs inside one store transaction. For every representation it
//! resolves the identity, overwrites the attributes the representation
//! carries, merges nested representations, then replaces every relationship
//! the representation carries. Anything the representation does not mention
//! is left untouched. Any error aborts the whole transaction.

use crate::error::{FaultError, FaultResult, MappingError};
use crate::identity::{IdentityResolver, ResolveScope};
use crate::mapper::{MappedRelated, MappedRepresentation, RelatedNode};
use faultline_store::{Model, ObjectId, RelationshipValue, ResourceKey, Transaction};
use std::collections::HashSet;

/// What the top-level representations of a response describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeTarget {
    /// Free-standing objects, such as query results.
    None,
    /// The destination objects of one relationship of `owner`; the
    /// relationship is replaced with the merged objects.
    Relationship {
        /// Object owning the relationship.
        owner: ObjectId,
        /// Relationship name.
        relationship: String,
    },
    /// One specific local object. An object without a resource identifier
    /// is bound to the identifier the representation carries.
    Object(ObjectId),
}

/// A reference removed by a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unlink {
    /// Object whose relationship changed.
    pub owner: ObjectId,
    /// Relationship name.
    pub relationship: String,
    /// Object no longer referenced.
    pub target: ObjectId,
}

/// The result of a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Top-level objects in response order, deduplicated.
    pub objects: Vec<ObjectId>,
    /// Shells created by this merge.
    pub inserted: Vec<ObjectId>,
    /// Existing objects whose record changed.
    pub updated: Vec<ObjectId>,
    /// References dropped by relationship replacement.
    pub unlinked: Vec<Unlink>,
    /// Objects whose attributes were delivered.
    pub materialized: Vec<ObjectId>,
    /// Relationships whose value was delivered.
    pub materialized_relationships: Vec<(ObjectId, String)>,
}

struct MergeState<'s> {
    scope: &'s mut ResolveScope,
    visited: HashSet<ResourceKey>,
    outcome: MergeOutcome,
}

/// Writes mapped representations into a transaction.
#[derive(Debug, Clone, Copy)]
pub struct MergeEngine<'a> {
    model: &'a Model,
    resolver: &'a IdentityResolver,
}

impl<'a> MergeEngine<'a> {
    /// Creates a merge engine.
    pub fn new(model: &'a Model, resolver: &'a IdentityResolver) -> Self {
        Self { model, resolver }
    }

    /// Merges representations into `txn`.
    ///
    /// Resolutions are recorded in `scope`; publish it to the resolver only
    /// after the transaction commits.
    pub fn merge(
        &self,
        txn: &mut Transaction<'_>,
        scope: &mut ResolveScope,
        representations: &[MappedRepresentation],
        target: &MergeTarget,
    ) -> FaultResult<MergeOutcome> {
        let mut state = MergeState {
            scope,
            visited: HashSet::new(),
            outcome: MergeOutcome::default(),
        };

        if let MergeTarget::Object(id) = target {
            self.bind_target(txn, *id, representations)?;
        }

        let mut seen = HashSet::new();
        for rep in representations {
            let id = self.merge_one(txn, &mut state, rep)?;
            if seen.insert(id) {
                state.outcome.objects.push(id);
            }
        }

        if let MergeTarget::Relationship {
            owner,
            relationship,
        } = target
        {
            let objects = state.outcome.objects.clone();
            self.replace_relationship(txn, &mut state, *owner, relationship, objects)?;
        }

        tracing::trace!(
            objects = state.outcome.objects.len(),
            inserted = state.outcome.inserted.len(),
            updated = state.outcome.updated.len(),
            "merged representations"
        );
        Ok(state.outcome)
    }

    fn bind_target(
        &self,
        txn: &mut Transaction<'_>,
        id: ObjectId,
        representations: &[MappedRepresentation],
    ) -> FaultResult<()> {
        let record = txn.get(id)?.ok_or(FaultError::ObjectNotFound(id))?;
        let rep = match representations {
            [] => return Ok(()),
            [rep] => rep,
            _ => {
                return Err(MappingError::invalid(
                    &record.entity,
                    format!("expected one representation, found {}", representations.len()),
                )
                .into())
            }
        };
        if rep.entity != record.entity {
            return Err(MappingError::invalid(
                &record.entity,
                format!("response describes a {}", rep.entity),
            )
            .into());
        }
        match record.resource_id.as_deref() {
            None => txn.bind_resource(id, rep.resource_id.clone())?,
            Some(rid) if rid == rep.resource_id => {}
            Some(rid) => {
                return Err(MappingError::invalid(
                    &record.entity,
                    format!("response describes {}, expected {rid}", rep.resource_id),
                )
                .into())
            }
        }
        Ok(())
    }

    fn merge_one(
        &self,
        txn: &mut Transaction<'_>,
        state: &mut MergeState<'_>,
        rep: &MappedRepresentation,
    ) -> FaultResult<ObjectId> {
        let key = ResourceKey::new(&rep.entity, &rep.resource_id);
        let resolved = self
            .resolver
            .resolve(txn, state.scope, &rep.entity, &rep.resource_id)?;
        if resolved.created {
            state.outcome.inserted.push(resolved.id);
        }
        if !state.visited.insert(key) {
            // Already merged in this pass; reuse without recursing.
            return Ok(resolved.id);
        }
        let id = resolved.id;

        let entity = self
            .model
            .entity(&rep.entity)
            .ok_or_else(|| FaultError::UnknownEntity(rep.entity.clone()))?;

        let mut changed = false;
        let mut record = txn.require(id)?;
        for (name, value) in &rep.attributes {
            changed |= record.set_attribute(name.clone(), value.clone());
        }
        if !rep.attributes.is_empty() {
            state.outcome.materialized.push(id);
        }

        for (name, related) in &rep.related {
            let relationship = entity.relationship(name).ok_or_else(|| {
                MappingError::UnknownRelationship {
                    entity: rep.entity.clone(),
                    relationship: name.clone(),
                }
            })?;
            let value = match related {
                MappedRelated::One(None) => RelationshipValue::ToOne(None),
                MappedRelated::One(Some(node)) => RelationshipValue::ToOne(Some(self.node(
                    txn,
                    state,
                    &relationship.destination,
                    node,
                )?)),
                MappedRelated::Many(nodes) => {
                    let mut targets = Vec::with_capacity(nodes.len());
                    for node in nodes {
                        let target = self.node(txn, state, &relationship.destination, node)?;
                        if !targets.contains(&target) {
                            targets.push(target);
                        }
                    }
                    RelationshipValue::ToMany(targets)
                }
            };
            record_unlinks(&mut state.outcome, id, name, record.relationship(name), &value);
            changed |= record.set_relationship(name.clone(), value);
            state
                .outcome
                .materialized_relationships
                .push((id, name.clone()));
        }

        if changed {
            txn.put(id, record)?;
            if !resolved.created && !state.outcome.updated.contains(&id) {
                state.outcome.updated.push(id);
            }
        }
        Ok(id)
    }

    fn node(
        &self,
        txn: &mut Transaction<'_>,
        state: &mut MergeState<'_>,
        destination: &str,
        node: &RelatedNode,
    ) -> FaultResult<ObjectId> {
        match node {
            RelatedNode::Embedded(rep) => {
                if rep.entity != destination {
                    return Err(MappingError::invalid(
                        destination,
                        format!("embedded representation is a {}", rep.entity),
                    )
                    .into());
                }
                self.merge_one(txn, state, rep)
            }
            RelatedNode::Reference(rid) => {
                let resolved = self.resolver.resolve(txn, state.scope, destination, rid)?;
                if resolved.created {
                    state.outcome.inserted.push(resolved.id);
                }
                Ok(resolved.id)
            }
        }
    }

    fn replace_relationship(
        &self,
        txn: &mut Transaction<'_>,
        state: &mut MergeState<'_>,
        owner: ObjectId,
        name: &str,
        objects: Vec<ObjectId>,
    ) -> FaultResult<()> {
        let mut record = txn.get(owner)?.ok_or(FaultError::ObjectNotFound(owner))?;
        let relationship = self
            .model
            .entity(&record.entity)
            .and_then(|e| e.relationship(name))
            .ok_or_else(|| FaultError::UnknownRelationship {
                entity: record.entity.clone(),
                relationship: name.to_string(),
            })?;

        let value = if relationship.is_to_many() {
            RelationshipValue::ToMany(objects)
        } else {
            match objects.as_slice() {
                [] => RelationshipValue::ToOne(None),
                [one] => RelationshipValue::ToOne(Some(*one)),
                more => {
                    return Err(MappingError::ArityMismatch {
                        entity: record.entity.clone(),
                        relationship: name.to_string(),
                        expected: "to-one",
                        found: format!("{} representations", more.len()),
                    }
                    .into())
                }
            }
        };

        record_unlinks(&mut state.outcome, owner, name, record.relationship(name), &value);
        if record.set_relationship(name, value) {
            txn.put(owner, record)?;
            if !state.outcome.updated.contains(&owner) {
                state.outcome.updated.push(owner);
            }
        }
        state
            .outcome
            .materialized_relationships
            .push((owner, name.to_string()));
        Ok(())
    }
}

fn record_unlinks(
    outcome: &mut MergeOutcome,
    owner: ObjectId,
    name: &str,
    previous: Option<&RelationshipValue>,
    next: &RelationshipValue,
) {
    let Some(previous) = previous else {
        return;
    };
    let kept: HashSet<ObjectId> = next.targets().collect();
    for target in previous.targets() {
        if !kept.contains(&target) {
            outcome.unlinked.push(Unlink {
                owner,
                relationship: name.to_string(),
                target,
            });
        }
    }
}
