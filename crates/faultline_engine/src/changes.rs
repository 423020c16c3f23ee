//! Pending local changes and save results.

use crate::error::FaultError;
use faultline_store::ObjectId;

/// Local changes not yet pushed to the remote API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Objects created locally, saved with `POST`.
    pub inserted: Vec<ObjectId>,
    /// Objects changed locally, saved with `PUT`.
    pub updated: Vec<ObjectId>,
    /// Objects marked for deletion, saved with `DELETE`.
    pub deleted: Vec<ObjectId>,
}

impl ChangeSet {
    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Number of pending objects.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    /// Returns true if the object has a pending change of any kind.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.inserted.contains(&id) || self.updated.contains(&id) || self.deleted.contains(&id)
    }

    /// Returns true if the object is marked for deletion.
    pub fn is_deleted(&self, id: ObjectId) -> bool {
        self.deleted.contains(&id)
    }

    pub(crate) fn record_insert(&mut self, id: ObjectId) {
        self.inserted.push(id);
    }

    pub(crate) fn record_update(&mut self, id: ObjectId) {
        if !self.inserted.contains(&id) && !self.updated.contains(&id) {
            self.updated.push(id);
        }
    }

    /// Records a deletion. Returns true if the object was never saved, in
    /// which case it can be removed locally right away.
    pub(crate) fn record_delete(&mut self, id: ObjectId) -> bool {
        if let Some(pos) = self.inserted.iter().position(|i| *i == id) {
            self.inserted.remove(pos);
            return true;
        }
        self.updated.retain(|i| *i != id);
        if !self.deleted.contains(&id) {
            self.deleted.push(id);
        }
        false
    }

    pub(crate) fn clear(&mut self, id: ObjectId) {
        self.inserted.retain(|i| *i != id);
        self.updated.retain(|i| *i != id);
        self.deleted.retain(|i| *i != id);
    }
}

/// A save that stopped at an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveFailure {
    /// Object whose request failed.
    pub object: ObjectId,
    /// Error.
    pub error: FaultError,
}

/// Result of pushing pending changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Inserted objects now bound to remote identifiers.
    pub inserted: Vec<ObjectId>,
    /// Updated objects accepted by the server.
    pub updated: Vec<ObjectId>,
    /// Objects deleted remotely and locally.
    pub deleted: Vec<ObjectId>,
    /// First failure, if the save stopped early.
    pub failure: Option<SaveFailure>,
}

impl SaveOutcome {
    /// Returns true if every pending change was saved.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    /// Converts into a result, failing with the first error.
    pub fn into_result(self) -> Result<Self, FaultError> {
        match &self.failure {
            Some(failure) => Err(failure.error.clone()),
            None => Ok(self),
        }
    }
}
