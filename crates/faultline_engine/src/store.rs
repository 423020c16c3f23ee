//! The incremental store facade.

use crate::changes::{ChangeSet, SaveFailure, SaveOutcome};
use crate::client::{ObjectRef, ResourceClient};
use crate::config::StoreConfig;
use crate::context::Context;
use crate::error::{FaultError, FaultResult, MappingError};
use crate::fault::{Claim, Completion, FaultKey, FaultState, FaultTracker, FetchStats};
use crate::identity::{IdentityResolver, ResolveScope};
use crate::mapper::RepresentationMapper;
use crate::merge::{MergeEngine, MergeOutcome, MergeTarget};
use crate::query::{Query, QueryTranslator};
use crate::request::{Method, Request, ResponseMeta};
use crate::transport::Transport;
use faultline_codec::Value;
use faultline_store::{
    Database, EntitySchema, Model, ObjectId, ObjectRecord, RelationshipValue,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

struct Inner<C, T> {
    config: StoreConfig,
    db: Arc<Database>,
    client: C,
    transport: T,
    resolver: IdentityResolver,
    faults: Arc<FaultTracker>,
    translator: QueryTranslator,
    changes: Mutex<ChangeSet>,
}

/// A remote-backed object store that loads data on demand.
///
/// Reads go through the local [`Database`]. When an accessed unit has not
/// been loaded yet, the store asks the resource client for a request, sends
/// it on its own task, maps and merges the response in one transaction, and
/// only then hands the result back. Concurrent accesses to the same unit
/// share one request.
///
/// The store is cheap to clone; clones share all state.
pub struct IncrementalStore<C, T> {
    inner: Arc<Inner<C, T>>,
}

impl<C, T> Clone for IncrementalStore<C, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, T> std::fmt::Debug for IncrementalStore<C, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalStore")
            .field("store_type", &self.inner.config.store_type)
            .field("objects", &self.inner.db.len())
            .field("stats", &self.inner.faults.stats())
            .finish_non_exhaustive()
    }
}

impl<C, T> IncrementalStore<C, T>
where
    C: ResourceClient + 'static,
    T: Transport + 'static,
{
    /// Creates a store backed by a fresh in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`FaultError::Configuration`] for an empty store type or an
    /// invalid model.
    pub fn new(config: StoreConfig, client: C, transport: T) -> FaultResult<Self> {
        config.validate()?;
        let db = Database::open_in_memory(Arc::clone(&config.model))?;
        Self::build(config, Arc::new(db), client, transport)
    }

    /// Creates a store over an existing database, such as one restored from
    /// a snapshot. The database must use the configured model.
    pub fn with_database(
        config: StoreConfig,
        db: Arc<Database>,
        client: C,
        transport: T,
    ) -> FaultResult<Self> {
        config.validate()?;
        if db.model() != config.model.as_ref() {
            return Err(FaultError::configuration(
                "database model differs from the configured model",
            ));
        }
        Self::build(config, db, client, transport)
    }

    fn build(config: StoreConfig, db: Arc<Database>, client: C, transport: T) -> FaultResult<Self> {
        debug!(store_type = %config.store_type, entities = config.model.entities.len(), "store opened");
        let translator = QueryTranslator::new(Arc::clone(&config.model));
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                db,
                client,
                transport,
                resolver: IdentityResolver::new(),
                faults: Arc::new(FaultTracker::new()),
                translator,
                changes: Mutex::new(ChangeSet::default()),
            }),
        })
    }

    /// Store type identifier.
    pub fn store_type(&self) -> &str {
        &self.inner.config.store_type
    }

    /// Entity model.
    pub fn model(&self) -> &Model {
        &self.inner.config.model
    }

    /// Local database.
    pub fn database(&self) -> &Arc<Database> {
        &self.inner.db
    }

    /// Resource client.
    pub fn client(&self) -> &C {
        &self.inner.client
    }

    /// Transport.
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Fetch counters.
    pub fn stats(&self) -> FetchStats {
        self.inner.faults.stats()
    }

    fn entity(&self, name: &str) -> FaultResult<&EntitySchema> {
        self.model()
            .entity(name)
            .ok_or_else(|| FaultError::UnknownEntity(name.to_string()))
    }

    fn require(&self, id: ObjectId) -> FaultResult<ObjectRecord> {
        self.inner
            .db
            .get(id)?
            .ok_or(FaultError::ObjectNotFound(id))
    }

    // Reads

    /// Reads an object from local data without fetching.
    pub fn object(&self, id: ObjectId) -> FaultResult<Option<ObjectRecord>> {
        Ok(self.inner.db.get(id)?)
    }

    /// Finds the local object bound to a remote identifier.
    pub fn object_for_resource(&self, entity: &str, resource_id: &str) -> Option<ObjectId> {
        self.inner.resolver.find(&self.inner.db, entity, resource_id)
    }

    /// Returns the object bound to a remote identifier, creating a shell
    /// for it if it is not known yet.
    pub fn resolve_object(&self, entity: &str, resource_id: &str) -> FaultResult<ObjectId> {
        self.entity(entity)?;
        if let Some(id) = self.object_for_resource(entity, resource_id) {
            return Ok(id);
        }
        let mut scope = ResolveScope::new();
        let resolved = self
            .inner
            .db
            .transaction(|txn| self.inner.resolver.resolve(txn, &mut scope, entity, resource_id))?;
        self.inner.resolver.publish(scope);
        Ok(resolved.id)
    }

    /// Executes a query.
    ///
    /// Every execution sends the query unless the client's policy hook
    /// declines, in which case the query is evaluated against local data.
    /// Results are merged before they are returned, in response order.
    ///
    /// Concurrent executions share one request only when both the query and
    /// the context headers match; the context label is ignored. When the
    /// client cannot send the whole predicate, the merged results are
    /// filtered and paged locally.
    pub async fn execute_query(&self, query: Query, context: &Context) -> FaultResult<Vec<ObjectId>> {
        query.validate(self.model())?;

        if !self.inner.client.should_fetch_query(&query, context) {
            self.inner.faults.record_policy_skip();
            debug!(entity = %query.entity, "query answered locally by policy");
            let rows = self.inner.db.list(&query.entity)?;
            return Ok(query.apply(rows).into_iter().map(|(id, _)| id).collect());
        }

        let entity = query.entity.clone();
        let waiter = match self.inner.faults.claim(FaultKey::query_in(query.clone(), context)) {
            Claim::Follower(waiter) => waiter,
            Claim::Leader(completion, waiter) => {
                let request = self
                    .inner
                    .translator
                    .translate(&self.inner.client, &query, context);
                self.dispatch(completion, request, entity, MergeTarget::None)?;
                waiter
            }
        };
        let ids = waiter.wait().await?;
        if self.inner.client.sends_predicate(&query) {
            return Ok(ids);
        }

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.inner.db.get(id)? {
                rows.push((id, record));
            }
        }
        let fetched = rows.len();
        let ids = query.refine(rows);
        debug!(entity = %query.entity, fetched, kept = ids.len(), "query filtered locally");
        Ok(ids)
    }

    /// Returns an object's record, fetching its attributes first if they
    /// have not been loaded.
    ///
    /// Objects without a resource identifier are never fetched.
    pub async fn object_attributes(&self, id: ObjectId, context: &Context) -> FaultResult<ObjectRecord> {
        let record = self.require(id)?;
        let key = FaultKey::attributes(id);
        if record.resource_id.is_none() || self.inner.faults.state(&key) == FaultState::Faulted {
            return Ok(record);
        }
        let entity = self.entity(&record.entity)?;
        let object = ObjectRef::new(id, entity, &record);
        if !self.inner.client.should_fetch_attributes(object, context) {
            self.inner.faults.record_policy_skip();
            debug!(%id, entity = %entity.name, "attributes answered locally by policy");
            return Ok(record);
        }

        let waiter = match self.inner.faults.claim(key) {
            Claim::Follower(waiter) => waiter,
            Claim::Leader(completion, waiter) => {
                let request = self.inner.client.object_request(Method::Get, object, context);
                self.dispatch(completion, request, entity.name.clone(), MergeTarget::Object(id))?;
                waiter
            }
        };
        waiter.wait().await?;
        self.require(id)
    }

    /// Returns a relationship of an object, fetching it first if it has not
    /// been loaded.
    ///
    /// A relationship with no stored value reads as empty.
    pub async fn relationship(
        &self,
        id: ObjectId,
        name: &str,
        context: &Context,
    ) -> FaultResult<RelationshipValue> {
        let record = self.require(id)?;
        let entity = self.entity(&record.entity)?;
        let relationship = entity
            .relationship(name)
            .ok_or_else(|| FaultError::UnknownRelationship {
                entity: entity.name.clone(),
                relationship: name.to_string(),
            })?;
        let local = |record: &ObjectRecord| {
            record.relationship(name).cloned().unwrap_or_else(|| {
                if relationship.is_to_many() {
                    RelationshipValue::ToMany(Vec::new())
                } else {
                    RelationshipValue::ToOne(None)
                }
            })
        };

        let key = FaultKey::relationship(id, name);
        if record.resource_id.is_none() || self.inner.faults.state(&key) == FaultState::Faulted {
            return Ok(local(&record));
        }
        let object = ObjectRef::new(id, entity, &record);
        if !self
            .inner
            .client
            .should_fetch_relationship(relationship, object, context)
        {
            self.inner.faults.record_policy_skip();
            debug!(%id, relationship = name, "relationship answered locally by policy");
            return Ok(local(&record));
        }

        let waiter = match self.inner.faults.claim(key) {
            Claim::Follower(waiter) => waiter,
            Claim::Leader(completion, waiter) => {
                let request =
                    self.inner
                        .client
                        .relationship_request(Method::Get, relationship, object, context);
                let target = MergeTarget::Relationship {
                    owner: id,
                    relationship: name.to_string(),
                };
                self.dispatch(completion, request, relationship.destination.clone(), target)?;
                waiter
            }
        };
        waiter.wait().await?;
        Ok(local(&self.require(id)?))
    }

    /// Merges an already decoded payload as if it had been fetched for
    /// `entity`.
    pub fn import(&self, entity: &str, body: &Value) -> FaultResult<Vec<ObjectId>> {
        self.entity(entity)?;
        let meta = ResponseMeta::new(200, format!("import:{entity}"));
        let outcome = self.merge_response(body, &meta, entity, &MergeTarget::None)?;
        Ok(outcome.objects)
    }

    // Faults

    /// Current state of a fault.
    pub fn fault_state(&self, key: &FaultKey) -> FaultState {
        self.inner.faults.state(key)
    }

    /// Marks a fault unloaded so the next access fetches again.
    pub fn invalidate(&self, key: &FaultKey) -> bool {
        self.inner.faults.invalidate(key)
    }

    /// Marks every unit of an object unloaded.
    pub fn invalidate_object(&self, id: ObjectId) -> usize {
        self.inner.faults.invalidate_object(id)
    }

    /// Settles the fault at once if building the request failed, otherwise
    /// runs the fetch on its own task.
    fn dispatch(
        &self,
        completion: Completion,
        request: FaultResult<Request>,
        entity: String,
        target: MergeTarget,
    ) -> FaultResult<()> {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                warn!(key = ?completion.key(), error = %e, "cannot build request");
                completion.complete(Err(e.clone()));
                return Err(e);
            }
        };

        let store = self.clone();
        tokio::spawn(async move {
            let outcome = store.run_fetch(request, &entity, &target).await;
            completion.complete(outcome.map(|merged| merged.objects));
        });
        Ok(())
    }

    async fn run_fetch(
        &self,
        request: Request,
        entity: &str,
        target: &MergeTarget,
    ) -> FaultResult<MergeOutcome> {
        self.inner.faults.record_dispatch();
        debug!(store_type = %self.store_type(), %request, "dispatching fetch");
        let label = request.to_string();

        let result = async {
            let response = self.inner.transport.send(request).await?;
            if !response.meta.is_success() {
                return Err(FaultError::Status {
                    status: response.meta.status,
                    url: response.meta.url,
                });
            }
            self.merge_response(&response.body, &response.meta, entity, target)
        }
        .await;

        if let Err(e) = &result {
            warn!(request = %label, error = %e, "fetch failed");
        }
        result
    }

    fn merge_response(
        &self,
        body: &Value,
        meta: &ResponseMeta,
        entity: &str,
        target: &MergeTarget,
    ) -> FaultResult<MergeOutcome> {
        let model = self.model();
        let mapped = RepresentationMapper::new(&self.inner.client, model).map_body(body, entity, meta)?;
        let engine = MergeEngine::new(model, &self.inner.resolver);
        let mut scope = ResolveScope::new();
        let outcome = self
            .inner
            .db
            .transaction(|txn| engine.merge(txn, &mut scope, &mapped, target))?;
        self.inner.resolver.publish(scope);

        let faults = &self.inner.faults;
        faults.record_merge();
        for id in &outcome.materialized {
            faults.mark_faulted(FaultKey::attributes(*id));
        }
        for (id, name) in &outcome.materialized_relationships {
            faults.mark_faulted(FaultKey::relationship(*id, name.clone()));
        }
        debug!(
            url = %meta.url,
            objects = outcome.objects.len(),
            inserted = outcome.inserted.len(),
            updated = outcome.updated.len(),
            "merge committed"
        );
        Ok(outcome)
    }

    // Local changes

    /// Creates an object locally. It is pushed with `POST` on the next save.
    pub fn insert_object(
        &self,
        entity: &str,
        attributes: BTreeMap<String, Value>,
    ) -> FaultResult<ObjectId> {
        self.entity(entity)?;
        let mut record = ObjectRecord::new(entity);
        record.attributes = attributes;
        let id = self.inner.db.transaction(|txn| txn.insert(record))?;
        self.inner.changes.lock().record_insert(id);
        debug!(%id, entity, "object inserted locally");
        Ok(id)
    }

    /// Overwrites attributes of an object locally. Attributes not listed
    /// are kept. The object is pushed with `PUT` on the next save.
    pub fn update_object(&self, id: ObjectId, attributes: BTreeMap<String, Value>) -> FaultResult<()> {
        if self.inner.changes.lock().is_deleted(id) {
            return Err(FaultError::ObjectNotFound(id));
        }
        let mut record = self.require(id)?;
        let mut changed = false;
        for (name, value) in attributes {
            changed |= record.set_attribute(name, value);
        }
        if !changed {
            return Ok(());
        }
        self.inner.db.transaction(|txn| txn.put(id, record))?;
        self.inner.changes.lock().record_update(id);
        Ok(())
    }

    /// Deletes an object.
    ///
    /// Objects that were never saved are removed at once. Others stay in
    /// the store until the next save confirms the remote deletion.
    pub fn delete_object(&self, id: ObjectId) -> FaultResult<()> {
        if !self.inner.db.contains(id) {
            return Err(FaultError::ObjectNotFound(id));
        }
        let unsaved = self.inner.changes.lock().record_delete(id);
        if unsaved {
            self.remove_local(id)?;
        }
        Ok(())
    }

    /// Changes waiting for [`save_changes`](Self::save_changes).
    pub fn pending_changes(&self) -> ChangeSet {
        self.inner.changes.lock().clone()
    }

    /// Pushes pending changes one object at a time.
    ///
    /// Inserts go first, then updates, then deletions. Each response is
    /// merged into the saved object. The first failure stops the save;
    /// that object and every later one stay pending.
    pub async fn save_changes(&self, context: &Context) -> SaveOutcome {
        let pending = self.pending_changes();
        let work = pending
            .inserted
            .iter()
            .map(|id| (Method::Post, *id))
            .chain(pending.updated.iter().map(|id| (Method::Put, *id)))
            .chain(pending.deleted.iter().map(|id| (Method::Delete, *id)));

        let mut outcome = SaveOutcome::default();
        for (method, id) in work {
            match self.save_one(method, id, context).await {
                Ok(true) => {
                    self.inner.changes.lock().clear(id);
                    match method {
                        Method::Post => outcome.inserted.push(id),
                        Method::Delete => outcome.deleted.push(id),
                        _ => outcome.updated.push(id),
                    }
                }
                Ok(false) => self.inner.changes.lock().clear(id),
                Err(error) => {
                    warn!(%id, %method, %error, "save stopped");
                    outcome.failure = Some(SaveFailure { object: id, error });
                    break;
                }
            }
        }
        debug!(
            inserted = outcome.inserted.len(),
            updated = outcome.updated.len(),
            deleted = outcome.deleted.len(),
            complete = outcome.is_complete(),
            "save finished"
        );
        outcome
    }

    /// Saves one object. Returns false if the object no longer exists.
    async fn save_one(&self, method: Method, id: ObjectId, context: &Context) -> FaultResult<bool> {
        let Some(record) = self.inner.db.get(id)? else {
            return Ok(false);
        };
        let entity = self.entity(&record.entity)?;
        let request = self
            .inner
            .client
            .object_request(method, ObjectRef::new(id, entity, &record), context)?;

        self.inner.faults.record_dispatch();
        debug!(%request, "saving object");
        let response = self.inner.transport.send(request).await?;
        if !response.meta.is_success() {
            return Err(FaultError::Status {
                status: response.meta.status,
                url: response.meta.url,
            });
        }

        if method == Method::Delete {
            self.remove_local(id)?;
            return Ok(true);
        }

        self.merge_response(&response.body, &response.meta, &entity.name, &MergeTarget::Object(id))?;
        if method == Method::Post && self.require(id)?.resource_id.is_none() {
            return Err(MappingError::MissingIdentifier {
                entity: entity.name.clone(),
            }
            .into());
        }
        Ok(true)
    }

    fn remove_local(&self, id: ObjectId) -> FaultResult<()> {
        self.inner.db.transaction(|txn| txn.delete(id))?;
        self.inner.resolver.forget_object(id);
        self.inner.faults.invalidate_object(id);
        debug!(%id, "object removed locally");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MappingResult;
    use crate::rest::RestClient;
    use crate::transport::MockTransport;
    use faultline_store::AttributeType;

    fn model() -> Model {
        Model::new()
            .with_entity(
                EntitySchema::new("Post")
                    .with_attribute("title", AttributeType::Text)
                    .with_to_many("comments", "Comment", true),
            )
            .with_entity(EntitySchema::new("Comment").with_attribute("body", AttributeType::Text))
    }

    fn store() -> IncrementalStore<RestClient, Arc<MockTransport>> {
        let model = Arc::new(model());
        IncrementalStore::new(
            StoreConfig::new("rest", Arc::clone(&model)),
            RestClient::new(model),
            Arc::new(MockTransport::new()),
        )
        .unwrap()
    }

    #[test]
    fn construction_validates_config() {
        let model = Arc::new(model());
        let err = IncrementalStore::new(
            StoreConfig::new("", Arc::clone(&model)),
            RestClient::new(Arc::clone(&model)),
            MockTransport::new(),
        )
        .unwrap_err();
        assert!(matches!(err, FaultError::Configuration(_)));

        let other = Database::open_in_memory(
            Model::new().with_entity(EntitySchema::new("Video")),
        )
        .unwrap();
        let err = IncrementalStore::with_database(
            StoreConfig::new("rest", Arc::clone(&model)),
            Arc::new(other),
            RestClient::new(model),
            MockTransport::new(),
        )
        .unwrap_err();
        assert!(matches!(err, FaultError::Configuration(_)));
    }

    #[test]
    fn import_merges_without_fetching() {
        let store = store();
        let body = Value::Array(vec![
            Value::object([("id", Value::from(1)), ("title", Value::from("a"))]),
            Value::object([("id", Value::from(2)), ("title", Value::from("b"))]),
        ]);
        let ids = store.import("Post", &body).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(store.object_for_resource("Post", "2"), Some(ids[1]));
        assert_eq!(store.transport().request_count(), 0);
        assert_eq!(
            store.fault_state(&FaultKey::attributes(ids[0])),
            FaultState::Faulted
        );
        assert!(matches!(
            store.import("Video", &body),
            Err(FaultError::UnknownEntity(_))
        ));
    }

    #[tokio::test]
    async fn loaded_attributes_are_not_refetched() {
        let store = store();
        store.transport().respond(
            Method::Get,
            "/posts/1",
            Value::object([("id", Value::from(1)), ("title", Value::from("Hello"))]),
        );
        let id = store.resolve_object("Post", "1").unwrap();
        let ctx = Context::new();

        let record = store.object_attributes(id, &ctx).await.unwrap();
        assert_eq!(record.attribute("title"), Some(&Value::from("Hello")));
        store.object_attributes(id, &ctx).await.unwrap();
        assert_eq!(store.transport().request_count(), 1);

        assert!(store.invalidate(&FaultKey::attributes(id)));
        store.object_attributes(id, &ctx).await.unwrap();
        assert_eq!(store.transport().request_count(), 2);
    }

    #[tokio::test]
    async fn unknown_relationship_is_a_configuration_error() {
        let store = store();
        let id = store.resolve_object("Post", "1").unwrap();
        let err = store
            .relationship(id, "likes", &Context::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    /// A client that only knows how to read representations.
    struct ReadOnly;

    impl ResourceClient for ReadOnly {
        fn resource_identifier(
            &self,
            representation: &Value,
            _: &EntitySchema,
            _: &ResponseMeta,
        ) -> Option<String> {
            representation.get("id").and_then(Value::as_identifier)
        }

        fn attributes(
            &self,
            _: &Value,
            _: &EntitySchema,
            _: &ResponseMeta,
        ) -> MappingResult<BTreeMap<String, Value>> {
            Ok(BTreeMap::new())
        }
    }

    #[tokio::test]
    async fn missing_request_builder_fails_at_first_use() {
        let model = Arc::new(model());
        let store = IncrementalStore::new(
            StoreConfig::new("readonly", model),
            ReadOnly,
            MockTransport::new(),
        )
        .unwrap();
        let ctx = Context::new();

        let err = store.execute_query(Query::new("Post"), &ctx).await.unwrap_err();
        assert_eq!(err, FaultError::Unimplemented { method: "query_request" });
        let key = FaultKey::query(Query::new("Post"));
        assert_eq!(store.fault_state(&key), FaultState::Error);

        let id = store.resolve_object("Post", "1").unwrap();
        let err = store.object_attributes(id, &ctx).await.unwrap_err();
        assert_eq!(err, FaultError::Unimplemented { method: "object_request" });
        assert_eq!(store.transport().request_count(), 0);
    }

    #[test]
    fn local_changes_are_tracked() {
        let store = store();
        let mut attributes = BTreeMap::new();
        attributes.insert("title".to_string(), Value::from("Draft"));
        let draft = store.insert_object("Post", attributes.clone()).unwrap();

        let imported = store
            .import("Post", &Value::object([("id", Value::from(5)), ("title", Value::from("x"))]))
            .unwrap()[0];
        store.update_object(imported, attributes).unwrap();

        let pending = store.pending_changes();
        assert_eq!(pending.inserted, vec![draft]);
        assert_eq!(pending.updated, vec![imported]);

        store.delete_object(draft).unwrap();
        assert!(store.object(draft).unwrap().is_none());
        store.delete_object(imported).unwrap();
        assert!(store.object(imported).unwrap().is_some());
        assert_eq!(store.pending_changes().deleted, vec![imported]);

        assert!(matches!(
            store.update_object(imported, BTreeMap::new()),
            Err(FaultError::ObjectNotFound(_))
        ));
        let mut wrong = BTreeMap::new();
        wrong.insert("title".to_string(), Value::from(3));
        let err = store.insert_object("Post", wrong).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Store);
    }
}
