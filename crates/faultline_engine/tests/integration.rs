//! End-to-end tests for the incremental store over a mock transport.

use faultline_codec::Value;
use faultline_engine::{
    Context, ErrorKind, FaultError, FaultKey, FaultResult, FaultState, IncrementalStore,
    MappingError, MappingResult, Method, MockTransport, ObjectRef, Predicate, Query,
    Representations, Request, ResourceClient, ResponseMeta, RestClient, StoreConfig,
};
use faultline_store::{AttributeType, EntitySchema, Model, ObjectId, RelationshipValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

type Store<C = RestClient> = IncrementalStore<C, Arc<MockTransport>>;

fn blog() -> Arc<Model> {
    Arc::new(
        Model::new()
            .with_entity(
                EntitySchema::new("Post")
                    .with_attribute("title", AttributeType::Text)
                    .with_to_many("comments", "Comment", true)
                    .with_to_one("author", "Person"),
            )
            .with_entity(
                EntitySchema::new("Comment")
                    .with_attribute("body", AttributeType::Text)
                    .with_to_one("post", "Post"),
            )
            .with_entity(
                EntitySchema::new("Person")
                    .with_attribute("name", AttributeType::Text)
                    .with_to_one("friend", "Person"),
            ),
    )
}

fn store() -> Store {
    let model = blog();
    IncrementalStore::new(
        StoreConfig::new("rest", Arc::clone(&model)),
        RestClient::new(model),
        Arc::new(MockTransport::new()),
    )
    .unwrap()
}

fn post(id: i64, title: &str) -> Value {
    Value::object([("id", Value::from(id)), ("title", Value::from(title))])
}

fn comment(id: i64, body: &str) -> Value {
    Value::object([("id", Value::from(id)), ("body", Value::from(body))])
}

fn title_of(store: &Store, id: ObjectId) -> Option<Value> {
    store
        .object(id)
        .unwrap()
        .and_then(|record| record.attribute("title").cloned())
}

#[tokio::test]
async fn concurrent_accesses_share_one_request() {
    let store = store();
    store.transport().respond(Method::Get, "/posts/1", post(1, "Hello"));
    store.transport().set_latency(Duration::from_millis(50));
    let id = store.resolve_object("Post", "1").unwrap();
    let ctx = Context::new();

    let (a, b) = tokio::join!(
        store.object_attributes(id, &ctx),
        store.object_attributes(id, &ctx)
    );
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(store.transport().requests_to(Method::Get, "/posts/1"), 1);
    let stats = store.stats();
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.coalesced, 1);
    assert_eq!(store.fault_state(&FaultKey::attributes(id)), FaultState::Faulted);
}

#[tokio::test]
async fn embedded_resources_are_reused_by_later_fetches() {
    let store = store();
    store.transport().respond(
        Method::Get,
        "/posts",
        Value::Array(vec![Value::object([
            ("id", Value::from(42)),
            ("title", Value::from("Hello")),
            (
                "comments",
                Value::Array(vec![comment(1, "first"), comment(2, "second")]),
            ),
        ])]),
    );
    let ctx = Context::new();

    let posts = store.execute_query(Query::new("Post"), &ctx).await.unwrap();
    assert_eq!(posts.len(), 1);
    let post_id = posts[0];

    let RelationshipValue::ToMany(comments) =
        store.relationship(post_id, "comments", &ctx).await.unwrap()
    else {
        panic!("comments must be to-many");
    };
    assert_eq!(comments.len(), 2);
    assert_eq!(store.object_for_resource("Comment", "1"), Some(comments[0]));

    let record = store.object_attributes(comments[1], &ctx).await.unwrap();
    assert_eq!(record.attribute("body"), Some(&Value::from("second")));
    assert_eq!(store.transport().request_count(), 1);

    store.transport().respond(Method::Get, "/comments/1", comment(1, "edited"));
    assert!(store.invalidate(&FaultKey::attributes(comments[0])));
    let record = store.object_attributes(comments[0], &ctx).await.unwrap();
    assert_eq!(record.attribute("body"), Some(&Value::from("edited")));
    assert_eq!(store.object_for_resource("Comment", "1"), Some(comments[0]));
    assert_eq!(store.database().count("Comment"), 2);
    assert_eq!(store.database().count("Post"), 1);

    let ids = store
        .import("Comment", &Value::Array(vec![comment(2, "again")]))
        .unwrap();
    assert_eq!(ids, vec![comments[1]]);
}

#[tokio::test]
async fn relationship_faults_fetch_once() {
    let store = store();
    let post_id = store.import("Post", &post(42, "Hello")).unwrap()[0];
    store.transport().respond(
        Method::Get,
        "/posts/42/comments",
        Value::Array(vec![comment(7, "nice"), comment(8, "agreed")]),
    );
    let ctx = Context::new();

    let first = store.relationship(post_id, "comments", &ctx).await.unwrap();
    let second = store.relationship(post_id, "comments", &ctx).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.targets().count(), 2);
    assert_eq!(store.transport().requests_to(Method::Get, "/posts/42/comments"), 1);

    let author = store.relationship(post_id, "author", &ctx).await;
    assert!(matches!(author, Err(FaultError::Status { status: 404, .. })));
    assert_eq!(
        store.fault_state(&FaultKey::relationship(post_id, "author")),
        FaultState::Error
    );
}

#[tokio::test]
async fn cyclic_graphs_merge_once_per_object() {
    let store = store();
    store.transport().respond(
        Method::Get,
        "/persons/a",
        Value::object([
            ("id", Value::from("a")),
            ("name", Value::from("Ada")),
            (
                "friend",
                Value::object([
                    ("id", Value::from("b")),
                    ("name", Value::from("Bo")),
                    ("friend", Value::object([("id", Value::from("a"))])),
                ]),
            ),
        ]),
    );
    let a = store.resolve_object("Person", "a").unwrap();
    store.object_attributes(a, &Context::new()).await.unwrap();

    let b = store.object_for_resource("Person", "b").unwrap();
    let record_a = store.object(a).unwrap().unwrap();
    let record_b = store.object(b).unwrap().unwrap();
    assert_eq!(record_a.to_one("friend"), Some(b));
    assert_eq!(record_b.to_one("friend"), Some(a));
    assert_eq!(record_a.attribute("name"), Some(&Value::from("Ada")));
    assert_eq!(store.database().count("Person"), 2);
}

#[tokio::test]
async fn failed_merge_changes_nothing() {
    let store = store();
    store.transport().respond(
        Method::Get,
        "/posts",
        Value::Array(vec![post(1, "ok"), Value::object([("id", Value::from(2)), ("title", Value::from(7))])]),
    );
    let query = Query::new("Post");

    let err = store
        .execute_query(query.clone(), &Context::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Mapping);
    assert!(matches!(err, FaultError::Mapping(MappingError::TypeMismatch { .. })));
    assert!(store.database().is_empty());
    assert_eq!(store.fault_state(&FaultKey::query(query)), FaultState::Error);
}

#[tokio::test]
async fn errored_faults_retry_on_next_access() {
    let store = store();
    store
        .transport()
        .respond_with_status(Method::Get, "/posts/3", 503, Value::Null);
    store.transport().respond(Method::Get, "/posts/3", post(3, "Back"));
    let id = store.resolve_object("Post", "3").unwrap();
    let ctx = Context::new();

    let err = store.object_attributes(id, &ctx).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(store.fault_state(&FaultKey::attributes(id)), FaultState::Error);

    store.object_attributes(id, &ctx).await.unwrap();
    assert_eq!(title_of(&store, id), Some(Value::from("Back")));
    assert_eq!(store.stats().failures, 1);
}

#[tokio::test]
async fn queries_send_filters_and_merge_partial_updates() {
    let store = store();
    let id = store.import("Post", &post(5, "Old")).unwrap()[0];
    store.transport().respond(
        Method::Get,
        "/posts",
        Value::Array(vec![Value::object([("id", Value::from(5))])]),
    );
    let ctx = Context::new().with_header("Authorization", "Bearer token");
    let query = Query::new("Post")
        .with_predicate(Predicate::eq("title", "Old"))
        .with_limit(10);

    let ids = store.execute_query(query, &ctx).await.unwrap();
    assert_eq!(ids, vec![id]);
    assert_eq!(title_of(&store, id), Some(Value::from("Old")));

    let sent = store.transport().requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to_string(), "GET /posts?title=Old&limit=10");
    assert!(sent[0]
        .headers
        .iter()
        .any(|(name, value)| name == "Authorization" && value == "Bearer token"));
}

#[tokio::test]
async fn range_filters_are_applied_to_the_response() {
    let store = store();
    store.transport().respond(
        Method::Get,
        "/posts",
        Value::Array(vec![post(1, "apple"), post(2, "zebra"), post(3, "mango")]),
    );
    let query = Query::new("Post")
        .with_predicate(Predicate::Gt("title".into(), Value::from("m")))
        .with_limit(1);

    let ids = store.execute_query(query, &Context::new()).await.unwrap();
    assert_eq!(ids, vec![store.object_for_resource("Post", "2").unwrap()]);

    let sent = store.transport().requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to_string(), "GET /posts");
    assert_eq!(store.database().count("Post"), 3);
}

#[tokio::test]
async fn queries_under_different_credentials_fetch_separately() {
    let store = store();
    store.transport().respond(Method::Get, "/posts", Value::Array(vec![post(1, "mine")]));
    store.transport().respond(Method::Get, "/posts", Value::Array(vec![post(2, "theirs")]));
    store.transport().set_latency(Duration::from_millis(30));
    let ada = Context::new().with_header("Authorization", "Bearer ada");
    let bo = Context::new().with_header("Authorization", "Bearer bo");

    let (a, b) = tokio::join!(
        store.execute_query(Query::new("Post"), &ada),
        store.execute_query(Query::new("Post"), &bo),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_ne!(a, b);
    assert_eq!(store.transport().requests_to(Method::Get, "/posts"), 2);
    assert_eq!(store.stats().coalesced, 0);
    assert_eq!(
        store.fault_state(&FaultKey::query_in(Query::new("Post"), &ada)),
        FaultState::Faulted
    );
}

#[tokio::test]
async fn save_pushes_inserts_updates_and_deletes() {
    let store = store();
    let ctx = Context::new();
    let mut attributes = BTreeMap::new();
    attributes.insert("title".to_string(), Value::from("Draft"));
    let draft = store.insert_object("Post", attributes).unwrap();
    store.transport().respond(Method::Post, "/posts", post(99, "Draft"));

    let outcome = store.save_changes(&ctx).await;
    assert!(outcome.is_complete());
    assert_eq!(outcome.inserted, vec![draft]);
    assert_eq!(store.object_for_resource("Post", "99"), Some(draft));
    assert!(store.pending_changes().is_empty());

    let mut edit = BTreeMap::new();
    edit.insert("title".to_string(), Value::from("Final"));
    store.update_object(draft, edit).unwrap();
    store
        .transport()
        .respond_with_status(Method::Put, "/posts/99", 422, Value::Null);
    let outcome = store.save_changes(&ctx).await;
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.object, draft);
    assert!(matches!(failure.error, FaultError::Status { status: 422, .. }));
    assert_eq!(store.pending_changes().updated, vec![draft]);

    store.delete_object(draft).unwrap();
    store.transport().respond(Method::Delete, "/posts/99", Value::Null);
    let outcome = store.save_changes(&ctx).await;
    assert_eq!(outcome.deleted, vec![draft]);
    assert!(store.object(draft).unwrap().is_none());
    assert_eq!(store.object_for_resource("Post", "99"), None);
}

#[tokio::test]
async fn inserts_without_identifier_in_response_fail() {
    let store = store();
    let mut attributes = BTreeMap::new();
    attributes.insert("title".to_string(), Value::from("Draft"));
    let draft = store.insert_object("Post", attributes).unwrap();
    store
        .transport()
        .respond_with_status(Method::Post, "/posts", 201, Value::Null);

    let outcome = store.save_changes(&Context::new()).await;
    let failure = outcome.failure.unwrap();
    assert!(matches!(
        failure.error,
        FaultError::Mapping(MappingError::MissingIdentifier { .. })
    ));
    assert_eq!(store.pending_changes().inserted, vec![draft]);
}

/// Wraps the REST client and answers queries from local data only.
struct LocalQueries(RestClient);

impl ResourceClient for LocalQueries {
    fn representations(
        &self,
        body: &Value,
        entity: &EntitySchema,
        meta: &ResponseMeta,
    ) -> MappingResult<Representations> {
        self.0.representations(body, entity, meta)
    }

    fn resource_identifier(
        &self,
        representation: &Value,
        entity: &EntitySchema,
        meta: &ResponseMeta,
    ) -> Option<String> {
        self.0.resource_identifier(representation, entity, meta)
    }

    fn attributes(
        &self,
        representation: &Value,
        entity: &EntitySchema,
        meta: &ResponseMeta,
    ) -> MappingResult<BTreeMap<String, Value>> {
        self.0.attributes(representation, entity, meta)
    }

    fn object_request(
        &self,
        method: Method,
        object: ObjectRef<'_>,
        context: &Context,
    ) -> FaultResult<Request> {
        self.0.object_request(method, object, context)
    }

    fn should_fetch_query(&self, _query: &Query, _context: &Context) -> bool {
        false
    }
}

#[tokio::test]
async fn policy_hooks_skip_the_network() {
    let model = blog();
    let store: Store<LocalQueries> = IncrementalStore::new(
        StoreConfig::new("local", Arc::clone(&model)),
        LocalQueries(RestClient::new(model)),
        Arc::new(MockTransport::new()),
    )
    .unwrap();
    store
        .import(
            "Post",
            &Value::Array(vec![post(1, "b"), post(2, "a"), post(3, "c")]),
        )
        .unwrap();

    let query = Query::new("Post")
        .with_predicate(Predicate::Ne("title".into(), Value::from("c")))
        .sorted_by(faultline_engine::SortDescriptor::ascending("title"));
    let ids = store.execute_query(query, &Context::new()).await.unwrap();

    let titles: Vec<Value> = ids
        .iter()
        .map(|id| store.object(*id).unwrap().unwrap().attributes["title"].clone())
        .collect();
    assert_eq!(titles, vec![Value::from("a"), Value::from("b")]);
    assert_eq!(store.transport().request_count(), 0);
    assert_eq!(store.stats().policy_skips, 1);
}
