//! Test fixtures and store helpers.
//!
//! Provides a blog model, stores wired to a [`MockTransport`], and builders
//! for the JSON-shaped payloads a conventional REST API returns.

use faultline_codec::Value;
use faultline_engine::{IncrementalStore, MockTransport, RestClient, StoreConfig};
use faultline_store::{AttributeType, Database, EntitySchema, Model};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Store type used by every fixture.
pub type TestStore = IncrementalStore<RestClient, Arc<MockTransport>>;

/// The blog model: posts with ordered comments and an author, comments
/// pointing back to their post, and people who may have a friend.
pub fn blog_model() -> Model {
    Model::new()
        .with_entity(
            EntitySchema::new("Post")
                .with_attribute("title", AttributeType::Text)
                .with_optional("views", AttributeType::Integer)
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
        )
}

/// A store with the mock transport it talks to.
pub struct StoreFixture {
    /// The store.
    pub store: TestStore,
    /// The transport, for queuing replies and inspecting requests.
    pub transport: Arc<MockTransport>,
}

impl StoreFixture {
    /// Creates a fixture over a fresh in-memory database.
    pub fn new(model: Model) -> Self {
        let model = Arc::new(model);
        let transport = Arc::new(MockTransport::new());
        let store = IncrementalStore::new(
            StoreConfig::new("rest", Arc::clone(&model)),
            RestClient::new(model),
            Arc::clone(&transport),
        )
        .expect("Failed to create store");
        Self { store, transport }
    }

    /// Creates a fixture over an existing database.
    pub fn with_database(db: Database) -> Self {
        let model = db.shared_model();
        let transport = Arc::new(MockTransport::new());
        let store = IncrementalStore::with_database(
            StoreConfig::new("rest", Arc::clone(&model)),
            Arc::new(db),
            RestClient::new(model),
            Arc::clone(&transport),
        )
        .expect("Failed to create store");
        Self { store, transport }
    }
}

impl std::ops::Deref for StoreFixture {
    type Target = TestStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Creates a blog store over a mock transport.
pub fn blog_store() -> StoreFixture {
    StoreFixture::new(blog_model())
}

/// Runs a test with a blog store.
pub fn with_blog_store<F, R>(f: F) -> R
where
    F: FnOnce(&StoreFixture) -> R,
{
    let fixture = blog_store();
    f(&fixture)
}

/// A snapshot file in a temporary directory.
pub struct SnapshotFile {
    path: PathBuf,
    _temp_dir: TempDir,
}

impl SnapshotFile {
    /// Creates a path for a snapshot that does not exist yet.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        Self {
            path: temp_dir.path().join("cache.snap"),
            _temp_dir: temp_dir,
        }
    }

    /// Snapshot path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for SnapshotFile {
    fn default() -> Self {
        Self::new()
    }
}

/// A comment representation.
pub fn comment_json(id: i64, body: &str) -> Value {
    Value::object([("id", Value::from(id)), ("body", Value::from(body))])
}

/// A post representation with embedded comments.
pub fn post_json(id: i64, title: &str, comments: &[Value]) -> Value {
    let mut post = Value::object([("id", Value::from(id)), ("title", Value::from(title))]);
    if !comments.is_empty() {
        post.insert("comments", Value::Array(comments.to_vec()));
    }
    post
}

/// A person representation, optionally with a friend.
pub fn person_json(id: &str, name: &str, friend: Option<Value>) -> Value {
    let mut person = Value::object([("id", Value::from(id)), ("name", Value::from(name))]);
    if let Some(friend) = friend {
        person.insert("friend", friend);
    }
    person
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a blog store holding `posts` posts with `comments` comments
    /// each. Post `i` has resource id `i + 1`; its comments have ids
    /// `(i + 1) * 1000 + j`.
    pub fn seeded_blog(posts: usize, comments: usize) -> StoreFixture {
        let fixture = blog_store();
        let body = Value::Array(
            (1..=posts as i64)
                .map(|p| {
                    let comments: Vec<Value> = (0..comments as i64)
                        .map(|c| comment_json(p * 1000 + c, &format!("comment {c} on {p}")))
                        .collect();
                    post_json(p, &format!("post {p}"), &comments)
                })
                .collect(),
        );
        fixture.import("Post", &body).expect("Failed to seed posts");
        fixture
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blog_model_is_valid() {
        assert!(blog_model().validate().is_ok());
    }

    #[test]
    fn payload_builders() {
        let post = post_json(1, "Hello", &[comment_json(2, "hi")]);
        assert_eq!(post.get("title"), Some(&Value::from("Hello")));
        assert!(post.get("comments").is_some());
        assert!(post_json(1, "Hello", &[]).get("comments").is_none());
    }

    #[test]
    fn seeded_scenario() {
        let fixture = scenarios::seeded_blog(3, 2);
        assert_eq!(fixture.database().count("Post"), 3);
        assert_eq!(fixture.database().count("Comment"), 6);
        assert!(fixture.object_for_resource("Comment", "2001").is_some());
        assert_eq!(fixture.transport.request_count(), 0);
    }

    #[test]
    fn with_blog_store_runs() {
        let count = with_blog_store(|fixture| fixture.database().len());
        assert_eq!(count, 0);
    }
}
