//! Property-based test generators using proptest.
//!
//! Provides strategies for generating remote payloads for the blog model.
//! Generated payloads always carry unique resource identifiers per entity.

use crate::fixtures::{comment_json, post_json};
use faultline_codec::Value;
use proptest::prelude::*;

/// Strategy for generating resource identifiers as the wire sends them:
/// either integers or non-empty text.
pub fn resource_id_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        (1i64..1_000_000).prop_map(Value::Integer),
        prop::string::string_regex("[a-z0-9-]{1,12}")
            .expect("Invalid regex")
            .prop_map(Value::Text),
    ]
}

/// Strategy for generating short texts.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z0-9 ]{0,24}").expect("Invalid regex")
}

/// Shape of a generated post.
#[derive(Debug, Clone)]
pub struct PostShape {
    /// Title.
    pub title: String,
    /// Comment bodies.
    pub comments: Vec<String>,
}

/// Strategy for generating a post shape.
pub fn post_shape_strategy() -> impl Strategy<Value = PostShape> {
    (text_strategy(), prop::collection::vec(text_strategy(), 0..4))
        .prop_map(|(title, comments)| PostShape { title, comments })
}

/// Builds the payload for a list of post shapes.
///
/// Post `i` gets resource id `i + 1`; comment `j` of post `i` gets
/// `(i + 1) * 1000 + j`.
pub fn blog_payload(posts: &[PostShape]) -> Value {
    Value::Array(
        posts
            .iter()
            .zip(1i64..)
            .map(|(shape, id)| {
                let comments: Vec<Value> = shape
                    .comments
                    .iter()
                    .zip(0i64..)
                    .map(|(body, j)| comment_json(id * 1000 + j, body))
                    .collect();
                post_json(id, &shape.title, &comments)
            })
            .collect(),
    )
}

/// Strategy for generating a blog payload with up to `max_posts` posts.
pub fn blog_payload_strategy(max_posts: usize) -> impl Strategy<Value = (Vec<PostShape>, Value)> {
    prop::collection::vec(post_shape_strategy(), 0..max_posts).prop_map(|posts| {
        let payload = blog_payload(&posts);
        (posts, payload)
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
