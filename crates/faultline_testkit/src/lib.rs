//! # Faultline Testkit
//!
//! Test utilities for Faultline.
//!
//! This crate provides:
//! - A blog model fixture and store builders over a mock transport
//! - JSON-shaped payload builders
//! - Property-based test generators using proptest
//! - A scenario harness that checks merged data against expectations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use faultline_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn fetches_a_post() {
//!     let fixture = blog_store();
//!     fixture.transport.respond(Method::Get, "/posts/1", post_json(1, "Hello", &[]));
//!     let id = fixture.resolve_object("Post", "1").unwrap();
//!     fixture.object_attributes(id, &Context::new()).await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use faultline_codec::Value;
    pub use faultline_engine::{Context, Method, MockTransport, Query};
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
