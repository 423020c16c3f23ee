//! # Faultline Engine
//!
//! Faulting and merge engine for object stores backed by a remote API.
//!
//! This crate provides:
//! - The [`ResourceClient`] extension point and a configurable [`RestClient`]
//! - Fault tracking with one in-flight request per unit of data
//! - Mapping of response bodies into typed representations
//! - Identity resolution from remote identifiers to local objects
//! - Transactional merging of object graphs
//! - HTTP and mock transports with retry
//!
//! ## Architecture
//!
//! [`IncrementalStore`] sits in front of a local [`faultline_store::Database`].
//! Accessing a query result, an object's attributes or a relationship that
//! has not been loaded triggers a fault:
//! 1. The client builds a request for the unit
//! 2. The transport sends it on a background task
//! 3. The response is mapped and merged in one transaction
//! 4. Everyone waiting on the fault receives the same outcome
//!
//! ## Key Invariants
//!
//! - A remote identifier maps to at most one local object per entity
//! - At most one request is in flight per fault
//! - A failed merge leaves the local store unchanged
//! - Merging the same response twice changes nothing the second time

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod changes;
mod client;
mod config;
mod context;
mod error;
mod fault;
mod http;
mod identity;
mod mapper;
mod merge;
mod query;
mod request;
mod rest;
mod store;
mod transport;

pub use changes::{ChangeSet, SaveFailure, SaveOutcome};
pub use client::{ObjectRef, Representations, ResourceClient};
pub use config::{HttpConfig, RetryConfig, StoreConfig};
pub use context::Context;
pub use error::{ErrorKind, FaultError, FaultResult, MappingError, MappingResult};
pub use fault::{
    Claim, Completion, FaultKey, FaultState, FaultTracker, FaultUnit, FetchOutcome, FetchStats,
    Waiter,
};
pub use http::HttpTransport;
pub use identity::{IdentityResolver, ResolveScope, Resolved};
pub use mapper::{MappedRelated, MappedRepresentation, RelatedNode, RepresentationMapper};
pub use merge::{MergeEngine, MergeOutcome, MergeTarget, Unlink};
pub use query::{compare_values, Predicate, Query, QueryTranslator, SortDescriptor, SortDirection};
pub use request::{Method, Request, Response, ResponseMeta};
pub use rest::RestClient;
pub use store::IncrementalStore;
pub use transport::{MockTransport, Transport};
