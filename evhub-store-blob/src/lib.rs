//! Blob-backed [`evhub_core::CheckpointStore`] reference implementation
//! (spec.md §4.1, §6 "Persisted layout").
//!
//! Each ownership record and each checkpoint maps to a distinct object in
//! a content-addressed blob namespace, keyed
//! `"<ns>/<hub>/<group>/ownership/<partition>"` and
//! `"<ns>/<hub>/<group>/checkpoint/<partition>"`. Objects carry no body
//! bytes — only typed metadata (`ownerid`, `sequencenumber`, `offset`).
//! The opaque version token the core's optimistic-concurrency protocol
//! needs is the blob's `e_tag`, and compare-and-set is implemented with
//! [`object_store::PutMode::Create`]/[`object_store::PutMode::Update`]
//! rather than a hand-rolled lock.

mod error;
mod paths;
mod store;

pub use error::Error;
pub use store::BlobStore;
