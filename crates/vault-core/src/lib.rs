//! Vault core library: an access-controlled store of analysis artifacts.
//!
//! This crate holds content-addressed objects (files, configs, text blobs)
//! deduplicated by fingerprint, the parent/child relations between them,
//! their tags and comments, the group-based sharing model that decides who
//! can see what, and a Lucene-style query language compiled to SQL.  The
//! [`Vault`] facade is the entry point; the `store` and `query` layers
//! underneath it can also be used directly.
//!
//! The library emits `tracing` events but never installs a subscriber.

pub mod auth;
pub mod config;
pub mod digest;
pub mod errors;
pub mod hooks;
pub mod models;
pub mod query;
pub mod service;
pub mod store;

pub use config::VaultConfig;
pub use errors::{VaultError, VaultResult};
pub use hooks::{LoggingHooks, NoopHooks, ObjectHooks};
pub use models::{
    Capability, Comment, ListRequest, MetakeyValue, NewBlob, NewConfig, NewFile, NewObject,
    ObjectDetail, ObjectRecord, ObjectType, UploadOptions, UploadOutcome, UploadTarget, User,
};
pub use service::Vault;
