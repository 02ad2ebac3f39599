//! forge
//!
//! Access to the remote repository host.
//!
//! # Architecture
//!
//! Two capability traits describe what the appliers need from the remote:
//! [`GitDatabase`] for the immutable object graph (blobs, trees, commits,
//! references, pull requests) and [`ContentCommits`] for committing named
//! file changes in one request. Appliers hold them as trait objects so the
//! same code runs against GitHub and against the in-memory mock.
//!
//! # Modules
//!
//! - `traits`: capability traits, wire types, and [`ForgeError`]
//! - [`github`]: GitHub implementation using REST and GraphQL APIs
//! - [`mock`]: in-memory implementation for deterministic testing

pub mod github;
pub mod mock;
mod traits;

pub use traits::*;
