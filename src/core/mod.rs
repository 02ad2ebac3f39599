//! core
//!
//! Domain types and configuration shared by every layer.
//!
//! # Modules
//!
//! - [`types`] - Validated value types (repository, file mode, patch header)
//! - [`config`] - Configuration schema and loading

pub mod config;
pub mod types;
