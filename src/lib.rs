//! patchpr - Turn patches into commits and pull requests on GitHub
//!
//! patchpr applies unified-diff patches to a repository hosted on GitHub
//! entirely through the API: no clone, no working tree. Each patch becomes
//! a commit, a branch is pointed at the result, and a pull request can be
//! opened from it.
//!
//! # Architecture
//!
//! - [`core`] - Value types and configuration
//! - [`patch`] - Patch parsing and application of one file's hunks
//! - [`forge`] - Remote object-graph and content-commit APIs (GitHub, mock)
//! - [`applier`] - Tree-based and content-based patch appliers
//! - [`reference`] - Branch updates and pull requests
//! - [`fork`] - Fork creation and readiness polling
//! - [`cli`] - Command-line interface
//!
//! # Invariants
//!
//! 1. Appliers stage changes locally; nothing reaches the remote until a
//!    blob, tree or commit is created
//! 2. A failed or cancelled operation leaves staged state as it was
//! 3. Branches only move forward unless forced

pub mod applier;
pub mod cli;
pub mod core;
pub mod forge;
pub mod fork;
pub mod patch;
pub mod reference;
