//! # Shared Types Crate
//!
//! Primitive identifiers and storage errors used across the workspace.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: identifiers are plain fixed-width arrays
//!   defined once here, so encodings agree between crates.
//! - **Backend-agnostic errors**: key-value backends report failures through
//!   [`StorageError`] regardless of what sits underneath.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
