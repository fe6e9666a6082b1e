//! # Stowage Testkit
//!
//! Test utilities for Stowage.
//!
//! This crate provides:
//! - Temporary managers and environments that clean up after themselves
//! - Property-based test generators using proptest
//! - A model harness that checks a store against an in-memory map
//! - Journal tampering helpers for crash-recovery tests
//!
//! The cross-crate scenario tests live in this crate's `tests/` directory.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stowage_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_manager() {
//!     with_temp_manager(|manager| {
//!         let store = manager.open_store("s").unwrap();
//!         // ... test operations
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
