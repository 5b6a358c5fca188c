//! # wikimirror Testkit
//!
//! Test utilities for wikimirror.
//!
//! This crate provides:
//! - [`FakeWiki`], an in-memory wiki implementing both engine collaborators
//! - Store fixtures and mirror comparison helpers
//! - Property-based generators of wiki mutations using proptest
//!
//! ## Usage
//!
//! ```rust
//! use wikimirror_testkit::prelude::*;
//!
//! let (wiki, _) = scenarios::small_wiki();
//! let mut store = TestStore::memory();
//! let engine = engine_for(&wiki);
//!
//! engine.sync_at(&mut store, wiki.tick()).unwrap();
//! assert_eq!(store.contents(), fresh_mirror(&wiki).contents());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fake;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fake::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fake::*;
pub use fixtures::*;
pub use generators::*;
