//! Common utilities for docstore
//!
//! This crate provides the error type shared by the docstore crates.

pub mod error;

pub use error::{DocStoreError, Result};
