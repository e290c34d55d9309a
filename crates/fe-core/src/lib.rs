//! # fe-core
//!
//! Core types and utilities for File Entity RS.
//!
//! This crate provides the foundational building blocks used across the other crates:
//! - The shared error type and its HTTP mapping
//! - Identifier types
//! - Configuration types and environment loading

pub mod config;
pub mod error;
pub mod traits;

pub use error::*;
pub use traits::*;
