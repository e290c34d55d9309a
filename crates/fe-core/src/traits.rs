//! Identifier types shared across crates

/// Primary key type for file records and parent records
pub type Id = i64;
