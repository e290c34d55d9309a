//! API request handlers

pub mod attachments;
pub mod files;
