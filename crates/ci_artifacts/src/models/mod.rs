//! Domain types and error taxonomy

pub mod error;
pub mod types;
