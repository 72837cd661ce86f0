//! FleetChat Shared Types and Utilities
//!
//! This crate contains the message model, ids, and the error taxonomy shared by
//! the session engine and its front ends.

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;
