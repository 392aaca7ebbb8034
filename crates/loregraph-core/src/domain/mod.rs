//! Domain layer
//!
//! Knowledge canonicalization and validation, and the consistency workflow
//! that drives generation against it.

pub mod knowledge;
pub mod workflow;
