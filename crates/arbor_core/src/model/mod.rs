//! Domain model for the hierarchy tree and the record definition registry.
//!
//! # Responsibility
//! - Define canonical node/definition shapes used by repositories and services.
//! - Hold pure structural rules (type chain, schema merge) with no storage access.
//!
//! # Invariants
//! - Every entity is identified by a stable UUID.
//! - Node and definition ids never collide in practice, so one id map can
//!   carry both during a clone.

pub mod definition;
pub mod node;
