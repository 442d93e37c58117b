//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define storage contracts for hierarchy nodes and record definitions.
//! - Isolate SQLite query details from service/business orchestration.
//!
//! # Invariants
//! - Repositories refuse connections that are not fully migrated.
//! - Repository APIs return semantic errors (`NotFound`) in addition to DB
//!   transport errors.
//! - Repositories accept any `&Connection`, including an open transaction,
//!   so services can compose several writes into one atomic unit.

pub mod common;
pub mod definition_repo;
pub mod node_repo;
