//! Use-case services over the repository layer.
//!
//! # Responsibility
//! - `tree_service`: hierarchy create/move/delete and traversal.
//! - `definition_service`: record definition registry and template libraries.
//! - `reference_rewriter`: pure id remapping for cloned entities.
//! - `clone_service`: two-phase transactional subtree clone.

pub mod clone_service;
pub mod definition_service;
pub mod reference_rewriter;
pub mod tree_service;
