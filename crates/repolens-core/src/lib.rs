//! # repolens core
//!
//! Runtime-free logic shared by the repolens pipeline: index entries,
//! chunking, the embedding and index-store traits, change-set
//! categorization, and context assembly.
//!
//! This crate contains no sqlx, git, HTTP or filesystem I/O. The
//! application crate plugs concrete stores and embedders into the traits
//! defined here.

pub mod changeset;
pub mod chunk;
pub mod context;
pub mod embedding;
pub mod models;
pub mod store;
