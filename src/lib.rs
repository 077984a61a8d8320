//! # repolens
//!
//! Keeps a semantic vector index of git repositories current and retrieves
//! related code for change-sets.
//!
//! Repositories are cloned, their source files chunked and embedded, and the
//! resulting entries stored in SQLite. Push and merge-request events are
//! applied incrementally through delta sync. A readiness gate lets callers
//! block until a repository is indexed, and the context assembler turns a
//! diff into a deduplicated bundle of related code.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────┐
//! │ git / API  │──▶│ Chunk+Embed  │──▶│  SQLite   │
//! │  fetcher   │   │  (retrying)  │   │  vectors  │
//! └────────────┘   └──────────────┘   └─────┬─────┘
//!                                           │
//!                     ┌─────────────────────┤
//!                     ▼                     ▼
//!               ┌───────────┐        ┌────────────┐
//!               │ readiness │        │  context   │
//!               │   gate    │        │ assembler  │
//!               └───────────┘        └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite index store |
//! | [`embedding`] | Embedding providers and retry wrapper |
//! | [`git`] | Repository validation and cloning |
//! | [`hosting`] | GitLab API and shallow-clone content sources |
//! | [`ingest`] | Full ingestion |
//! | [`delta`] | Incremental sync from a change-set |
//! | [`readiness`] | Wait-until-indexed gate |
//! | [`job`] / [`error`] | Job states, reports and failures |
//! | [`service`] | Background job scheduling |
//! | [`commands`] | CLI handlers |

pub mod commands;
pub mod config;
pub mod db;
pub mod delta;
pub mod embedding;
pub mod error;
pub mod git;
pub mod hosting;
pub mod ingest;
pub mod job;
pub mod migrate;
pub mod readiness;
pub mod service;
pub mod sqlite_store;
