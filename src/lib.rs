//! # Source Sync
//!
//! A connector-driven data source synchronization engine. Source Sync
//! discovers, schedules, executes, and reconciles per-source ingestion
//! runs into a unified document store, tracking schema drift and
//! recovering from partial failures along the way.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────┐   ┌──────────────┐   ┌──────────┐
//! │  Pipeline   │──▶│ Scheduler │──▶│ Run Executor │──▶│Connector │
//! │ Coordinator │   │ cap+mutex │   │  (per source)│   │ (pull)   │
//! └─────────────┘   └───────────┘   └──────┬───────┘   └──────────┘
//!                                          │
//!                        ┌─────────────────┼──────────────────┐
//!                        ▼                 ▼                  ▼
//!                 ┌────────────┐   ┌──────────────┐   ┌─────────────┐
//!                 │   Schema   │   │   Conflict   │   │  SQLite     │
//!                 │   Tracker  │   │   Resolver   │   │  metadata   │
//!                 └────────────┘   └──────────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ssync init                    # create the metadata store
//! ssync sources                 # list sources and health
//! ssync sync all                # manual full-pipeline pass
//! ssync sync jira_main          # manual single-source sync
//! ssync tick                    # run whatever is due
//! ssync runs --limit 20         # recent run history
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`connector`] | Connector trait, registry, record streams |
//! | [`connector_fs`] | Built-in filesystem connector |
//! | [`normalize`] | Raw record → canonical document |
//! | [`schema`] | Schema fingerprinting and drift tracking |
//! | [`conflict`] | Local/remote conflict resolution |
//! | [`executor`] | Per-source run execution |
//! | [`scheduler`] | Dueness, backoff, bounded dispatch |
//! | [`pipeline`] | Fan-out across all sources |
//! | [`sink`] | Indexing sink seam |
//! | [`store`] | Metadata store (SQLite) |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod backoff;
pub mod config;
pub mod conflict;
pub mod connector;
pub mod connector_fs;
pub mod db;
pub mod error;
pub mod executor;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod runs;
pub mod scheduler;
pub mod schema;
pub mod sink;
pub mod sources;
pub mod store;
