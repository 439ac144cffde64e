//! # List Q&A Sync
//!
//! Keeps Q&A knowledge bases in step with the remote lists they are built
//! from.
//!
//! Each knowledge record names a list, the column holding questions and the
//! columns holding answers. A refresh pulls every page of that list, stages
//! the pages as JSON objects the index backend can fetch, replaces the
//! index's sources with them in batches, publishes the index, and then
//! removes the staged objects. A scheduler re-runs refreshes once a
//! record's interval has elapsed.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────┐   ┌──────────────┐
//! │ List       │──▶│  Staging  │──▶│ Q&A index    │
//! │ (Graph)    │   │  (S3)     │   │ (QnA Maker)  │
//! └────────────┘   └───────────┘   └──────┬───────┘
//!        ▲                                │
//!        │         ┌─────────────────┐    │
//!        └─────────│   Refresh       │◀───┘
//!                  │   Orchestrator  │
//!                  └───────┬─────────┘
//!                          ▼
//!                  ┌─────────────────┐
//!                  │ Record store    │
//!                  │ (SQLite)        │
//!                  └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lqs init                          # create database
//! lqs records import records.json   # register knowledge records
//! lqs refresh <record-id>           # one attempt, now
//! lqs run                           # scheduler loop
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Library error type |
//! | [`list_client`] | Paged list reads |
//! | [`token`] | Bearer tokens for list reads |
//! | [`staging`] | Staging store abstraction |
//! | [`staging_s3`] | S3 staging backend |
//! | [`index_client`] | Index operations and polling |
//! | [`batching`] | Source batch partitioning |
//! | [`record_store`] | Knowledge record persistence |
//! | [`refresh`] | Refresh orchestration |
//! | [`scheduler`] | Due-record selection and periodic ticks |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod batching;
pub mod config;
pub mod db;
pub mod error;
pub mod index_client;
pub mod list_client;
pub mod migrate;
pub mod models;
pub mod record_store;
pub mod records_cmd;
pub mod refresh;
pub mod refresh_cmd;
pub mod scheduler;
pub mod staging;
pub mod staging_s3;
pub mod token;

pub use error::{Error, Result};
