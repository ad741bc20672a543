//! # Knowledge Desk
//!
//! Backend for a searchable company knowledge base.
//!
//! Uploaded spreadsheets and Word documents are turned into plain-text
//! knowledge entries. Queries are handed to an external indexing service
//! through a shared SQLite queue and answered once the service rewrites the
//! request record, or by a static keyword lookup when no service is
//! configured.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────────┐
//! │ Upload event │──▶│   Extract   │──▶│ knowledge_entries │
//! │  (S3 / fs)   │   │ xlsx / docx │   └──────────────────┘
//! └──────────────┘   └─────────────┘
//!
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────────┐
//! │ GET /search  │──▶│ QueryBroker │◀─▶│  query_requests  │◀─▶ indexing service
//! └──────────────┘   └─────────────┘   └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kdesk init                               # create database
//! kdesk serve                              # start HTTP server
//! kdesk query "Kovács bónusz"              # one-off query
//! kdesk ingest kb-uploads report.xlsx      # ingest one object
//! kdesk requests list                      # pending requests
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`broker`] | Submit a query and await the indexing service's answer |
//! | [`config`] | TOML configuration parsing |
//! | [`context`] | Process-wide application context |
//! | [`db`] | Database connection |
//! | [`error`] | Query error taxonomy |
//! | [`extract`] | Text extraction from `.xlsx` and `.docx` |
//! | [`ingest`] | Upload event handling |
//! | [`logging`] | Tracing subscriber setup |
//! | [`lookup`] | Static keyword fallback |
//! | [`migrate`] | Schema migrations |
//! | [`models`] | Core data types |
//! | [`server`] | HTTP API |
//! | [`source_fs`] | Local directory object source |
//! | [`source_s3`] | Amazon S3 object source |
//! | [`store`] | Query queue and knowledge store backends |
//! | [`traits`] | Resolver and object source seams |

pub mod broker;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod lookup;
pub mod migrate;
pub mod models;
pub mod server;
pub mod source_fs;
pub mod source_s3;
pub mod store;
pub mod traits;
