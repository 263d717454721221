//! # chat-rag
//!
//! A chat-history ingestion and similarity query service for
//! retrieval-augmented chat clients.
//!
//! A chat client posts its messages to `/ingest`; each message is embedded
//! and stored in a persistent collection. Before answering, the client
//! posts the user's prompt to `/query` and receives the most similar past
//! messages to use as context.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Chat client │──▶│  HTTP server  │──▶│  Collection  │
//! │ (browser)   │   │ ingest/query  │   │ embed+score  │
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                          ┌──────────────────┤
//!                          ▼                  ▼
//!                    ┌───────────┐      ┌───────────┐
//!                    │ Embedding │      │  SQLite   │
//!                    │ provider  │      │  records  │
//!                    └───────────┘      └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chat-rag init                          # create database and collection
//! chat-rag serve                         # listen on 0.0.0.0:8000
//! chat-rag ingest export.json            # bulk-load a chat export
//! chat-rag query "edge computing" -n 5   # nearest stored messages
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Wire types (documents, hits) |
//! | [`collection`] | Named collection: add, query, count, reset |
//! | [`store`] | Record storage trait, SQLite and in-memory backends |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`ingest`] | Document ingestion (HTTP and CLI) |
//! | [`query`] | Similarity queries (HTTP and CLI) |
//! | [`server`] | HTTP server |
//! | [`burndown`] | Milestone burndown chart |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | Tracing subscriber setup |

pub mod burndown;
pub mod collection;
pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod query;
pub mod server;
pub mod store;
