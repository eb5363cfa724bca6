//! Attributed long-term memory for LLM applications.
//!
//! memfabric stores conversational and factual snippets as vectors, finds the
//! ones relevant to a query, and can optionally use a text-generation model to
//! compress what is stored and to rewrite what is searched for ("compress on
//! write, reason on read", the CLaRa pipeline). Every record is attributed to
//! a tenant (`entity_id`) and the process acting for it, and every read is
//! scoped to that attribution.
//!
//! # Architecture
//!
//! - **Storage**: a [`VectorStore`](store::VectorStore) contract with two
//!   backends: embedded SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec),
//!   and PostgreSQL with [pgvector](https://github.com/pgvector/pgvector)
//! - **Embeddings**: local ONNX Runtime (all-MiniLM-L6-v2 by default), any
//!   OpenAI-compatible `/embeddings` endpoint, or an offline hashing embedder
//! - **Generation**: OpenAI-compatible chat completions or the Anthropic
//!   messages API, used only by the optimization stages
//! - **Background writes**: a tracked queue with snapshot drain and a full
//!   drain on close
//!
//! # Modules
//!
//! - [`config`]: TOML + environment configuration
//! - [`db`]: SQLite connection setup and schema
//! - [`store`]: the vector record store contract and its backends
//! - [`embedding`]: text-to-vector collaborators
//! - [`generation`]: prompt-to-text collaborators
//! - [`clara`]: compression and reasoning stages
//! - [`fabric`]: the orchestrator, attribution and write queue
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use memfabric::embedding::hash::HashEmbedder;
//! use memfabric::fabric::{Attribution, MemoryFabric};
//! use memfabric::store::sqlite::SqliteStore;
//! use memfabric::types::Role;
//!
//! # async fn run() -> Result<(), memfabric::error::FabricError> {
//! let store = Arc::new(SqliteStore::open("memory.db", 384)?);
//! let fabric = MemoryFabric::builder(store, Arc::new(HashEmbedder::new(384)?)).build()?;
//! fabric.init().await?;
//!
//! let user = fabric.scoped(Attribution::new("user-1", "assistant"));
//! user.add_memory("Prefers aisle seats on long flights", Role::User).await?;
//! let context = user.retrieve_context("booking a flight").await?;
//! println!("{context}");
//!
//! fabric.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod clara;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod fabric;
pub mod generation;
pub mod store;
pub mod types;
