//! # Spiral Core
//!
//! Shared logic for Spiral: context-node and edge models, the relevance
//! scorer, store and vector-index abstractions, the tiered context-assembly
//! algorithm, summarization helpers, and the archive bundle format.
//!
//! This crate contains no tokio runtime, sqlx, filesystem I/O, or other
//! native-only dependencies. The application crate supplies the SQLite
//! stores, embedding providers, and the engine facade.

pub mod archive;
pub mod assembly;
pub mod embedding;
pub mod models;
pub mod relevance;
pub mod store;
pub mod summarize;
