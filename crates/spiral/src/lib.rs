//! # Spiral
//!
//! Application crate for the Spiral context-memory engine: configuration,
//! the SQLite-backed stores, embedding providers, the evolution service,
//! and the [`engine::SpiralEngine`] facade the CLI drives.
//!
//! Shared models, scoring, and the assembly algorithm live in
//! [`spiral_core`].

pub mod archive_io;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod evolution;
pub mod migrate;
pub mod sqlite_store;
