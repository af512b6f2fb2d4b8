//! Smriti
//!
//! Embedded vector-memory engine for autonomous agents: high-dimensional
//! embeddings with structured metadata, approximate nearest-neighbor search,
//! and task/outcome-oriented memory layers (patterns, episodes, skills,
//! causal edges) composed over one backend contract.
//!
//! # Key Features
//! - Hierarchical proximity graph (HNSW-family) index
//! - Three conforming backends: portable in-process, external graph-index
//!   library, RocksDB-persisted
//! - Epoch-invalidated LRU query cache
//! - Change-log stream for replication consumers
//! - Single-writer/multi-reader discipline with a bounded dispatch pool for
//!   native calls
//!
//! # Quick start
//! ```no_run
//! use smriti::config::EngineConfig;
//! use smriti::memory::MemoryEngine;
//! use smriti::memory::types::Pattern;
//!
//! let engine = MemoryEngine::new(EngineConfig::default()).unwrap();
//! engine
//!     .patterns()
//!     .store(Pattern::new("debug", "bisect commit history").with_success_rate(0.9))
//!     .unwrap();
//! let hits = engine.patterns().search("bisect history", 3, 0.5).unwrap();
//! ```

pub mod backend;
pub mod cache;
pub mod cancel;
pub mod changelog;
pub mod collection;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod embeddings;
pub mod errors;
pub mod memory;
pub mod tracing_setup;
pub mod vector_db;

// Re-export dependencies so tests and benches share versions
pub use chrono;
pub use parking_lot;
pub use uuid;
