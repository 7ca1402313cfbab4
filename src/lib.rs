//! # KB Sync
//!
//! A filesystem-to-vector-store synchronization engine for knowledge bases.
//!
//! KB Sync walks a set of configured KB root directories, fingerprints every
//! supported document by content hash, and reconciles the remote vector
//! store against what it finds: new and changed documents are extracted,
//! chunked, and ingested; documents that vanished from a healthy root are
//! deleted from the store. A persisted JSON state file makes runs
//! incremental — unchanged documents cost one hash and nothing else.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────────┐   ┌───────────┐
//! │ Scanner  │──▶│  Differ  │──▶│ Extract+Chunk │──▶│ HTTP      │
//! │ KB roots │   │ vs state │   │ txt/pdf/ooxml │   │ gateway   │
//! └──────────┘   └────┬─────┘   └───────────────┘   └─────┬─────┘
//!                     │                                   │
//!                ┌────▼──────┐                      ┌─────▼─────┐
//!                │ State file│◀─────────────────────│ Vector    │
//!                │ (JSON)    │   ack-gated commits  │ store API │
//!                └───────────┘                      └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kbsync check                  # verify roots are mounted, store reachable
//! kbsync sync --dry-run         # show what a run would do
//! kbsync sync                   # run one full synchronization
//! kbsync status                 # summarize the persisted state
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and the persisted state shape |
//! | [`scanner`] | KB root directory walking |
//! | [`hash`] | Streaming SHA-256 content fingerprints |
//! | [`mount`] | Mount health gating for deletions |
//! | [`detect`] | Scan-vs-state change detection |
//! | [`extract`] | Multi-format text extraction |
//! | [`chunk`] | Boundary-aware text chunking |
//! | [`gateway`] | HTTP client for the vector store API |
//! | [`state`] | Atomic state persistence and the run lock |
//! | [`sync`] | The run orchestrator |
//! | [`status`] | Read-only `status` / `check` commands |

pub mod chunk;
pub mod config;
pub mod detect;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod hash;
pub mod models;
pub mod mount;
pub mod scanner;
pub mod state;
pub mod status;
pub mod sync;
