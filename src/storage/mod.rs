//! Local Storage Module
//!
//! Keeps the peer's view of backed-up files and locally held chunks.
//!
//! ## Core Concepts
//! - **Chunking**: Files are split into 64,000-byte chunks; the last chunk holds the
//!   remainder and may be empty.
//! - **Records**: `FileRecord` exists on the initiator of a backup, `ChunkRecord` on every
//!   holder of a chunk. Both carry perceived-replication counters fed by STORED/REMOVED.
//! - **Capacity**: A single `CapacityAccount` behind the storage lock decides whether a
//!   chunk fits and drives eviction when the budget shrinks.
//! - **Eviction**: Highest redundancy (perceived − desired) goes first.

pub mod accounting;
pub mod chunking;
pub mod disk;
pub mod manager;
pub mod types;
