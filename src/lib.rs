//! Distributed Backup Peer Library
//!
//! This library crate defines the core modules of a peer in a multicast backup group.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of five loosely coupled subsystems:
//!
//! - **`multicast`**: The channel layer. Frames protocol messages into datagrams and carries
//!   them over the control (MC), backup (MDB) and restore (MDR) multicast groups.
//! - **`storage`**: The local storage engine. Splits files into chunks, keeps file and chunk
//!   records with their perceived replication, and enforces the capacity budget.
//! - **`coordination`**: Short-lived flags and restore slots that let peers cancel duplicate
//!   replies and hand received chunks to waiting restore tasks.
//! - **`protocol`**: The per-message state machine, fed by one receive loop per channel.
//! - **`peer`**: The operation orchestrators (backup, restore, delete, reclaim, state) and the
//!   administrative HTTP surface.

pub mod coordination;
pub mod multicast;
pub mod peer;
pub mod protocol;
pub mod storage;
