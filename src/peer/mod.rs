//! Peer Module
//!
//! Ties the components of one participant together and exposes the
//! whole-file operations.
//!
//! ## Operations
//! - **Backup**: Split a file and push every chunk until enough peers acknowledged it.
//! - **Restore**: Request every chunk and rebuild the file from the answers.
//! - **Delete**: Forget a backup and tell holders to drop its chunks.
//! - **Reclaim**: Shrink local storage, announcing every evicted chunk.
//! - **State**: Report backed-up files, stored chunks and capacity.
//!
//! The operations are reachable over a small HTTP surface (`handlers`) used by
//! the `client` binary.

pub mod config;
pub mod handlers;
pub mod protocol;
pub mod service;
pub mod workers;

#[cfg(test)]
mod tests;
