//! Ephemeral Coordination Module
//!
//! Process-local state that lives only as long as one exchange of messages.
//!
//! ## Core Concepts
//! - **Flags**: Insert-if-absent / remove-if-present markers used to suppress duplicate
//!   STORED, CHUNK and rescue PUTCHUNK replies when another peer answers first.
//!   A flag older than its time-to-live reads as absent.
//! - **Restore Slots**: Per-chunk mailboxes the restore workers wait on; the CHUNK handler
//!   fills them. One slot per chunk at a time; it is removed when its guard goes out of scope.

pub mod cache;
