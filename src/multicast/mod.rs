//! Multicast Channel Module
//!
//! Carries protocol messages between peers over three multicast groups.
//!
//! ## Core Concepts
//! - **Framing**: A datagram is the header fields joined by single spaces, `CRLF CRLF`,
//!   then the raw body. There are no retries at this level; loss is handled by the callers.
//! - **Messages**: `Message` is the closed set of protocol messages with `encode`/`decode`.
//! - **Channels**: MC (control), MDB (backup data) and MDR (restore data), bundled in a
//!   `ChannelSet` that routes each message type to its channel.
//! - **Transports**: A real multicast socket, or an in-process loopback group for running
//!   several peers in one process.

pub mod channel;
pub mod loopback;
pub mod message;
pub mod transport;
