//! Protocol Module
//!
//! Reacts to messages received on the three channels.
//!
//! ## Core Mechanisms
//! - **Dispatch**: A receive loop per channel, one bounded handler task per datagram.
//! - **State Machine**: `MessageHandler` maps every message type to its effect on local
//!   storage and the coordination cache.
//! - **Backoff**: Replies that several peers could send are delayed by a random wait
//!   so that the first reply can cancel the others.

pub mod backoff;
pub mod dispatcher;
pub mod handler;

#[cfg(test)]
mod tests;
