//! In-process multicast groups.
//!
//! Every endpoint of a `LoopbackGroup` receives every datagram sent by any
//! endpoint of the same group, its own included, which mirrors a multicast
//! socket with loopback enabled. Used to run several peers in one process.

use super::channel::{Channel, ChannelKind, ChannelSet};
use super::transport::{Transport, TransportFuture};

use std::io;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};

const GROUP_BUFFER: usize = 1024;

#[derive(Clone)]
pub struct LoopbackGroup {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
}

impl LoopbackGroup {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(GROUP_BUFFER);
        Self { sender }
    }

    /// A new member of the group; it sees datagrams sent from now on.
    pub fn endpoint(&self) -> LoopbackEndpoint {
        LoopbackEndpoint {
            sender: self.sender.clone(),
            receiver: Mutex::new(self.sender.subscribe()),
        }
    }
}

impl Default for LoopbackGroup {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LoopbackEndpoint {
    sender: broadcast::Sender<Arc<Vec<u8>>>,
    receiver: Mutex<broadcast::Receiver<Arc<Vec<u8>>>>,
}

impl Transport for LoopbackEndpoint {
    fn send<'a>(&'a self, datagram: &'a [u8]) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            // With no subscriber left the datagram is simply lost, like on a real group.
            let _ = self.sender.send(Arc::new(datagram.to_vec()));
            Ok(())
        })
    }

    fn recv<'a>(&'a self, buf: &'a mut [u8]) -> TransportFuture<'a, usize> {
        Box::pin(async move {
            let mut receiver = self.receiver.lock().await;
            loop {
                match receiver.recv().await {
                    Ok(datagram) => {
                        let len = datagram.len().min(buf.len());
                        buf[..len].copy_from_slice(&datagram[..len]);
                        return Ok(len);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Loopback endpoint lagged, {} datagrams lost", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(io::Error::new(io::ErrorKind::BrokenPipe, "loopback group closed"));
                    }
                }
            }
        })
    }
}

/// The three channel groups of one simulated network.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    control: LoopbackGroup,
    backup: LoopbackGroup,
    restore: LoopbackGroup,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel set for one more participant of the network.
    pub fn join(&self) -> ChannelSet {
        ChannelSet::new(
            Channel::new(ChannelKind::Control, Arc::new(self.control.endpoint())),
            Channel::new(ChannelKind::Backup, Arc::new(self.backup.endpoint())),
            Channel::new(ChannelKind::Restore, Arc::new(self.restore.endpoint())),
        )
    }
}
