use super::message::{HEADER_TERMINATOR, Message, MessageKind};
use super::transport::{MulticastSocket, Transport};
use crate::peer::config::MulticastConfig;

use std::fmt;
use std::io;
use std::sync::Arc;

/// Receive buffer size: one header plus one full chunk fits with room to spare.
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// MC: STORED, GETCHUNK, DELETE, REMOVED.
    Control,
    /// MDB: PUTCHUNK.
    Backup,
    /// MDR: CHUNK.
    Restore,
}

impl ChannelKind {
    pub fn for_message(kind: MessageKind) -> Self {
        match kind {
            MessageKind::PutChunk => ChannelKind::Backup,
            MessageKind::Chunk => ChannelKind::Restore,
            MessageKind::Stored | MessageKind::GetChunk | MessageKind::Delete | MessageKind::Removed => {
                ChannelKind::Control
            }
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Control => f.write_str("MC"),
            ChannelKind::Backup => f.write_str("MDB"),
            ChannelKind::Restore => f.write_str("MDR"),
        }
    }
}

/// One logical channel: a transport plus the header/body framing.
pub struct Channel {
    kind: ChannelKind,
    transport: Arc<dyn Transport>,
}

impl Channel {
    pub fn new(kind: ChannelKind, transport: Arc<dyn Transport>) -> Self {
        Self { kind, transport }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub async fn send(&self, header: &[String], body: Option<&[u8]>) -> io::Result<()> {
        self.transport.send(&frame(header, body)).await
    }

    pub async fn send_message(&self, message: &Message) -> io::Result<()> {
        let (header, body) = message.encode();
        tracing::debug!("[{}] sending {}", self.kind, header.join(" "));
        self.send(&header, body).await
    }

    /// Blocks for the next datagram and splits it into header fields and body.
    pub async fn receive(&self, buf: &mut [u8]) -> io::Result<(Vec<String>, Option<Vec<u8>>)> {
        let len = self.transport.recv(buf).await?;
        Ok(unframe(&buf[..len]))
    }
}

/// Header fields joined by single spaces, the terminator, then the raw body.
pub fn frame(header: &[String], body: Option<&[u8]>) -> Vec<u8> {
    let header = header.join(" ");
    let body = body.unwrap_or_default();

    let mut datagram = Vec::with_capacity(header.len() + HEADER_TERMINATOR.len() + body.len());
    datagram.extend_from_slice(header.as_bytes());
    datagram.extend_from_slice(HEADER_TERMINATOR);
    datagram.extend_from_slice(body);
    datagram
}

/// Splits a datagram at the first terminator.
///
/// Header text is split on runs of whitespace. Without a terminator the
/// whole datagram is header and there is no body.
pub fn unframe(datagram: &[u8]) -> (Vec<String>, Option<Vec<u8>>) {
    let split = datagram
        .windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR);

    let (header, body) = match split {
        Some(at) => (&datagram[..at], Some(datagram[at + HEADER_TERMINATOR.len()..].to_vec())),
        None => (datagram, None),
    };

    let fields = String::from_utf8_lossy(header)
        .split_whitespace()
        .map(str::to_string)
        .collect();

    (fields, body)
}

/// MC, MDB and MDR of one peer.
#[derive(Clone)]
pub struct ChannelSet {
    pub control: Arc<Channel>,
    pub backup: Arc<Channel>,
    pub restore: Arc<Channel>,
}

impl ChannelSet {
    pub fn new(control: Channel, backup: Channel, restore: Channel) -> Self {
        Self {
            control: Arc::new(control),
            backup: Arc::new(backup),
            restore: Arc::new(restore),
        }
    }

    /// Joins the three multicast groups of `config`.
    pub fn bind(config: &MulticastConfig) -> io::Result<Self> {
        Ok(Self::new(
            Channel::new(ChannelKind::Control, Arc::new(MulticastSocket::bind(config.control)?)),
            Channel::new(ChannelKind::Backup, Arc::new(MulticastSocket::bind(config.backup)?)),
            Channel::new(ChannelKind::Restore, Arc::new(MulticastSocket::bind(config.restore)?)),
        ))
    }

    pub fn get(&self, kind: ChannelKind) -> &Arc<Channel> {
        match kind {
            ChannelKind::Control => &self.control,
            ChannelKind::Backup => &self.backup,
            ChannelKind::Restore => &self.restore,
        }
    }

    pub fn all(&self) -> [&Arc<Channel>; 3] {
        [&self.control, &self.backup, &self.restore]
    }

    /// Sends `message` on the channel its type belongs to.
    pub async fn send(&self, message: &Message) -> io::Result<()> {
        self.get(ChannelKind::for_message(message.kind()))
            .send_message(message)
            .await
    }
}
