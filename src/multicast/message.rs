use crate::storage::types::ChunkId;

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const PROTOCOL_VERSION: &str = "1.0";

/// Separates the header from the body of every datagram.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    PutChunk,
    Stored,
    GetChunk,
    Chunk,
    Delete,
    Removed,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::PutChunk => "PUTCHUNK",
            MessageKind::Stored => "STORED",
            MessageKind::GetChunk => "GETCHUNK",
            MessageKind::Chunk => "CHUNK",
            MessageKind::Delete => "DELETE",
            MessageKind::Removed => "REMOVED",
        }
    }

    /// Minimum number of header fields a message of this kind carries.
    fn header_len(&self) -> usize {
        match self {
            MessageKind::PutChunk => 6,
            MessageKind::Delete => 4,
            _ => 5,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PUTCHUNK" => Ok(MessageKind::PutChunk),
            "STORED" => Ok(MessageKind::Stored),
            "GETCHUNK" => Ok(MessageKind::GetChunk),
            "CHUNK" => Ok(MessageKind::Chunk),
            "DELETE" => Ok(MessageKind::Delete),
            "REMOVED" => Ok(MessageKind::Removed),
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }
}

/// Fields every message starts with after its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub version: String,
    pub sender: String,
}

impl Envelope {
    pub fn new(version: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            sender: sender.into(),
        }
    }
}

/// The wire protocol between peers.
///
/// - `PutChunk`/`Stored`: Replicate a chunk and acknowledge a stored copy.
/// - `GetChunk`/`Chunk`: Request a chunk and answer with its payload.
/// - `Delete`: Drop every chunk of a file.
/// - `Removed`: Announce that a holder evicted its copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    PutChunk {
        envelope: Envelope,
        chunk: ChunkId,
        replication_degree: u32,
        body: Vec<u8>,
    },

    Stored {
        envelope: Envelope,
        chunk: ChunkId,
    },

    GetChunk {
        envelope: Envelope,
        chunk: ChunkId,
    },

    Chunk {
        envelope: Envelope,
        chunk: ChunkId,
        body: Vec<u8>,
    },

    Delete {
        envelope: Envelope,
        file_id: String,
    },

    Removed {
        envelope: Envelope,
        chunk: ChunkId,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::PutChunk { .. } => MessageKind::PutChunk,
            Message::Stored { .. } => MessageKind::Stored,
            Message::GetChunk { .. } => MessageKind::GetChunk,
            Message::Chunk { .. } => MessageKind::Chunk,
            Message::Delete { .. } => MessageKind::Delete,
            Message::Removed { .. } => MessageKind::Removed,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        match self {
            Message::PutChunk { envelope, .. }
            | Message::Stored { envelope, .. }
            | Message::GetChunk { envelope, .. }
            | Message::Chunk { envelope, .. }
            | Message::Delete { envelope, .. }
            | Message::Removed { envelope, .. } => envelope,
        }
    }

    pub fn sender(&self) -> &str {
        &self.envelope().sender
    }

    /// Header fields in wire order plus the body, if the kind carries one.
    pub fn encode(&self) -> (Vec<String>, Option<&[u8]>) {
        let envelope = self.envelope();
        let mut header = vec![
            self.kind().as_str().to_string(),
            envelope.version.clone(),
            envelope.sender.clone(),
        ];

        let body = match self {
            Message::PutChunk {
                chunk,
                replication_degree,
                body,
                ..
            } => {
                push_chunk(&mut header, chunk);
                header.push(replication_degree.to_string());
                Some(body.as_slice())
            }
            Message::Chunk { chunk, body, .. } => {
                push_chunk(&mut header, chunk);
                Some(body.as_slice())
            }
            Message::Stored { chunk, .. }
            | Message::GetChunk { chunk, .. }
            | Message::Removed { chunk, .. } => {
                push_chunk(&mut header, chunk);
                None
            }
            Message::Delete { file_id, .. } => {
                header.push(file_id.clone());
                None
            }
        };

        (header, body)
    }

    /// Parses header fields and an optional body into a message.
    ///
    /// Extra trailing header fields are ignored. `PUTCHUNK` and `CHUNK`
    /// require a body, which may be empty.
    pub fn decode(header: &[String], body: Option<Vec<u8>>) -> Result<Message, MessageError> {
        let kind: MessageKind = header.first().ok_or(MessageError::Empty)?.parse()?;

        if header.len() < kind.header_len() {
            return Err(MessageError::TooShort {
                kind,
                found: header.len(),
                expected: kind.header_len(),
            });
        }

        let envelope = Envelope::new(header[1].clone(), header[2].clone());

        let message = match kind {
            MessageKind::PutChunk => Message::PutChunk {
                envelope,
                chunk: parse_chunk(header)?,
                replication_degree: parse_field("replication_degree", &header[5])?,
                body: body.ok_or(MessageError::MissingBody(kind))?,
            },
            MessageKind::Chunk => Message::Chunk {
                envelope,
                chunk: parse_chunk(header)?,
                body: body.ok_or(MessageError::MissingBody(kind))?,
            },
            MessageKind::Stored => Message::Stored {
                envelope,
                chunk: parse_chunk(header)?,
            },
            MessageKind::GetChunk => Message::GetChunk {
                envelope,
                chunk: parse_chunk(header)?,
            },
            MessageKind::Removed => Message::Removed {
                envelope,
                chunk: parse_chunk(header)?,
            },
            MessageKind::Delete => Message::Delete {
                envelope,
                file_id: header[3].clone(),
            },
        };

        Ok(message)
    }
}

fn push_chunk(header: &mut Vec<String>, chunk: &ChunkId) {
    header.push(chunk.file_id.clone());
    header.push(chunk.chunk_no.to_string());
}

fn parse_chunk(header: &[String]) -> Result<ChunkId, MessageError> {
    Ok(ChunkId::new(header[3].clone(), parse_field("chunk_no", &header[4])?))
}

fn parse_field<T: FromStr>(field: &'static str, value: &str) -> Result<T, MessageError> {
    value.parse().map_err(|_| MessageError::InvalidField {
        field,
        value: value.to_string(),
    })
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("empty header")]
    Empty,

    #[error("unknown message type {0:?}")]
    UnknownType(String),

    #[error("{kind} header has {found} fields, expected at least {expected}")]
    TooShort {
        kind: MessageKind,
        found: usize,
        expected: usize,
    },

    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("{0} message without a body")]
    MissingBody(MessageKind),
}
