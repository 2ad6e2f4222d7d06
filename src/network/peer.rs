// Peer table and the length-prefixed transport

use crate::core::ParseError;
use crate::network::{NodeError, PeerEntry};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Digits of the zero-padded length prefix
pub const FRAME_LENGTH_DIGITS: usize = 5;
/// Largest payload the prefix can describe
pub const MAX_FRAME_LEN: usize = 99_999;

/// `<5-digit zero-padded length><payload>`
pub fn encode_frame(payload: &str) -> Result<Vec<u8>, ParseError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(ParseError::Frame(format!(
            "payload of {} bytes exceeds {}",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }
    let mut frame = format!("{:05}", payload.len()).into_bytes();
    frame.extend_from_slice(payload.as_bytes());
    Ok(frame)
}

/// Write one framed payload
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> Result<(), NodeError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed payload
pub async fn read_frame<R>(reader: &mut R) -> Result<String, NodeError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; FRAME_LENGTH_DIGITS];
    reader.read_exact(&mut prefix).await?;
    if !prefix.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::Frame(format!("bad length prefix {:?}", String::from_utf8_lossy(&prefix))).into());
    }
    let len: usize = prefix
        .iter()
        .fold(0, |acc, digit| acc * 10 + usize::from(digit - b'0'));

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    String::from_utf8(payload).map_err(|e| ParseError::Frame(e.to_string()).into())
}

async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, NodeError>
where
    F: std::future::Future<Output = Result<T, NodeError>>,
{
    timeout(limit, fut).await.map_err(|_| NodeError::Timeout(limit))?
}

async fn connect(port: u16, limit: Duration) -> Result<TcpStream, NodeError> {
    match timeout(limit, TcpStream::connect(("127.0.0.1", port))).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(NodeError::Timeout(limit)),
    }
}

/// Open a short-lived connection, write one frame and close
pub async fn send(port: u16, payload: &str, limit: Duration) -> Result<(), NodeError> {
    let mut stream = connect(port, limit).await?;
    with_timeout(limit, write_frame(&mut stream, payload)).await
}

/// Write one frame and wait for a single framed reply on the same connection
pub async fn request(port: u16, payload: &str, limit: Duration) -> Result<String, NodeError> {
    let mut stream = connect(port, limit).await?;
    with_timeout(limit, write_frame(&mut stream, payload)).await?;
    with_timeout(limit, read_frame(&mut stream)).await
}

/// Peer id -> listen port
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerTable {
    peers: BTreeMap<String, u16>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = PeerEntry>) -> Self {
        let mut table = Self::new();
        for entry in entries {
            table.insert(entry);
        }
        table
    }

    /// Add a peer whose id is not known yet. A known id keeps its port.
    /// Returns true if the entry was added.
    pub fn insert(&mut self, entry: PeerEntry) -> bool {
        match self.peers.entry(entry.id) {
            Entry::Vacant(slot) => {
                slot.insert(entry.port);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<u16> {
        self.peers.remove(id)
    }

    pub fn port_of(&self, id: &str) -> Option<u16> {
        self.peers.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn entries(&self) -> Vec<PeerEntry> {
        self.peers
            .iter()
            .map(|(id, port)| PeerEntry::new(id.clone(), *port))
            .collect()
    }

    /// Every entry but the one with `id`
    pub fn entries_except(&self, id: &str) -> Vec<PeerEntry> {
        self.entries().into_iter().filter(|entry| entry.id != id).collect()
    }
}
