// Network protocol messages
//
// Payload text is `<senderId>:<senderPort> <messageType> <data...>`.

use crate::core::{Block, ParseError, PubkeyHash, Serializable, Transaction};
use std::fmt;
use std::str::FromStr;

/// Network message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    NewTxn,
    NewBlock,
    GetPeers,
    Peers,
    Pay,
    GetBalance,
    GetBlocks,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::NewTxn => "newtxn",
            MessageType::NewBlock => "newblock",
            MessageType::GetPeers => "getpeers",
            MessageType::Peers => "peers",
            MessageType::Pay => "pay",
            MessageType::GetBalance => "getbalance",
            MessageType::GetBlocks => "getblocks",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "newtxn" => Some(MessageType::NewTxn),
            "newblock" => Some(MessageType::NewBlock),
            "getpeers" => Some(MessageType::GetPeers),
            "peers" => Some(MessageType::Peers),
            "pay" => Some(MessageType::Pay),
            "getbalance" => Some(MessageType::GetBalance),
            "getblocks" => Some(MessageType::GetBlocks),
            _ => None,
        }
    }
}

/// A node as other nodes address it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerEntry {
    pub id: String,
    pub port: u16,
}

impl PeerEntry {
    pub fn new(id: impl Into<String>, port: u16) -> Self {
        Self { id: id.into(), port }
    }
}

impl fmt::Display for PeerEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.port)
    }
}

impl FromStr for PeerEntry {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseError::Envelope(format!("peer entry without port: {s}")))?;
        if id.is_empty() || id.contains(char::is_whitespace) {
            return Err(ParseError::Envelope(format!("bad peer id in {s}")));
        }
        let port = port
            .parse()
            .map_err(|_| ParseError::Envelope(format!("bad peer port in {s}")))?;
        Ok(Self::new(id, port))
    }
}

/// Network message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    NewTxn(Transaction),
    NewBlock(Block),
    GetPeers,
    Peers(Vec<PeerEntry>),
    /// Ask a wallet-capable node to pay `amount` to `to`
    Pay { to: PubkeyHash, amount: u64 },
    /// Balance of a pubkey hash, or of the node's own wallet when absent
    GetBalance(Option<PubkeyHash>),
    /// Blocks from height `from` on, as many as fit in one reply frame
    GetBlocks { from: u64 },
}

impl Message {
    /// Get message type
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::NewTxn(_) => MessageType::NewTxn,
            Message::NewBlock(_) => MessageType::NewBlock,
            Message::GetPeers => MessageType::GetPeers,
            Message::Peers(_) => MessageType::Peers,
            Message::Pay { .. } => MessageType::Pay,
            Message::GetBalance(_) => MessageType::GetBalance,
            Message::GetBlocks { .. } => MessageType::GetBlocks,
        }
    }

    fn data(&self) -> String {
        match self {
            Message::NewTxn(tx) => tx.serialize(),
            Message::NewBlock(block) => block.serialize(),
            Message::GetPeers => String::new(),
            Message::GetBlocks { from } => from.to_string(),
            Message::Peers(entries) => entries
                .iter()
                .map(PeerEntry::to_string)
                .collect::<Vec<_>>()
                .join(" "),
            Message::Pay { to, amount } => format!("{to} {amount}"),
            Message::GetBalance(hash) => hash.map(|h| h.to_hex()).unwrap_or_default(),
        }
    }

    fn parse(message_type: MessageType, data: &str) -> Result<Self, ParseError> {
        let data = data.trim();
        match message_type {
            MessageType::NewTxn => Ok(Message::NewTxn(Transaction::deserialize(data)?)),
            MessageType::NewBlock => Ok(Message::NewBlock(Block::deserialize(data)?)),
            MessageType::GetPeers => Ok(Message::GetPeers),
            MessageType::GetBlocks if data.is_empty() => Ok(Message::GetBlocks { from: 0 }),
            MessageType::GetBlocks => data
                .parse()
                .map(|from| Message::GetBlocks { from })
                .map_err(|_| ParseError::Body(format!("bad block height `{data}`"))),
            MessageType::Peers => data
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<Vec<_>, _>>()
                .map(Message::Peers),
            MessageType::Pay => {
                let (to, amount) = data
                    .split_once(' ')
                    .ok_or_else(|| ParseError::Body(format!("pay expects `<hash> <amount>`, got `{data}`")))?;
                let amount = amount
                    .trim()
                    .parse()
                    .map_err(|_| ParseError::Body(format!("bad amount `{amount}`")))?;
                Ok(Message::Pay {
                    to: PubkeyHash::from_hex(to)?,
                    amount,
                })
            }
            MessageType::GetBalance if data.is_empty() => Ok(Message::GetBalance(None)),
            MessageType::GetBalance => Ok(Message::GetBalance(Some(PubkeyHash::from_hex(data)?))),
        }
    }
}

/// A message together with the node that sent it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: PeerEntry,
    pub message: Message,
}

impl Envelope {
    pub fn new(sender: PeerEntry, message: Message) -> Self {
        Self { sender, message }
    }

    /// Wire text of the envelope
    pub fn encode(&self) -> String {
        let data = self.message.data();
        if data.is_empty() {
            format!("{} {}", self.sender, self.message.message_type().as_str())
        } else {
            format!("{} {} {}", self.sender, self.message.message_type().as_str(), data)
        }
    }

    pub fn decode(text: &str) -> Result<Self, ParseError> {
        let mut parts = text.splitn(3, ' ');
        let sender = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ParseError::Envelope("empty payload".to_string()))?
            .parse()?;
        let type_name = parts
            .next()
            .ok_or_else(|| ParseError::Envelope("missing message type".to_string()))?;
        let message_type = MessageType::from_name(type_name)
            .ok_or_else(|| ParseError::UnknownMessage(type_name.to_string()))?;
        let message = Message::parse(message_type, parts.next().unwrap_or(""))?;
        Ok(Self { sender, message })
    }
}
