// Node configuration

use crate::consensus::{RetargetPolicy, Tightening, MAX_NONCE};
use crate::network::PeerEntry;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// Capabilities a node is started with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Relays and validates only
    Full,
    /// Also holds a key and can pay
    Wallet,
    /// Wallet that also mines
    Miner,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Full => "full",
            Role::Wallet => "wallet",
            Role::Miner => "miner",
        }
    }

    pub fn has_wallet(&self) -> bool {
        matches!(self, Role::Wallet | Role::Miner)
    }

    pub fn is_miner(&self) -> bool {
        matches!(self, Role::Miner)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub role: Role,
    /// Node id; `<role>-<random>` when unset
    pub id: Option<String>,
    /// Fixed listen port; a random port from `port_range` when unset
    pub port: Option<u16>,
    pub port_range: Range<u16>,
    /// Random ports tried before giving up
    pub bind_attempts: u32,
    /// Hex private scalar for the wallet; generated when unset
    pub secret_key: Option<String>,
    /// Peers known at startup
    pub peers: Vec<PeerEntry>,
    pub discovery_interval: Duration,
    pub mining_interval: Duration,
    /// Mine only when this many transactions are pending...
    pub min_txns_per_block: usize,
    pub max_txns_per_block: usize,
    /// ...or when this long has passed since the last block
    pub min_block_interval: Duration,
    /// Bound on every connect, read and write
    pub io_timeout: Duration,
    pub max_nonce: u64,
    pub retarget: Arc<dyn RetargetPolicy>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: Role::Full,
            id: None,
            port: None,
            port_range: 2000..3000,
            bind_attempts: 50,
            secret_key: None,
            peers: Vec::new(),
            discovery_interval: Duration::from_secs(15),
            mining_interval: Duration::from_secs(10),
            min_txns_per_block: 3,
            max_txns_per_block: 10,
            min_block_interval: Duration::from_secs(30),
            io_timeout: Duration::from_secs(5),
            max_nonce: MAX_NONCE,
            retarget: Arc::new(Tightening::default()),
        }
    }
}

impl NodeConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_peers(mut self, peers: Vec<PeerEntry>) -> Self {
        self.peers = peers;
        self
    }

    pub fn with_secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn with_retarget(mut self, retarget: Arc<dyn RetargetPolicy>) -> Self {
        self.retarget = retarget;
        self
    }
}
