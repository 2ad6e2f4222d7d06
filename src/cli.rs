// CLI commands

use crate::core::{Block, KeyPair, PubkeyHash, Serializable, GENESIS_SECRET};
use crate::network::{peer, Envelope, Message, Node, NodeConfig, NodeError, NodeHandle, PeerEntry, Role};
use clap::{Parser, Subcommand};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mini-ledger")]
#[command(about = "Minimal proof-of-work ledger network", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an in-process network sharing one peer table
    Run {
        /// Relay-only nodes
        #[arg(long, default_value_t = 1)]
        full: usize,
        /// Nodes holding a wallet
        #[arg(long, default_value_t = 1)]
        wallets: usize,
        /// Wallet nodes that also mine
        #[arg(long, default_value_t = 1)]
        miners: usize,
    },

    /// Query a node for a balance
    Balance {
        /// Node listen port
        #[arg(long)]
        port: u16,
        /// Pubkey hash to check (the node's own wallet if omitted)
        #[arg(long)]
        hash: Option<String>,
    },

    /// Ask a wallet node to pay
    Pay {
        /// Node listen port
        #[arg(long)]
        port: u16,
        /// Recipient pubkey hash
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
    },

    /// Dump a node's chain
    Blocks {
        /// Node listen port
        #[arg(long)]
        port: u16,
    },

    /// Generate a key pair
    Keygen,
}

/// CLI handler
pub struct CliHandler {
    io_timeout: Duration,
}

impl Default for CliHandler {
    fn default() -> Self {
        Self {
            io_timeout: NodeConfig::default().io_timeout,
        }
    }
}

impl CliHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle CLI command
    pub async fn handle(&self, cli: Cli) -> Result<(), String> {
        match cli.command {
            Commands::Run { full, wallets, miners } => self.run(full, wallets, miners).await,
            Commands::Balance { port, hash } => {
                let hash = hash
                    .map(|h| PubkeyHash::from_hex(&h))
                    .transpose()
                    .map_err(|e| e.to_string())?;
                let reply = self.query(port, Message::GetBalance(hash)).await?;
                println!("{}", reply);
                Ok(())
            }
            Commands::Pay { port, to, amount } => {
                let to = PubkeyHash::from_hex(&to).map_err(|e| e.to_string())?;
                let reply = self.query(port, Message::Pay { to, amount }).await?;
                println!("{}", reply);
                if reply.starts_with("error") {
                    return Err(reply);
                }
                Ok(())
            }
            Commands::Blocks { port } => {
                // one frame per page until the node runs out of blocks
                let mut height = 0u64;
                loop {
                    let reply = self.query(port, Message::GetBlocks { from: height }).await?;
                    let page: Vec<String> = serde_json::from_str(&reply).map_err(|e| e.to_string())?;
                    if page.is_empty() {
                        return Ok(());
                    }
                    for text in &page {
                        let block = Block::deserialize(text).map_err(|e| e.to_string())?;
                        print_block(height, &block);
                        height += 1;
                    }
                }
            }
            Commands::Keygen => {
                let keypair = KeyPair::generate();
                println!("Secret key:  {}", keypair.secret_hex());
                println!("Public key:  {}", keypair.pubkey_hex());
                println!("Pubkey hash: {}", keypair.pubkey_hash());
                println!("Address:     {}", keypair.address());
                Ok(())
            }
        }
    }

    /// Send one message as an anonymous client and wait for the reply
    async fn query(&self, port: u16, message: Message) -> Result<String, String> {
        let payload = Envelope::new(PeerEntry::new("client", 0), message).encode();
        peer::request(port, &payload, self.io_timeout)
            .await
            .map_err(|e| format!("node on port {}: {}", port, e))
    }

    /// Bind every node, share the full peer table, run until ctrl-c
    async fn run(&self, full: usize, wallets: usize, miners: usize) -> Result<(), String> {
        let roles = std::iter::repeat_n(Role::Miner, miners)
            .chain(std::iter::repeat_n(Role::Wallet, wallets))
            .chain(std::iter::repeat_n(Role::Full, full));

        let mut bound = Vec::new();
        let mut genesis_assigned = false;
        for role in roles {
            let mut config = NodeConfig::new(role);
            if role.has_wallet() && !genesis_assigned {
                config = config.with_secret_key(GENESIS_SECRET);
                genesis_assigned = true;
            }
            bound.push(Node::bind(config).await.map_err(|e| e.to_string())?);
        }
        if bound.is_empty() {
            return Err("nothing to run: every node count is zero".to_string());
        }

        let entries: Vec<PeerEntry> = bound.iter().map(|(node, _)| node.entry()).collect();
        println!("{:<14} {:<6} {:<8} {}", "ID", "PORT", "ROLE", "PUBKEY HASH");
        for (node, _) in &bound {
            node.add_peers(entries.iter().cloned()).await;
            let hash = node
                .wallet()
                .map(|w| w.pubkey_hash().to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("{:<14} {:<6} {:<8} {}", node.id(), node.port(), node.config().role, hash);
        }

        let handles: Vec<NodeHandle> = bound
            .into_iter()
            .map(|(node, listener)| node.spawn(listener))
            .collect();

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| NodeError::from(e).to_string())?;
        log::info!("Shutting down {} nodes", handles.len());
        for handle in handles {
            handle.shutdown().await;
        }
        Ok(())
    }
}

fn print_block(height: u64, block: &Block) {
    let header = block.header();
    println!("Block {}:", height);
    println!("  Hash: {}", block.hash());
    println!("  Previous: {}", header.prev_block_hash);
    println!("  Merkle root: {}", header.merkle_root);
    println!("  Timestamp: {}", header.timestamp);
    println!("  Target: {}", header.target);
    println!("  Nonce: {}", header.nonce);
    println!("  Transactions: {}", block.transaction_count());

    for (i, tx) in block.transactions().iter().enumerate() {
        let value = tx.total_output_value().unwrap_or_default();
        println!("    [{}] {} ({} out)", i, tx.id(), value);
    }
}
