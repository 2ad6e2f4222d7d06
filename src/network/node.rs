// Network node - ledger state, peers, gossip and the optional wallet/miner capabilities

use crate::consensus::{block_reward, check_block_in_context, check_incoming_block, check_transaction, Miner, MiningError};
use crate::core::{Block, Hash256, KeyPair, PubkeyHash, Serializable, Transaction};
use crate::network::peer::{self, read_frame, write_frame, MAX_FRAME_LEN};
use crate::network::{Envelope, Message, NodeConfig, NodeError, PeerEntry, PeerTable};
use crate::storage::LedgerState;
use crate::wallet::Wallet;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;

/// Network node. Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Node {
    id: String,
    port: u16,
    config: Arc<NodeConfig>,
    /// Chain, UTXO set, mempool and de-dup sets behind one lock
    ledger: Arc<RwLock<LedgerState>>,
    peers: Arc<RwLock<PeerTable>>,
    wallet: Option<Arc<Wallet>>,
    last_block_at: Arc<Mutex<Instant>>,
    stop_mining: Arc<AtomicBool>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Node {
    /// Build a node for an already chosen port
    pub fn new(config: NodeConfig, port: u16) -> Result<Self, NodeError> {
        let id = config
            .id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", config.role.name(), rand::thread_rng().gen_range(0..10000)));

        let wallet = if config.role.has_wallet() {
            let keypair = match &config.secret_key {
                Some(secret) => KeyPair::from_secret_hex(secret)?,
                None => KeyPair::generate(),
            };
            log::info!("[{}] Wallet address {} ({})", id, keypair.address(), keypair.pubkey_hash());
            Some(Arc::new(Wallet::new(keypair)))
        } else {
            None
        };

        let peers = PeerTable::from_entries(
            config.peers.iter().filter(|entry| entry.id != id).cloned(),
        );
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            id,
            port,
            config: Arc::new(config),
            ledger: Arc::new(RwLock::new(LedgerState::new())),
            peers: Arc::new(RwLock::new(peers)),
            wallet,
            last_block_at: Arc::new(Mutex::new(Instant::now())),
            stop_mining: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(shutdown),
        })
    }

    /// Bind a listen port and build the node around it.
    ///
    /// Without a fixed port, random ports from the configured range are
    /// tried until one binds; running out of attempts is fatal.
    pub async fn bind(config: NodeConfig) -> Result<(Self, TcpListener), NodeError> {
        let listener = match config.port {
            Some(port) => TcpListener::bind(("127.0.0.1", port))
                .await
                .map_err(|source| NodeError::Bind { port, source })?,
            None => bind_random(&config).await?,
        };
        let port = listener.local_addr()?.port();
        let node = Self::new(config, port)?;
        log::info!("[{}] Listening on port {}", node.id, port);
        Ok((node, listener))
    }

    /// Bind and start every loop the node's role calls for
    pub async fn start(config: NodeConfig) -> Result<NodeHandle, NodeError> {
        let (node, listener) = Self::bind(config).await?;
        Ok(node.spawn(listener))
    }

    /// Start the accept and discovery loops, plus the mining loop for miners
    pub fn spawn(self, listener: TcpListener) -> NodeHandle {
        let mut tasks = vec![
            tokio::spawn(self.clone().accept_loop(listener)),
            tokio::spawn(self.clone().discovery_loop()),
        ];
        if self.config.role.is_miner() {
            tasks.push(tokio::spawn(self.clone().mining_loop()));
        }
        NodeHandle { node: self, tasks }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// How peers address this node
    pub fn entry(&self) -> PeerEntry {
        PeerEntry::new(self.id.clone(), self.port)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn wallet(&self) -> Option<&Wallet> {
        self.wallet.as_deref()
    }

    pub fn ledger(&self) -> &Arc<RwLock<LedgerState>> {
        &self.ledger
    }

    pub async fn height(&self) -> u64 {
        self.ledger.read().await.height()
    }

    pub async fn tip_hash(&self) -> Hash256 {
        self.ledger.read().await.tip().hash()
    }

    pub async fn mempool_len(&self) -> usize {
        self.ledger.read().await.mempool.len()
    }

    pub async fn balance_of(&self, pubkey_hash: &PubkeyHash) -> u64 {
        self.ledger.read().await.balance_of(pubkey_hash)
    }

    pub async fn peer_entries(&self) -> Vec<PeerEntry> {
        self.peers.read().await.entries()
    }

    pub async fn add_peers(&self, entries: impl IntoIterator<Item = PeerEntry>) {
        let mut peers = self.peers.write().await;
        for entry in entries {
            if entry.id != self.id && entry.port != 0 && peers.insert(entry.clone()) {
                log::info!("[{}] Added peer {}", self.id, entry);
            }
        }
    }

    /// Ask every loop to stop and cancel an ongoing nonce search
    pub fn request_shutdown(&self) {
        self.stop_mining.store(true, Ordering::Relaxed);
        self.shutdown.send_replace(true);
    }

    async fn accept_loop(self, listener: TcpListener) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        log::debug!("[{}] Inbound connection from {}", self.id, addr);
                        let node = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = node.handle_connection(stream).await {
                                log::warn!("[{}] Dropped message: {}", node.id, e);
                            }
                        });
                    }
                    Err(e) => log::error!("[{}] Failed to accept connection: {}", self.id, e),
                },
            }
        }
        log::debug!("[{}] Accept loop stopped", self.id);
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<(), NodeError> {
        let limit = self.config.io_timeout;
        let payload = timeout(limit, read_frame(&mut stream))
            .await
            .map_err(|_| NodeError::Timeout(limit))??;
        let envelope = Envelope::decode(&payload)?;
        log::debug!(
            "[{}] Received {} from {}",
            self.id,
            envelope.message.message_type().as_str(),
            envelope.sender
        );

        if let Some(reply) = self.handle(envelope).await {
            timeout(limit, write_frame(&mut stream, &reply))
                .await
                .map_err(|_| NodeError::Timeout(limit))??;
        }
        Ok(())
    }

    /// Dispatch one message. Returns the reply for request/response
    /// messages; gossip messages get none.
    pub async fn handle(&self, envelope: Envelope) -> Option<String> {
        let Envelope { sender, message } = envelope;
        self.add_peers([sender.clone()]).await;

        match message {
            Message::NewTxn(tx) => {
                let txid = tx.id();
                if let Err(e) = self.receive_transaction(tx, Some(&sender.id)).await {
                    log::warn!("[{}] Dropped transaction {} from {}: {}", self.id, txid, sender.id, e);
                }
                None
            }
            Message::NewBlock(block) => {
                let hash = block.hash();
                if let Err(e) = self.receive_block(block, Some(&sender.id)).await {
                    log::warn!("[{}] Dropped block {} from {}: {}", self.id, hash, sender.id, e);
                }
                None
            }
            Message::GetPeers => {
                self.reply_peers(sender).await;
                None
            }
            Message::Peers(entries) => {
                self.add_peers(entries).await;
                None
            }
            Message::Pay { to, amount } => Some(match self.pay(&to, amount).await {
                Ok(txid) => format!("ok {txid}"),
                Err(e) => {
                    log::warn!("[{}] Payment of {} to {} failed: {}", self.id, amount, to, e);
                    format!("error {e}")
                }
            }),
            Message::GetBalance(hash) => {
                let hash = hash.or_else(|| self.wallet.as_ref().map(|w| w.pubkey_hash()));
                Some(match hash {
                    Some(hash) => self.balance_of(&hash).await.to_string(),
                    None => format!("error {}", NodeError::NoWallet),
                })
            }
            Message::GetBlocks { from } => Some(self.blocks_json(from).await),
        }
    }

    /// Validate a transaction against the local UTXO view, admit it to the
    /// mempool and gossip it to everyone but `from`. Returns false when the
    /// transaction was already known.
    pub async fn receive_transaction(&self, tx: Transaction, from: Option<&str>) -> Result<bool, NodeError> {
        {
            let mut ledger = self.ledger.write().await;
            if !admit(&mut ledger, &tx)? {
                return Ok(false);
            }
            log::info!("[{}] Admitted transaction {} ({} pending)", self.id, tx.id(), ledger.mempool.len());
        }
        self.broadcast(Message::NewTxn(tx), from).await;
        Ok(true)
    }

    /// Validate a block against the local tip, apply it and gossip it to
    /// everyone but `from`. Returns false when the block was already known.
    pub async fn receive_block(&self, block: Block, from: Option<&str>) -> Result<bool, NodeError> {
        {
            let mut ledger = self.ledger.write().await;
            if ledger.seen_blocks.contains(&block.hash()) {
                return Ok(false);
            }
            check_incoming_block(&block, &ledger, self.config.retarget.as_ref())?;
            ledger.apply_block(block.clone());
            log::info!("[{}] Accepted block {} at height {}", self.id, block.hash(), ledger.height());
        }
        *self.last_block_at.lock().await = Instant::now();
        self.broadcast(Message::NewBlock(block), from).await;
        Ok(true)
    }

    /// Build a payment from the node's wallet, admit it and gossip it
    pub async fn pay(&self, to: &PubkeyHash, amount: u64) -> Result<Hash256, NodeError> {
        let wallet = self.wallet.as_ref().ok_or(NodeError::NoWallet)?;
        let tx = {
            let mut ledger = self.ledger.write().await;
            let tx = wallet.build_payment(&ledger, to, amount)?;
            admit(&mut ledger, &tx)?;
            tx
        };
        let txid = tx.id();
        log::info!("[{}] Paying {} to {} in {}", self.id, amount, to, txid);
        self.broadcast(Message::NewTxn(tx), None).await;
        Ok(txid)
    }

    /// One tick of the miner: skip while the mempool is small and the last
    /// block is recent, otherwise mine a batch on top of the current tip.
    /// A candidate whose parent stopped being the tip is discarded.
    pub async fn mine_once(&self) -> Result<Option<Block>, NodeError> {
        let wallet = self.wallet.as_ref().ok_or(NodeError::NoWallet)?;
        let since_last = self.last_block_at.lock().await.elapsed();

        let (prev_hash, height, target, mut transactions) = {
            let ledger = self.ledger.read().await;
            if ledger.mempool.len() < self.config.min_txns_per_block
                && since_last < self.config.min_block_interval
            {
                log::debug!("[{}] Not mining: {} pending, last block {:?} ago", self.id, ledger.mempool.len(), since_last);
                return Ok(None);
            }
            let tip = ledger.tip();
            (
                tip.hash(),
                ledger.height() + 1,
                self.config.retarget.next_target(tip.header().target),
                ledger.mempool.batch(self.config.max_txns_per_block),
            )
        };

        let coinbase = Transaction::coinbase(
            &wallet.pubkey_hash(),
            block_reward(height),
            format!("Minted by {} at height {}", self.id, height),
        );
        transactions.insert(0, coinbase);
        log::info!(
            "[{}] Mining block {} with {} transactions, target {}",
            self.id,
            height,
            transactions.len(),
            target
        );

        let miner = Miner::new(self.config.max_nonce).with_stop_flag(self.stop_mining.clone());
        let result = tokio::task::spawn_blocking(move || miner.mine(prev_hash, transactions, target))
            .await
            .map_err(|e| NodeError::Task(e.to_string()))?;
        let mined = match result {
            Ok(mined) => mined,
            Err(MiningError::Cancelled) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        log::info!(
            "[{}] Mined block {} (nonce {}, {} attempts, {:?}, {:.1} KH/s)",
            self.id,
            mined.block.hash(),
            mined.block.header().nonce,
            mined.attempts,
            mined.duration,
            mined.hash_rate() / 1000.0
        );

        let block = mined.block;
        {
            let mut ledger = self.ledger.write().await;
            if ledger.tip().hash() != prev_hash {
                log::info!("[{}] Tip moved while mining, discarding candidate {}", self.id, block.hash());
                return Ok(None);
            }
            check_block_in_context(&block, &ledger, self.config.retarget.as_ref())?;
            ledger.apply_block(block.clone());
        }
        *self.last_block_at.lock().await = Instant::now();
        self.broadcast(Message::NewBlock(block.clone()), None).await;
        Ok(Some(block))
    }

    async fn mining_loop(self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.mining_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = ticker.tick() => match self.mine_once().await {
                    Ok(_) => {}
                    Err(e) => log::error!("[{}] Mining failed: {}", self.id, e),
                },
            }
        }
        log::debug!("[{}] Mining loop stopped", self.id);
    }

    async fn discovery_loop(self) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.discovery_interval);
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = ticker.tick() => self.broadcast(Message::GetPeers, None).await,
            }
        }
        log::debug!("[{}] Discovery loop stopped", self.id);
    }

    /// Send our peer table, minus the requester, back to the requester
    async fn reply_peers(&self, requester: PeerEntry) {
        if requester.port == 0 {
            return;
        }
        let entries = self.peers.read().await.entries_except(&requester.id);
        let payload = Envelope::new(self.entry(), Message::Peers(entries)).encode();
        if let Err(e) = peer::send(requester.port, &payload, self.config.io_timeout).await {
            log::warn!("[{}] Failed to send peers to {}: {}", self.id, requester, e);
        }
    }

    /// Send `message` to every known peer except `except`
    async fn broadcast(&self, message: Message, except: Option<&str>) {
        let targets: Vec<PeerEntry> = self
            .peers
            .read()
            .await
            .entries()
            .into_iter()
            .filter(|entry| Some(entry.id.as_str()) != except)
            .collect();
        if targets.is_empty() {
            return;
        }

        let payload: Arc<str> = Envelope::new(self.entry(), message).encode().into();
        let limit = self.config.io_timeout;
        let mut sends = JoinSet::new();
        for target in targets {
            let payload = payload.clone();
            sends.spawn(async move {
                let result = peer::send(target.port, &payload, limit).await;
                (target, result)
            });
        }
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((target, Err(e))) => log::warn!("[{}] Failed to send to {}: {}", self.id, target, e),
                Err(e) => log::error!("[{}] Send task failed: {}", self.id, e),
            }
        }
    }

    /// JSON list of serialized blocks from height `from`, cut to one frame
    async fn blocks_json(&self, from: u64) -> String {
        let ledger = self.ledger.read().await;
        let blocks = block_page(ledger.chain(), from, MAX_FRAME_LEN);
        serde_json::Value::from(blocks).to_string()
    }
}

/// Validate and add to the mempool. False if the transaction is known.
fn admit(ledger: &mut LedgerState, tx: &Transaction) -> Result<bool, NodeError> {
    let txid = tx.id();
    if ledger.seen_txns.contains(&txid) || ledger.mempool.contains(&txid) {
        return Ok(false);
    }
    check_transaction(tx, ledger.utxo_set())?;
    ledger.mempool.insert(tx.clone())?;
    ledger.seen_txns.insert(txid);
    Ok(true)
}

/// Resolves once shutdown has been requested
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Serialized blocks starting at height `from` whose JSON list stays
/// within `limit` bytes
fn block_page(chain: &[Block], from: u64, limit: usize) -> Vec<String> {
    let skip = usize::try_from(from).unwrap_or(usize::MAX);
    let mut page = Vec::new();
    // the enclosing brackets
    let mut len = 2;
    for block in chain.iter().skip(skip) {
        let text = block.serialize();
        let quoted = serde_json::Value::from(text.as_str()).to_string().len();
        let needed = quoted + usize::from(!page.is_empty());
        if len + needed > limit {
            break;
        }
        len += needed;
        page.push(text);
    }
    page
}

async fn bind_random(config: &NodeConfig) -> Result<TcpListener, NodeError> {
    if config.port_range.is_empty() {
        return Err(NodeError::BindExhausted(0));
    }
    for attempt in 1..=config.bind_attempts {
        let port = rand::thread_rng().gen_range(config.port_range.clone());
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => log::warn!("Port {} unavailable ({}), attempt {}/{}", port, e, attempt, config.bind_attempts),
        }
    }
    Err(NodeError::BindExhausted(config.bind_attempts))
}

/// A running node and its background tasks
pub struct NodeHandle {
    node: Node,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Stop every loop and wait for them to finish
    pub async fn shutdown(self) {
        self.node.request_shutdown();
        for task in self.tasks {
            if let Err(e) = task.await {
                log::error!("[{}] Task ended abnormally: {}", self.node.id, e);
            }
        }
        log::info!("[{}] Stopped", self.node.id);
    }
}
