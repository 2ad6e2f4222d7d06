// Nodes exchanging transactions, blocks and peers over loopback TCP

use mini_ledger::consensus::FixedTarget;
use mini_ledger::core::{KeyPair, PubkeyHash, U256, GENESIS_SECRET};
use mini_ledger::network::{peer, Envelope, Message, Node, NodeConfig, NodeHandle, PeerEntry, Role};
use mini_ledger::{LedgerState, Wallet};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(10);

fn config(role: Role) -> NodeConfig {
    let mut config = NodeConfig::new(role)
        .with_port(0)
        .with_retarget(Arc::new(FixedTarget(U256::MAX >> 4)));
    config.mining_interval = Duration::from_secs(3600);
    config.min_block_interval = Duration::ZERO;
    config.io_timeout = Duration::from_secs(2);
    config
}

async fn start(config: NodeConfig) -> NodeHandle {
    Node::start(config).await.unwrap()
}

async fn link(a: &Node, b: &Node) {
    a.add_peers([b.entry()]).await;
    b.add_peers([a.entry()]).await;
}

#[tokio::test]
async fn test_transaction_and_block_gossip() {
    let miner = start(config(Role::Miner).with_secret_key(GENESIS_SECRET)).await;
    let full = start(config(Role::Full)).await;
    link(miner.node(), full.node()).await;

    let payee = PubkeyHash([0x42; 20]);
    miner.node().pay(&payee, 30).await.unwrap();

    timeout(WAIT, async {
        while full.node().mempool_len().await != 1 {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("transaction never reached the full node");

    let block = miner.node().mine_once().await.unwrap().unwrap();
    timeout(WAIT, async {
        while full.node().height().await != 1 {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("block never reached the full node");

    assert_eq!(full.node().tip_hash().await, block.hash());
    assert_eq!(full.node().mempool_len().await, 0);

    // balance query through the client path
    let query = Envelope::new(PeerEntry::new("client", 0), Message::GetBalance(Some(payee))).encode();
    let reply = peer::request(full.node().port(), &query, Duration::from_secs(2)).await.unwrap();
    assert_eq!(reply, "30");

    miner.shutdown().await;
    full.shutdown().await;
}

/// Next `newtxn` delivered to a bare listener, skipping discovery traffic
async fn next_newtxn(listener: &TcpListener, wait: Duration) -> Option<Envelope> {
    timeout(wait, async {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            let envelope = Envelope::decode(&peer::read_frame(&mut stream).await.unwrap()).unwrap();
            if matches!(envelope.message, Message::NewTxn(_)) {
                return envelope;
            }
        }
    })
    .await
    .ok()
}

#[tokio::test]
async fn test_transaction_not_echoed_to_sender() {
    let relay = start(config(Role::Full)).await;
    let origin = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let observer = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin_entry = PeerEntry::new("origin", origin.local_addr().unwrap().port());
    let observer_entry = PeerEntry::new("observer", observer.local_addr().unwrap().port());
    relay.node().add_peers([origin_entry.clone(), observer_entry]).await;

    let owner = Wallet::new(KeyPair::from_secret_hex(GENESIS_SECRET).unwrap());
    let tx = owner
        .build_payment(&LedgerState::new(), &PubkeyHash([0x42; 20]), 10)
        .unwrap();
    let gossip = Envelope::new(origin_entry, Message::NewTxn(tx.clone())).encode();
    peer::send(relay.node().port(), &gossip, Duration::from_secs(2)).await.unwrap();
    peer::send(relay.node().port(), &gossip, Duration::from_secs(2)).await.unwrap();

    let forwarded = next_newtxn(&observer, WAIT).await.expect("relay never forwarded the transaction");
    assert_eq!(forwarded.sender, relay.node().entry());
    assert_eq!(forwarded.message, Message::NewTxn(tx));

    // no echo to the origin and no second copy for the observer
    assert!(next_newtxn(&origin, Duration::from_millis(500)).await.is_none());
    assert!(next_newtxn(&observer, Duration::from_millis(500)).await.is_none());
    assert_eq!(relay.node().mempool_len().await, 1);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_peer_discovery() {
    let hub = start(config(Role::Full)).await;
    let known = start(config(Role::Full)).await;
    link(hub.node(), known.node()).await;

    let mut newcomer_config = config(Role::Wallet).with_peers(vec![hub.node().entry()]);
    newcomer_config.discovery_interval = Duration::from_millis(100);
    let newcomer = start(newcomer_config).await;

    let target = known.node().id().to_string();
    timeout(WAIT, async {
        while !newcomer.node().peer_entries().await.iter().any(|e| e.id == target) {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("newcomer never learned about the second node");

    let newcomer_id = newcomer.node().id().to_string();
    assert!(hub.node().peer_entries().await.iter().any(|e| e.id == newcomer_id));

    newcomer.shutdown().await;
    known.shutdown().await;
    hub.shutdown().await;
}

#[tokio::test]
async fn test_malformed_message_is_dropped() {
    let node = start(config(Role::Full)).await;
    peer::send(node.node().port(), "garbage without structure", Duration::from_secs(2))
        .await
        .unwrap();

    // node keeps serving after the bad message
    let query = Envelope::new(PeerEntry::new("client", 0), Message::GetBlocks { from: 0 }).encode();
    let reply = peer::request(node.node().port(), &query, Duration::from_secs(2)).await.unwrap();
    let blocks: Vec<String> = serde_json::from_str(&reply).unwrap();
    assert_eq!(blocks.len(), 1);

    node.shutdown().await;
}
