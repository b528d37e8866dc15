//! The three pieces of mutable gossip state, each behind its own mutex
//! rather than one big lock: known peers, the pending-transaction pool,
//! and the set of block hashes currently being fetched.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use crate::crypto::Hash256;
use crate::transaction::Transaction;

#[derive(Default)]
pub struct PeerTable {
    known_nodes: Mutex<Vec<SocketAddr>>,
}

impl PeerTable {
    pub fn new(seed: Vec<SocketAddr>) -> Self {
        PeerTable {
            known_nodes: Mutex::new(seed),
        }
    }

    pub fn add(&self, addr: SocketAddr) {
        let mut nodes = self.known_nodes.lock().unwrap();
        if !nodes.contains(&addr) {
            nodes.push(addr);
        }
    }

    /// Drop a peer that failed to respond to a dialed message.
    pub fn remove(&self, addr: &SocketAddr) {
        self.known_nodes.lock().unwrap().retain(|n| n != addr);
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.known_nodes.lock().unwrap().contains(addr)
    }

    pub fn snapshot(&self) -> Vec<SocketAddr> {
        self.known_nodes.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.known_nodes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct Mempool {
    txs: Mutex<HashMap<Hash256, Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, txn: Transaction) {
        self.txs.lock().unwrap().insert(txn.id, txn);
    }

    pub fn contains(&self, id: &Hash256) -> bool {
        self.txs.lock().unwrap().contains_key(id)
    }

    pub fn get(&self, id: &Hash256) -> Option<Transaction> {
        self.txs.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.txs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain every pending transaction for inclusion in a new block.
    pub fn drain(&self) -> Vec<Transaction> {
        self.txs.lock().unwrap().drain().map(|(_, v)| v).collect()
    }

    pub fn remove(&self, id: &Hash256) {
        self.txs.lock().unwrap().remove(id);
    }
}

#[derive(Default)]
pub struct BlocksInTransit {
    hashes: Mutex<Vec<Hash256>>,
}

impl BlocksInTransit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, hashes: Vec<Hash256>) {
        *self.hashes.lock().unwrap() = hashes;
    }

    pub fn take_first(&self) -> Option<Hash256> {
        self.hashes.lock().unwrap().first().copied()
    }

    pub fn remove(&self, hash: &Hash256) {
        self.hashes.lock().unwrap().retain(|h| h != hash);
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_table_dedupes_and_prunes() {
        let table = PeerTable::new(vec![]);
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();

        table.add(addr);
        table.add(addr);
        assert_eq!(table.len(), 1);

        table.remove(&addr);
        assert!(!table.contains(&addr));
    }

    #[test]
    fn mempool_drain_empties_the_pool() {
        let pool = Mempool::new();
        let txn = crate::transaction::make_coinbase_txn("1BoatSLRHtKNngkdXEeobR76b53LETtpyT", vec![1]).unwrap();

        pool.insert(txn.clone());
        assert_eq!(pool.len(), 1);

        let drained = pool.drain();
        assert_eq!(drained.len(), 1);
        assert!(pool.is_empty());
    }
}
