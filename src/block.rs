//! Block header + transaction list, PoW-sealed construction and
//! serialization. The chain is a single append-only sequence; the tip
//! is decided purely by height on version exchange, with no fork
//! tracking.

use serde::{Deserialize, Serialize};

use crate::crypto::Hash256;
use crate::difficulty;
use crate::merkle::merkle_root;
use crate::transaction::Transaction;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub prev_block_hash: Hash256,
    pub hash: Hash256,
    pub nonce: u64,
}

impl Block {
    pub fn is_genesis(&self) -> bool {
        self.prev_block_hash == [0_u8; 32]
    }

    pub fn hash_transactions(&self) -> Hash256 {
        merkle_root(&self.transactions)
    }

    pub fn find_transaction(&self, id: &Hash256) -> Option<&Transaction> {
        self.transactions.iter().find(|t| &t.id == id)
    }

    /// Recompute this block's PoW digest and check it against the fixed
    /// difficulty target.
    pub fn validate_pow(&self) -> bool {
        difficulty::validate(
            &self.prev_block_hash,
            &self.hash_transactions(),
            self.timestamp,
            self.nonce,
            &self.hash,
        )
    }
}

/// Build a new block on top of `prev_block_hash` containing `transactions`
/// and run proof-of-work until it is sealed.
pub fn new_block(transactions: Vec<Transaction>, prev_block_hash: Hash256, timestamp: i64) -> Block {
    let mut block = Block {
        timestamp,
        transactions,
        prev_block_hash,
        hash: [0_u8; 32],
        nonce: 0,
    };

    let merkle_root = block.hash_transactions();
    let (nonce, hash) = difficulty::run(&block.prev_block_hash, &merkle_root, block.timestamp);

    block.nonce = nonce;
    block.hash = hash;
    block
}

pub fn serialize(block: &Block) -> crate::error::Result<Vec<u8>> {
    Ok(bincode::serialize(block)?)
}

pub fn deserialize(bytes: &[u8]) -> crate::error::Result<Block> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::make_coinbase_txn;

    fn genesis_like() -> Block {
        let coinbase = make_coinbase_txn("1BoatSLRHtKNngkdXEeobR76b53LETtpyT", vec![]).unwrap();
        new_block(vec![coinbase], [0_u8; 32], 1_700_000_000)
    }

    #[test]
    fn sealed_block_passes_pow_validation() {
        let block = genesis_like();
        assert!(block.validate_pow());
    }

    #[test]
    fn mutating_a_transaction_invalidates_pow() {
        let mut block = genesis_like();
        block.transactions[0].vout[0].value += 1;
        assert!(!block.validate_pow());
    }

    #[test]
    fn block_round_trips_through_serialization() {
        let block = genesis_like();
        let bytes = serialize(&block).unwrap();
        let back = deserialize(&bytes).unwrap();
        assert_eq!(block, back);
    }

    proptest::proptest! {
        /// Any sealed block validates its own proof of work, survives a
        /// serialization round trip, and loses validity the moment any
        /// transaction byte changes (the merkle root no longer matches).
        #[test]
        fn sealed_block_properties_hold_for_any_timestamp_and_value(
            timestamp in 0i64..2_000_000_000,
            value in 1u64..1_000_000,
        ) {
            let coinbase = make_coinbase_txn("1BoatSLRHtKNngkdXEeobR76b53LETtpyT", vec![]).unwrap();
            let block = new_block(vec![coinbase], [0_u8; 32], timestamp);
            proptest::prop_assert!(block.validate_pow());

            let bytes = serialize(&block).unwrap();
            let back = deserialize(&bytes).unwrap();
            proptest::prop_assert_eq!(&block, &back);

            let mut mutated = block;
            mutated.transactions[0].vout[0].value = value;
            if mutated.transactions[0].vout[0].value != back.transactions[0].vout[0].value {
                proptest::prop_assert!(!mutated.validate_pow());
            }
        }
    }
}
