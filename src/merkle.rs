//! Bottom-up Merkle tree over a block's transactions.

use crate::crypto::{sha256, Hash256};
use crate::transaction::Transaction;

/// Root hash of the Merkle tree built over the serialized transactions.
/// If a level has an odd number of nodes, the last one is duplicated
/// before pairing.
pub fn merkle_root(transactions: &[Transaction]) -> Hash256 {
    assert!(!transactions.is_empty(), "a block must have at least one transaction");

    let mut level: Vec<Hash256> = transactions
        .iter()
        .map(|txn| sha256(&bincode::serialize(txn).expect("failed to serialize transaction for merkle leaf")))
        .collect();

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().unwrap());
        }

        level = level
            .chunks(2)
            .map(|pair| {
                let mut buf = Vec::with_capacity(64);
                buf.extend_from_slice(&pair[0]);
                buf.extend_from_slice(&pair[1]);
                sha256(&buf)
            })
            .collect();
    }

    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::make_coinbase_txn;

    fn sample_txn(seed: u8) -> Transaction {
        make_coinbase_txn("1BoatSLRHtKNngkdXEeobR76b53LETtpyT", vec![seed; 20])
            .expect("failed to build sample coinbase for test")
    }

    #[test]
    fn single_transaction_root_is_its_own_hash() {
        let txn = sample_txn(1);
        let expected = sha256(&bincode::serialize(&txn).unwrap());

        assert_eq!(merkle_root(&[txn]), expected);
    }

    #[test]
    fn odd_leaf_count_duplicates_the_last_leaf() {
        let txns = vec![sample_txn(1), sample_txn(2), sample_txn(3)];
        let with_dup = vec![txns[0].clone(), txns[1].clone(), txns[2].clone(), txns[2].clone()];

        assert_eq!(merkle_root(&txns), merkle_root(&with_dup));
    }

    #[test]
    fn changing_any_transaction_changes_the_root() {
        let a = vec![sample_txn(1), sample_txn(2)];
        let mut b = a.clone();
        b[1] = sample_txn(9);

        assert_ne!(merkle_root(&a), merkle_root(&b));
    }
}
