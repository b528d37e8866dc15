//! The UTXO index ("chainstate"): a cache over the block store keyed by
//! `(txId, outIndex)` pairs rather than one blob per transaction, backed
//! by a `sled` tree so lookups don't require a full chain scan.

use crate::block::Block;
use crate::crypto::Hash160;
use crate::error::{ErrorKind, Result};
use crate::store::Blockchain;
use crate::transaction::{SpendableOutput, TransactionOutput};

const CHAINSTATE_TREE: &str = "chainstate";

pub struct UtxoSet {
    chainstate: sled::Tree,
}

impl UtxoSet {
    pub fn open(chain: &Blockchain) -> Result<Self> {
        let chainstate = chain.underlying_db().open_tree(CHAINSTATE_TREE)?;
        Ok(UtxoSet { chainstate })
    }

    fn key(tx_id: &[u8; 32], out_index: u32) -> Vec<u8> {
        let mut key = Vec::with_capacity(36);
        key.extend_from_slice(tx_id);
        key.extend_from_slice(&out_index.to_be_bytes());
        key
    }

    /// Drop every entry and rebuild from a full scan of `chain`. Used by
    /// the `reindexutxo` command and whenever the index might have
    /// drifted from the chain it caches.
    pub fn reindex(&self, chain: &Blockchain) -> Result<()> {
        self.chainstate.clear()?;

        let mut spent: std::collections::HashSet<(crate::crypto::Hash256, u32)> = std::collections::HashSet::new();
        let mut all_outputs: Vec<(crate::crypto::Hash256, u32, TransactionOutput)> = Vec::new();

        for block in chain.iter() {
            for txn in &block.transactions {
                if !txn.is_coinbase() {
                    for input in &txn.vin {
                        spent.insert((input.prev_tx_id, input.out_index as u32));
                    }
                }
                for (index, output) in txn.vout.iter().enumerate() {
                    all_outputs.push((txn.id, index as u32, output.clone()));
                }
            }
        }

        for (tx_id, out_index, output) in all_outputs {
            if spent.contains(&(tx_id, out_index)) {
                continue;
            }
            let key = Self::key(&tx_id, out_index);
            self.chainstate.insert(key, bincode::serialize(&output)?)?;
        }

        self.chainstate.flush()?;
        Ok(())
    }

    /// Incrementally fold a newly accepted block into the index: drop
    /// every output its transactions spend, add every output they create.
    pub fn update(&self, block: &Block) -> Result<()> {
        for txn in &block.transactions {
            if !txn.is_coinbase() {
                for input in &txn.vin {
                    let key = Self::key(&input.prev_tx_id, input.out_index as u32);
                    self.chainstate.remove(key)?;
                }
            }

            for (index, output) in txn.vout.iter().enumerate() {
                let key = Self::key(&txn.id, index as u32);
                self.chainstate.insert(key, bincode::serialize(output)?)?;
            }
        }

        self.chainstate.flush()?;
        Ok(())
    }

    /// Every unspent output locked to `pub_key_hash`, for `getbalance`.
    pub fn find_utxo(&self, pub_key_hash: &Hash160) -> Result<Vec<TransactionOutput>> {
        let mut outputs = Vec::new();

        for entry in self.chainstate.iter() {
            let (_key, value) = entry?;
            let output: TransactionOutput = bincode::deserialize(&value)?;
            if &output.pub_key_hash == pub_key_hash {
                outputs.push(output);
            }
        }

        Ok(outputs)
    }

    /// Accumulate unspent outputs locked to `pub_key_hash` until `amount`
    /// is covered, or fail with [`ErrorKind::InsufficientFunds`].
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &Hash160,
        amount: u64,
    ) -> Result<(u64, Vec<SpendableOutput>)> {
        let mut accumulated = 0_u64;
        let mut spendable = Vec::new();

        for entry in self.chainstate.iter() {
            if accumulated >= amount {
                break;
            }

            let (key, value) = entry?;
            let output: TransactionOutput = bincode::deserialize(&value)?;

            if &output.pub_key_hash != pub_key_hash {
                continue;
            }

            let (tx_id, out_index) = split_key(&key);
            accumulated += output.value;
            spendable.push(SpendableOutput {
                tx_id,
                out_index,
                value: output.value,
            });
        }

        if accumulated < amount {
            return Err(Box::new(ErrorKind::InsufficientFunds {
                wanted: amount,
                have: accumulated,
            }));
        }

        Ok((accumulated, spendable))
    }

    pub fn count_transactions(&self) -> usize {
        self.chainstate.len()
    }
}

fn split_key(key: &[u8]) -> (crate::crypto::Hash256, u32) {
    let mut tx_id = [0_u8; 32];
    tx_id.copy_from_slice(&key[..32]);
    let mut idx_bytes = [0_u8; 4];
    idx_bytes.copy_from_slice(&key[32..36]);
    (tx_id, u32::from_be_bytes(idx_bytes))
}
