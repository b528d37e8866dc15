//! Transaction model: inputs, outputs, hashing, signing and verification.
//! Outputs are locked strictly to a public key hash, checked directly
//! rather than by running a locking/unlocking script pair.

use std::collections::HashMap;

use rand::RngCore;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED};
use serde::{Deserialize, Serialize};

use crate::crypto::{hash_pub_key, sha256, Hash160, Hash256};
use crate::error::{Error, ErrorKind, Result};
use crate::wallet::{pub_key_hash_from_address, Wallet};

/// `outIndex` sentinel marking a coinbase input.
pub const COINBASE_OUT_INDEX: i64 = -1;
/// Fixed block subsidy minted by every coinbase transaction.
pub const SUBSIDY: u64 = 10;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransactionOutput {
    pub value: u64,
    pub pub_key_hash: Hash160,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TransactionInput {
    pub prev_tx_id: Hash256,
    pub out_index: i64,
    pub signature: Vec<u8>,
    pub pub_key: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: Hash256,
    pub vin: Vec<TransactionInput>,
    pub vout: Vec<TransactionOutput>,
}

/// The part of a transaction that gets hashed: everything but `id`
/// itself, so that hashing is well-defined regardless of what `id`
/// currently holds.
#[derive(Serialize)]
struct HashPayload<'a> {
    vin: &'a [TransactionInput],
    vout: &'a [TransactionOutput],
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1
            && self.vin[0].prev_tx_id == [0_u8; 32]
            && self.vin[0].out_index == COINBASE_OUT_INDEX
    }

    /// SHA-256 of the canonical serialization of the transaction with
    /// `id` cleared.
    pub fn compute_hash(&self) -> Hash256 {
        let payload = HashPayload {
            vin: &self.vin,
            vout: &self.vout,
        };
        let bytes = bincode::serialize(&payload).expect("transaction payload always serializes");
        sha256(&bytes)
    }

    /// A copy with every input's `signature` and `pub_key` cleared — the
    /// payload that gets hashed and signed per input.
    pub fn trimmed_copy(&self) -> Transaction {
        let vin = self
            .vin
            .iter()
            .map(|input| TransactionInput {
                prev_tx_id: input.prev_tx_id,
                out_index: input.out_index,
                signature: vec![],
                pub_key: vec![],
            })
            .collect();

        Transaction {
            id: self.id,
            vin,
            vout: self.vout.clone(),
        }
    }

    /// Sign every non-coinbase input against the set of previous
    /// transactions it spends from.
    pub fn sign(&mut self, signer: &EcdsaKeyPair, prev_txs: &HashMap<Hash256, Transaction>) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        for i in 0..self.vin.len() {
            let prev_tx_id = self.vin[i].prev_tx_id;
            let prev_tx = prev_txs
                .get(&prev_tx_id)
                .ok_or_else(|| -> Error { Box::new(ErrorKind::TransactionNotFound(prev_tx_id)) })?;
            let out_index = self.vin[i].out_index as usize;

            let mut copy = self.trimmed_copy();
            copy.vin[i].pub_key = prev_tx.vout[out_index].pub_key_hash.to_vec();
            copy.id = copy.compute_hash();
            copy.vin[i].pub_key = vec![];

            let signature = sign_digest(signer, &copy.id);
            self.vin[i].signature = signature;
        }

        Ok(())
    }

    /// Verify every input's signature against the set of previous
    /// transactions it claims to spend from. `true` for a coinbase
    /// transaction unconditionally.
    pub fn verify(&self, prev_txs: &HashMap<Hash256, Transaction>) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        for i in 0..self.vin.len() {
            let prev_tx_id = self.vin[i].prev_tx_id;
            let prev_tx = prev_txs
                .get(&prev_tx_id)
                .ok_or_else(|| -> Error { Box::new(ErrorKind::TransactionNotFound(prev_tx_id)) })?;
            let out_index = self.vin[i].out_index as usize;

            if out_index >= prev_tx.vout.len() {
                return Ok(false);
            }

            let mut copy = self.trimmed_copy();
            copy.vin[i].pub_key = prev_tx.vout[out_index].pub_key_hash.to_vec();
            copy.id = copy.compute_hash();
            copy.vin[i].pub_key = vec![];

            if !verify_digest(&self.vin[i].pub_key, &copy.id, &self.vin[i].signature) {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Sign a 32-byte digest, returning `r || s` each left-padded to 32
/// bytes. `ring`'s FIXED ECDSA variant already produces that layout.
pub fn sign_digest(signer: &EcdsaKeyPair, digest: &Hash256) -> Vec<u8> {
    let rng = SystemRandom::new();
    let signature = signer
        .sign(&rng, digest)
        .expect("signing a fixed-size digest should never fail");
    signature.as_ref().to_vec()
}

/// Verify a signature produced by [`sign_digest`]. `pub_key` is the raw
/// `X || Y` form (64 bytes, no SEC1 tag) as stored on [`Wallet`].
pub fn verify_digest(pub_key: &[u8], digest: &Hash256, signature: &[u8]) -> bool {
    if pub_key.len() != 64 {
        return false;
    }

    let mut sec1_point = Vec::with_capacity(65);
    sec1_point.push(0x04);
    sec1_point.extend_from_slice(pub_key);

    let public_key = UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, sec1_point);
    public_key.verify(digest, signature).is_ok()
}

/// Build the coinbase transaction that mints [`SUBSIDY`] to `to`. If
/// `data` is empty, 20 random bytes rendered as hex fill the input's
/// `pub_key` slot instead — coinbase inputs carry no real signing key,
/// so this slot is free to disambiguate otherwise-identical coinbase
/// hashes.
pub fn make_coinbase_txn(to: &str, mut data: Vec<u8>) -> Result<Transaction> {
    if data.is_empty() {
        let mut random_bytes = [0_u8; 20];
        rand::thread_rng().fill_bytes(&mut random_bytes);
        data = hex::encode(random_bytes).into_bytes();
    }

    let pub_key_hash = pub_key_hash_from_address(to)?;

    let mut txn = Transaction {
        id: [0_u8; 32],
        vin: vec![TransactionInput {
            prev_tx_id: [0_u8; 32],
            out_index: COINBASE_OUT_INDEX,
            signature: vec![],
            pub_key: data,
        }],
        vout: vec![TransactionOutput {
            value: SUBSIDY,
            pub_key_hash,
        }],
    };

    txn.id = txn.compute_hash();
    Ok(txn)
}

/// A single unspent output selected to fund a new transaction.
#[derive(Debug, Clone)]
pub struct SpendableOutput {
    pub tx_id: Hash256,
    pub out_index: u32,
    pub value: u64,
}

/// Build and sign a transaction spending `amount` from `sender` to `to`.
/// `spendable` must already have accumulated at least `amount` — the
/// `InsufficientFunds` check happens one layer up, in
/// `UTXOSet::find_spendable_outputs`.
pub fn new_utxo_transaction(
    sender: &Wallet,
    to: &str,
    amount: u64,
    accumulated: u64,
    spendable: &[SpendableOutput],
    prev_txs: &HashMap<Hash256, Transaction>,
) -> Result<Transaction> {
    let to_hash = pub_key_hash_from_address(to)?;

    let mut vin: Vec<TransactionInput> = spendable
        .iter()
        .map(|output| TransactionInput {
            prev_tx_id: output.tx_id,
            out_index: output.out_index as i64,
            signature: vec![],
            pub_key: sender.public_key.clone(),
        })
        .collect();
    vin.sort_by_key(|i| (i.prev_tx_id, i.out_index));

    let mut vout = vec![TransactionOutput {
        value: amount,
        pub_key_hash: to_hash,
    }];

    if accumulated > amount {
        vout.push(TransactionOutput {
            value: accumulated - amount,
            pub_key_hash: hash_pub_key(&sender.public_key),
        });
    }

    let mut txn = Transaction {
        id: [0_u8; 32],
        vin,
        vout,
    };
    txn.id = txn.compute_hash();
    txn.sign(&sender.keypair(), prev_txs)?;

    Ok(txn)
}
