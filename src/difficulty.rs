//! Proof-of-work: fixed-difficulty nonce search and validation. This
//! network runs a single fixed difficulty for its whole lifetime; there
//! is no retargeting.

use num_bigint::BigUint;
use num_traits::One;

use crate::crypto::{sha256, Hash256};

/// Number of leading zero bits the block hash must have.
pub const TARGET_BITS: u32 = 16;

/// `target = 1 << (256 - TARGET_BITS)`, compared against the hash as a
/// big-endian integer.
pub fn target() -> BigUint {
    BigUint::one() << (256 - TARGET_BITS as usize)
}

/// The exact byte sequence that gets hashed to seal or validate a block.
/// All integers are encoded big-endian at a fixed width so that the
/// digest is unambiguous regardless of value.
pub fn pow_digest_input(
    prev_block_hash: &Hash256,
    merkle_root: &Hash256,
    timestamp: i64,
    target_bits: u32,
    nonce: u64,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + 32 + 8 + 8 + 8);
    buf.extend_from_slice(prev_block_hash);
    buf.extend_from_slice(merkle_root);
    buf.extend_from_slice(&timestamp.to_be_bytes());
    buf.extend_from_slice(&(target_bits as u64).to_be_bytes());
    buf.extend_from_slice(&nonce.to_be_bytes());
    buf
}

/// Search for a nonce that makes the digest hash fall below [`target`].
/// Synchronous and single-threaded, as the spec requires — a production
/// miner would make this interruptible, but this is a teaching-grade node.
pub fn run(prev_block_hash: &Hash256, merkle_root: &Hash256, timestamp: i64) -> (u64, Hash256) {
    let target = target();
    let mut nonce: u64 = 0;

    loop {
        let digest_input = pow_digest_input(prev_block_hash, merkle_root, timestamp, TARGET_BITS, nonce);
        let hash = sha256(&digest_input);

        if BigUint::from_bytes_be(&hash) < target {
            return (nonce, hash);
        }

        if nonce == u64::MAX >> 1 {
            panic!("exhausted the nonce space without finding a valid proof of work");
        }

        nonce += 1;
    }
}

/// Recompute the digest with the block's own fields and check it against
/// [`target`].
pub fn validate(
    prev_block_hash: &Hash256,
    merkle_root: &Hash256,
    timestamp: i64,
    nonce: u64,
    hash: &Hash256,
) -> bool {
    let digest_input = pow_digest_input(prev_block_hash, merkle_root, timestamp, TARGET_BITS, nonce);
    let recomputed = sha256(&digest_input);

    if recomputed != *hash {
        return false;
    }

    BigUint::from_bytes_be(hash) < target()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_produces_a_hash_below_target() {
        let prev = [1_u8; 32];
        let root = [2_u8; 32];
        let (nonce, hash) = run(&prev, &root, 1_700_000_000);

        assert!(validate(&prev, &root, 1_700_000_000, nonce, &hash));
    }

    #[test]
    fn flipping_a_transaction_byte_invalidates_pow() {
        let prev = [1_u8; 32];
        let root_a = [2_u8; 32];
        let mut root_b = root_a;
        root_b[0] ^= 0xFF;

        let (nonce, hash) = run(&prev, &root_a, 42);

        // Same nonce and hash, but a different merkle root (as would result
        // from mutating a transaction byte) must fail validation.
        assert!(!validate(&prev, &root_b, 42, nonce, &hash));
    }

    #[test]
    fn tampered_nonce_fails_validation() {
        let prev = [3_u8; 32];
        let root = [4_u8; 32];
        let (nonce, hash) = run(&prev, &root, 7);

        assert!(!validate(&prev, &root, 7, nonce.wrapping_add(1), &hash));
    }
}
