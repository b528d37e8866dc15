//! Hashing and address encoding. RIPEMD-160, SHA-256 and Base58Check are
//! treated as utility primitives here: correctness of the algorithms
//! themselves is delegated to `ring`, `ripemd` and `base58check`.

use base58check::{FromBase58Check, ToBase58Check};
use ring::digest::{Context, SHA256};
use ripemd::{Digest, Ripemd160};

use crate::error::{Error, ErrorKind};

pub type Hash160 = [u8; 20];
pub type Hash256 = [u8; 32];

/// The address version byte used by this network. Addresses are never
/// valid on another network because the checksum is computed over it.
pub const ADDRESS_VERSION: u8 = 0x00;
pub const ADDRESS_CHECKSUM_LEN: usize = 4;

pub fn sha256(data: &[u8]) -> Hash256 {
    let mut ctx = Context::new(&SHA256);
    ctx.update(data);
    let digest = ctx.finish();

    let mut out = [0_u8; 32];
    out.copy_from_slice(digest.as_ref());
    out
}

pub fn double_sha256(data: &[u8]) -> Hash256 {
    sha256(&sha256(data))
}

pub fn ripemd160(data: &[u8]) -> Hash160 {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    let result = hasher.finalize();

    let mut out = [0_u8; 20];
    out.copy_from_slice(&result);
    out
}

/// `RIPEMD-160(SHA-256(pubkey))`, the locking target for a P2PKH output.
pub fn hash_pub_key(pub_key: &[u8]) -> Hash160 {
    ripemd160(&sha256(pub_key))
}

/// Base58Check-encode a public key hash into a spendable address:
/// `Base58(version || hash || checksum4)`.
pub fn hash_to_address(pub_key_hash: &Hash160) -> String {
    pub_key_hash.to_base58check(ADDRESS_VERSION)
}

/// Recover the 20-byte public key hash from an address, verifying the
/// version byte and the checksum along the way.
pub fn address_to_hash(address: &str) -> Result<Hash160, Error> {
    let (version, payload) = address
        .from_base58check()
        .map_err(|_| Box::new(ErrorKind::AddressInvalid(address.to_string())))?;

    if version != ADDRESS_VERSION {
        return Err(Box::new(ErrorKind::AddressInvalid(address.to_string())));
    }

    if payload.len() != 20 {
        return Err(Box::new(ErrorKind::AddressInvalid(address.to_string())));
    }

    let mut out = [0_u8; 20];
    out.copy_from_slice(&payload);
    Ok(out)
}

/// `true` iff the address decodes and its checksum matches.
pub fn validate_address(address: &str) -> bool {
    address_to_hash(address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let digest = sha256(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn address_round_trips() {
        let hash: Hash160 = [7_u8; 20];
        let addr = hash_to_address(&hash);
        let recovered = address_to_hash(&addr).unwrap();

        assert_eq!(hash, recovered);
        assert!(validate_address(&addr));
    }

    #[test]
    fn tampered_address_fails_checksum() {
        let hash: Hash160 = [9_u8; 20];
        let mut addr = hash_to_address(&hash).into_bytes();
        // Flip a character in the middle of the base58 payload.
        let mid = addr.len() / 2;
        addr[mid] = if addr[mid] == b'a' { b'b' } else { b'a' };
        let addr = String::from_utf8(addr).unwrap();

        assert!(!validate_address(&addr));
    }

    #[test]
    fn wrong_length_payload_rejected() {
        // Valid base58check of a 19-byte payload, which can never be a real address.
        let short: [u8; 19] = [1; 19];
        let encoded = short.to_base58check(ADDRESS_VERSION);
        assert!(!validate_address(&encoded));
    }

    proptest::proptest! {
        /// Any 20-byte hash round-trips through address encoding, and flipping
        /// any single byte of the encoded address breaks the checksum.
        #[test]
        fn address_round_trips_for_any_hash(bytes: [u8; 20], flip_index in 0usize..25, flip_byte: u8) {
            let addr = hash_to_address(&bytes);
            proptest::prop_assert_eq!(address_to_hash(&addr).unwrap(), bytes);
            proptest::prop_assert!(validate_address(&addr));

            let mut raw = addr.into_bytes();
            let index = flip_index % raw.len();
            let original = raw[index];
            raw[index] = flip_byte;

            if raw[index] != original {
                let mutated = String::from_utf8_lossy(&raw).to_string();
                proptest::prop_assert!(!validate_address(&mutated));
            }
        }
    }
}
