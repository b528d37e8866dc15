//! ECDSA keypairs, address derivation, and the on-disk keystore.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde::{Deserialize, Serialize};

use crate::crypto::{hash_pub_key, hash_to_address, Hash160};
use crate::error::{Error, ErrorKind, Result};

/// An ECDSA-over-P-256 keypair plus its derived public key, stored as a
/// PKCS#8 document because `ring::signature::EcdsaKeyPair` itself is
/// neither `Clone` nor serializable.
#[derive(Serialize, Deserialize, Clone)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    /// Raw `X || Y` coordinates, 64 bytes, no SEC1 compression tag.
    pub public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .expect("failed to generate an ECDSA keypair");
        let keypair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref())
            .expect("failed to parse a freshly generated keypair");

        // ring hands back the SEC1 uncompressed point, 0x04 || X || Y.
        let raw_point = keypair.public_key().as_ref();
        let public_key = raw_point[1..].to_vec();

        Wallet {
            pkcs8: pkcs8.as_ref().to_vec(),
            public_key,
        }
    }

    pub fn keypair(&self) -> EcdsaKeyPair {
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &self.pkcs8)
            .expect("stored keypair bytes should always parse")
    }

    pub fn pub_key_hash(&self) -> Hash160 {
        hash_pub_key(&self.public_key)
    }

    pub fn address(&self) -> String {
        hash_to_address(&self.pub_key_hash())
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// The on-disk keystore: every address this node can spend from, keyed by
/// its Base58Check string so it round-trips cleanly through `bincode`.
#[derive(Serialize, Deserialize, Default)]
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
}

impl Wallets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the keystore file for the given node, or start an empty one if
    /// it doesn't exist yet. Conventionally named `wallet_<NODE_ID>.dat`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }

        let bytes = fs::read(path)?;
        let wallets: Wallets = bincode::deserialize(&bytes)?;
        Ok(wallets)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Generate a new wallet, add it to the keystore, and return its
    /// address.
    pub fn create_wallet(&mut self) -> String {
        let wallet = Wallet::new();
        let address = wallet.address();
        self.wallets.insert(address.clone(), wallet);
        address
    }

    pub fn addresses(&self) -> Vec<String> {
        let mut addrs: Vec<String> = self.wallets.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    pub fn get(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }
}

/// Strip the version byte and checksum from an address, yielding the raw
/// public key hash that outputs get locked to. Used by coinbase
/// construction.
pub fn pub_key_hash_from_address(address: &str) -> Result<Hash160> {
    crate::crypto::address_to_hash(address)
        .map_err(|_| -> Error { Box::new(ErrorKind::AddressInvalid(address.to_string())) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::validate_address;

    #[test]
    fn fresh_wallet_has_a_valid_address() {
        let wallet = Wallet::new();
        assert!(validate_address(&wallet.address()));
    }

    #[test]
    fn keystore_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet_0.dat");

        let mut wallets = Wallets::new();
        let addr = wallets.create_wallet();
        wallets.save(&path).unwrap();

        let loaded = Wallets::load(&path).unwrap();
        assert_eq!(loaded.get(&addr).unwrap().address(), addr);
    }

    #[test]
    fn missing_keystore_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.dat");

        let wallets = Wallets::load(&path).unwrap();
        assert!(wallets.addresses().is_empty());
    }
}
