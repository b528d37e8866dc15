use std::error::{self, Error as StdError};
use std::fmt;

use crate::crypto::Hash256;

pub type Result<T> = std::result::Result<T, Error>;

pub type Error = Box<ErrorKind>;

/// A single consensus- and networking-error surface for the whole crate.
#[derive(Debug)]
pub enum ErrorKind {
    /// A CLI invocation was missing a required flag or gave one an
    /// unparseable value.
    UsageError(String),
    /// Base58Check decode failed or the checksum did not match.
    AddressInvalid(String),
    /// `FindSpendableOutputs` could not meet the requested amount.
    InsufficientFunds { wanted: u64, have: u64 },
    /// No chain exists for this `NODE_ID`.
    StoreNotFound,
    /// A chain already exists for this `NODE_ID`.
    StoreAlreadyExists,
    /// `FindTransaction` could not locate a transaction referenced by a
    /// signature check.
    TransactionNotFound(Hash256),
    /// A transaction failed signature verification during mining.
    VerifyFailed(Hash256),
    /// Two transactions being mined into the same block spend the same
    /// output.
    DoubleSpend { prev_tx_id: Hash256, out_index: i64 },
    /// A block failed proof-of-work or ingest validation.
    InvalidBlock(String),
    /// Dialing a peer failed; the caller is expected to drop the peer
    /// from `knownNodes` and continue.
    PeerUnavailable(String),
    Serialization(String),
    Io(String),
}

impl StdError for ErrorKind {
    fn cause(&self) -> Option<&dyn error::Error> {
        None
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::UsageError(msg) => write!(f, "usage error: {}", msg),
            ErrorKind::AddressInvalid(addr) => write!(f, "invalid address: {}", addr),
            ErrorKind::InsufficientFunds { wanted, have } => {
                write!(f, "insufficient funds: wanted {}, have {}", wanted, have)
            }
            ErrorKind::StoreNotFound => write!(f, "no blockchain exists for this node"),
            ErrorKind::StoreAlreadyExists => write!(f, "a blockchain already exists for this node"),
            ErrorKind::TransactionNotFound(id) => {
                write!(f, "transaction not found: {}", hex::encode(id))
            }
            ErrorKind::VerifyFailed(id) => {
                write!(f, "transaction failed verification: {}", hex::encode(id))
            }
            ErrorKind::DoubleSpend { prev_tx_id, out_index } => write!(
                f,
                "double spend: output {}:{} claimed by more than one transaction in the same block",
                hex::encode(prev_tx_id),
                out_index
            ),
            ErrorKind::InvalidBlock(reason) => write!(f, "invalid block: {}", reason),
            ErrorKind::PeerUnavailable(addr) => write!(f, "peer unavailable: {}", addr),
            ErrorKind::Serialization(msg) => write!(f, "serialization error: {}", msg),
            ErrorKind::Io(msg) => write!(f, "io error: {}", msg),
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Box::new(ErrorKind::Serialization(err.to_string()))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Box::new(ErrorKind::Io(err.to_string()))
    }
}

impl From<sled::Error> for Error {
    fn from(err: sled::Error) -> Self {
        Box::new(ErrorKind::Io(err.to_string()))
    }
}
