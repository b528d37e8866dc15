//! Wire framing: a 12-byte zero-padded ASCII command followed by a
//! bincode payload, with no length prefix. Every message dials a fresh
//! `TcpStream` rather than holding a persistent connection open.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::block::Block;
use crate::crypto::Hash256;
use crate::error::{Error, ErrorKind, Result};
use crate::transaction::Transaction;

pub const COMMAND_LENGTH: usize = 12;

pub const CMD_VERSION: &str = "ver";
pub const CMD_ADDR: &str = "addr";
pub const CMD_INV: &str = "inv";
pub const CMD_GETBLOCKS: &str = "getblocks";
pub const CMD_GETDATA: &str = "getdata";
pub const CMD_BLOCK: &str = "block";
pub const CMD_TX: &str = "tx";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvKind {
    Block,
    Tx,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VersionPayload {
    pub version: u32,
    pub best_height: usize,
    pub addr_from: SocketAddr,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AddrPayload {
    pub addr_list: Vec<SocketAddr>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InvPayload {
    pub addr_from: SocketAddr,
    pub kind: InvKind,
    pub items: Vec<Hash256>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetBlocksPayload {
    pub addr_from: SocketAddr,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetDataPayload {
    pub addr_from: SocketAddr,
    pub kind: InvKind,
    pub id: Hash256,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BlockPayload {
    pub addr_from: SocketAddr,
    pub block: Block,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TxPayload {
    pub addr_from: SocketAddr,
    pub transaction: Transaction,
}

fn command_bytes(command: &str) -> [u8; COMMAND_LENGTH] {
    let mut bytes = [0_u8; COMMAND_LENGTH];
    let src = command.as_bytes();
    let len = src.len().min(COMMAND_LENGTH);
    bytes[..len].copy_from_slice(&src[..len]);
    bytes
}

fn command_from_bytes(bytes: &[u8; COMMAND_LENGTH]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(COMMAND_LENGTH);
    String::from_utf8_lossy(&bytes[..end]).to_string()
}

/// Write the 12-byte command tag followed by the bincode-encoded
/// payload onto `stream`.
pub fn send(stream: &mut TcpStream, command: &str, payload: &impl Serialize) -> Result<()> {
    stream.write_all(&command_bytes(command))?;
    bincode::serialize_into(stream, payload)?;
    Ok(())
}

/// Dial `addr` fresh and send one message. A failed connection is
/// reported as [`ErrorKind::PeerUnavailable`] rather than the generic
/// `Io` variant, so callers can prune a dead peer without misreading a
/// framing or serialization bug as a dead connection.
pub fn dial_and_send(addr: SocketAddr, command: &str, payload: &impl Serialize) -> Result<()> {
    let mut stream = TcpStream::connect(addr)
        .map_err(|_| -> Error { Box::new(ErrorKind::PeerUnavailable(addr.to_string())) })?;
    stream.set_nodelay(true).ok();
    send(&mut stream, command, payload)
}

/// Read the 12-byte command tag off `stream`. Callers dispatch on the
/// result before decoding the payload, since each command carries a
/// different payload type.
pub fn read_command(stream: &mut TcpStream) -> Result<String> {
    let mut buf = [0_u8; COMMAND_LENGTH];
    stream.read_exact(&mut buf)?;
    Ok(command_from_bytes(&buf))
}

pub fn read_payload<T: DeserializeOwned>(stream: &mut TcpStream) -> Result<T> {
    Ok(bincode::deserialize_from(stream)?)
}
