//! Connection dispatch: one thread per inbound TCP connection, handler
//! table keyed on the 12-byte command tag. Each message is a one-shot,
//! fire-and-forget send rather than a request/response round trip.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use crate::error::{ErrorKind, Result};
use crate::net::message::{
    self, AddrPayload, BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, TxPayload,
    VersionPayload, CMD_ADDR, CMD_BLOCK, CMD_GETBLOCKS, CMD_GETDATA, CMD_INV, CMD_TX, CMD_VERSION,
};
use crate::net::peers::{BlocksInTransit, Mempool, PeerTable};
use crate::net::sync::{send_get_blocks, send_version};
use crate::store::Blockchain;
use crate::transaction::make_coinbase_txn;
use crate::utxo::UtxoSet;

/// Mempool size that triggers mining a new block. Not configurable, and
/// a bootstrap (central) node never acts on it.
pub const MINING_THRESHOLD: usize = 2;

pub struct NodeContext {
    pub chain: Mutex<Blockchain>,
    pub utxo: UtxoSet,
    pub mempool: Mempool,
    pub peers: PeerTable,
    pub blocks_in_transit: BlocksInTransit,
    pub my_addr: SocketAddr,
    pub miner_address: Option<String>,
    /// The bootstrap node relays and validates but never mines.
    pub is_central: bool,
}

pub fn listen(ctx: Arc<NodeContext>) -> Result<()> {
    let listener = TcpListener::bind(ctx.my_addr)?;

    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &ctx) {
                        eprintln!("error handling connection: {}", err);
                    }
                });
            }
            Err(err) => eprintln!("error accepting connection: {}", err),
        }
    }

    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &NodeContext) -> Result<()> {
    let command = message::read_command(&mut stream)?;

    match command.as_str() {
        CMD_VERSION => handle_version(&mut stream, ctx),
        CMD_ADDR => handle_addr(&mut stream, ctx),
        CMD_INV => handle_inv(&mut stream, ctx),
        CMD_GETBLOCKS => handle_getblocks(&mut stream, ctx),
        CMD_GETDATA => handle_getdata(&mut stream, ctx),
        CMD_BLOCK => handle_block(&mut stream, ctx),
        CMD_TX => handle_tx(&mut stream, ctx),
        other => {
            eprintln!("unknown command: {}", other);
            Ok(())
        }
    }
}

fn handle_version(stream: &mut TcpStream, ctx: &NodeContext) -> Result<()> {
    let payload: VersionPayload = message::read_payload(stream)?;
    ctx.peers.add(payload.addr_from);

    let my_height = ctx.chain.lock().unwrap().best_height();

    if my_height < payload.best_height {
        send_get_blocks(ctx, payload.addr_from)?;
    } else if my_height > payload.best_height {
        send_version(ctx, payload.addr_from)?;
    }

    Ok(())
}

fn handle_addr(stream: &mut TcpStream, ctx: &NodeContext) -> Result<()> {
    let payload: AddrPayload = message::read_payload(stream)?;
    for addr in payload.addr_list {
        ctx.peers.add(addr);
    }

    let req = GetBlocksPayload { addr_from: ctx.my_addr };
    for addr in ctx.peers.snapshot() {
        if let Err(err) = message::dial_and_send(addr, CMD_GETBLOCKS, &req) {
            if matches!(*err, ErrorKind::PeerUnavailable(_)) {
                ctx.peers.remove(&addr);
            }
        }
    }

    Ok(())
}

fn handle_inv(stream: &mut TcpStream, ctx: &NodeContext) -> Result<()> {
    let payload: InvPayload = message::read_payload(stream)?;

    match payload.kind {
        InvKind::Block => {
            ctx.blocks_in_transit.set(payload.items.clone());
            if let Some(first) = ctx.blocks_in_transit.take_first() {
                let req = GetDataPayload {
                    addr_from: ctx.my_addr,
                    kind: InvKind::Block,
                    id: first,
                };
                message::dial_and_send(payload.addr_from, CMD_GETDATA, &req)?;
            }
        }
        InvKind::Tx => {
            for id in payload.items {
                if !ctx.mempool.contains(&id) {
                    let req = GetDataPayload {
                        addr_from: ctx.my_addr,
                        kind: InvKind::Tx,
                        id,
                    };
                    message::dial_and_send(payload.addr_from, CMD_GETDATA, &req)?;
                }
            }
        }
    }

    Ok(())
}

fn handle_getblocks(stream: &mut TcpStream, ctx: &NodeContext) -> Result<()> {
    let payload: GetBlocksPayload = message::read_payload(stream)?;
    let hashes = ctx.chain.lock().unwrap().block_hashes();

    let inv = InvPayload {
        addr_from: ctx.my_addr,
        kind: InvKind::Block,
        items: hashes,
    };
    message::dial_and_send(payload.addr_from, CMD_INV, &inv)
}

fn handle_getdata(stream: &mut TcpStream, ctx: &NodeContext) -> Result<()> {
    let payload: GetDataPayload = message::read_payload(stream)?;

    match payload.kind {
        InvKind::Block => {
            let block = ctx.chain.lock().unwrap().get_block(&payload.id)?;
            let res = BlockPayload {
                addr_from: ctx.my_addr,
                block,
            };
            message::dial_and_send(payload.addr_from, CMD_BLOCK, &res)?;
        }
        InvKind::Tx => {
            if let Some(txn) = ctx.mempool.get(&payload.id) {
                let res = TxPayload {
                    addr_from: ctx.my_addr,
                    transaction: txn,
                };
                message::dial_and_send(payload.addr_from, CMD_TX, &res)?;
            }
        }
    }

    Ok(())
}

fn handle_block(stream: &mut TcpStream, ctx: &NodeContext) -> Result<()> {
    let payload: BlockPayload = message::read_payload(stream)?;
    let block = payload.block;

    let accepted = ctx.chain.lock().unwrap().add_block(block.clone())?;
    if !accepted {
        return Ok(());
    }
    println!("received block {}", hex::encode(block.hash));

    ctx.blocks_in_transit.remove(&block.hash);
    if let Some(next) = ctx.blocks_in_transit.take_first() {
        let req = GetDataPayload {
            addr_from: ctx.my_addr,
            kind: InvKind::Block,
            id: next,
        };
        message::dial_and_send(payload.addr_from, CMD_GETDATA, &req)?;
    } else {
        // Only reindex once a whole in-flight batch has landed, rather
        // than after every individual block.
        ctx.utxo.update(&block)?;
    }

    Ok(())
}

fn handle_tx(stream: &mut TcpStream, ctx: &NodeContext) -> Result<()> {
    let payload: TxPayload = message::read_payload(stream)?;
    let txn = payload.transaction;

    ctx.mempool.insert(txn.clone());

    if ctx.is_central {
        relay_inv(ctx, InvKind::Tx, vec![txn.id], payload.addr_from);
    } else if ctx.miner_address.is_some() && ctx.mempool.len() >= MINING_THRESHOLD {
        run_mining_loop(ctx)?;
    }

    Ok(())
}

fn relay_inv(ctx: &NodeContext, kind: InvKind, items: Vec<crate::crypto::Hash256>, exclude: SocketAddr) {
    let inv = InvPayload {
        addr_from: ctx.my_addr,
        kind,
        items,
    };

    for addr in ctx.peers.snapshot() {
        if addr == exclude {
            continue;
        }
        if let Err(err) = message::dial_and_send(addr, CMD_INV, &inv) {
            if matches!(*err, ErrorKind::PeerUnavailable(_)) {
                ctx.peers.remove(&addr);
            }
        }
    }
}

/// Mine everything the mempool currently holds into one or more blocks,
/// re-looping as long as the mempool keeps refilling. `miner_address`
/// must be set by the caller.
pub fn run_mining_loop(ctx: &NodeContext) -> Result<()> {
    let miner_address = match &ctx.miner_address {
        Some(addr) => addr.clone(),
        None => return Ok(()),
    };

    loop {
        let pending = ctx.mempool.drain();
        let accepted: Vec<_> = {
            let chain = ctx.chain.lock().unwrap();
            pending
                .into_iter()
                .filter(|txn| matches!(chain.verify_transaction(txn), Ok(true)))
                .collect()
        };

        if accepted.is_empty() {
            println!("every pending transaction was invalid, nothing to mine");
            return Ok(());
        }

        let reward = make_coinbase_txn(&miner_address, vec![])?;
        let mut txs = vec![reward];
        txs.extend(accepted);

        let block = ctx.chain.lock().unwrap().mine_block(txs)?;
        ctx.utxo.update(&block)?;
        println!("mined new block {}", hex::encode(block.hash));

        relay_inv(ctx, InvKind::Block, vec![block.hash], ctx.my_addr);

        if ctx.mempool.is_empty() {
            return Ok(());
        }
    }
}
