//! Handshake and chain-sync helpers run from `startnode`: announce
//! ourselves to every known node, then ask the first one that answers
//! for its inventory.

use std::net::SocketAddr;

use crate::error::{ErrorKind, Result};
use crate::net::message::{self, CMD_GETBLOCKS, CMD_VERSION, GetBlocksPayload, VersionPayload};
use crate::net::server::NodeContext;

pub const PROTOCOL_VERSION: u32 = 1;

pub fn send_version(ctx: &NodeContext, addr: SocketAddr) -> Result<()> {
    let best_height = ctx.chain.lock().unwrap().best_height();
    let payload = VersionPayload {
        version: PROTOCOL_VERSION,
        best_height,
        addr_from: ctx.my_addr,
    };
    message::dial_and_send(addr, CMD_VERSION, &payload)
}

pub fn send_get_blocks(ctx: &NodeContext, addr: SocketAddr) -> Result<()> {
    let payload = GetBlocksPayload { addr_from: ctx.my_addr };
    message::dial_and_send(addr, CMD_GETBLOCKS, &payload)
}

/// Called once at startup: greet every seed peer with a version message,
/// in parallel, inside a scoped thread batch. A peer ahead of us answers
/// with `getblocks`; a peer behind us gets one from our handler instead.
/// A peer that refuses the connection is pruned from `knownNodes`, never
/// retried in this pass.
pub fn announce_to_known_nodes(ctx: &NodeContext) {
    let addrs = ctx.peers.snapshot();

    let dead: Vec<SocketAddr> = crossbeam::scope(|scope| {
        let handles: Vec<_> = addrs
            .iter()
            .map(|addr| scope.spawn(move |_| (*addr, send_version(ctx, *addr))))
            .collect();

        handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter_map(|(addr, result)| match result {
                Err(err) if matches!(*err, ErrorKind::PeerUnavailable(_)) => Some(addr),
                _ => None,
            })
            .collect()
    })
    .expect("scoped announce threads should never panic");

    for addr in dead {
        ctx.peers.remove(&addr);
    }
}
