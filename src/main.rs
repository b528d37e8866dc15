pub mod block;
pub mod crypto;
pub mod difficulty;
pub mod error;
pub mod merkle;
pub mod net;
pub mod store;
pub mod transaction;
pub mod utxo;
pub mod wallet;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};

use crate::crypto::{address_to_hash, validate_address};
use crate::error::{Error, ErrorKind, Result};
use crate::net::message::{self, CMD_TX, TxPayload};
use crate::net::peers::{BlocksInTransit, Mempool, PeerTable};
use crate::net::server::{self, NodeContext};
use crate::net::sync;
use crate::store::Blockchain;
use crate::transaction::{make_coinbase_txn, new_utxo_transaction, SpendableOutput};
use crate::utxo::UtxoSet;
use crate::wallet::Wallets;

const CENTRAL_NODE_ID: &str = "3000";

#[derive(Parser)]
#[command(name = "tsengnode", about = "A toy UTXO chain: PoW mining, ECDSA transactions, gossip sync")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new wallet and print its address.
    CreateWallet,
    /// Print every address in this node's keystore.
    ListAddresses,
    /// Start a new chain, minting the genesis block's subsidy to `address`.
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },
    /// Print the balance of `address`.
    GetBalance {
        #[arg(long)]
        address: String,
    },
    /// Walk the chain from the tip to genesis, printing each block.
    PrintChain,
    /// Rebuild the UTXO index from a full scan of the chain.
    ReindexUtxo,
    /// Build, sign and submit a payment.
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Mine the payment into a block locally instead of gossiping it.
        #[arg(long)]
        mine: bool,
    },
    /// Join the gossip network and start serving peers.
    StartNode {
        /// Address to receive mining rewards at. Omit to run a relay-only node.
        #[arg(long)]
        miner: Option<String>,
    },
}

fn node_id() -> Result<String> {
    std::env::var("NODE_ID")
        .map_err(|_| -> Error { Box::new(ErrorKind::UsageError("NODE_ID environment variable is not set".into())) })
}

fn wallet_path(node_id: &str) -> PathBuf {
    PathBuf::from(format!("wallet_{}.dat", node_id))
}

fn chain_path(node_id: &str) -> PathBuf {
    PathBuf::from(format!("blockchain_{}.db", node_id))
}

fn node_address(node_id: &str) -> SocketAddr {
    format!("127.0.0.1:{}", node_id)
        .parse()
        .expect("NODE_ID should be a valid port number")
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::CreateWallet => {
            let id = node_id()?;
            let mut wallets = Wallets::load(wallet_path(&id))?;
            let address = wallets.create_wallet();
            wallets.save(wallet_path(&id))?;
            println!("Your new address: {}", address);
        }

        Command::ListAddresses => {
            let id = node_id()?;
            let wallets = Wallets::load(wallet_path(&id))?;
            for address in wallets.addresses() {
                println!("{}", address);
            }
        }

        Command::CreateBlockchain { address } => {
            if !validate_address(&address) {
                return Err(Box::new(ErrorKind::AddressInvalid(address)));
            }

            let id = node_id()?;
            let chain = Blockchain::create(chain_path(&id), &address)?;
            let utxo = UtxoSet::open(&chain)?;
            utxo.reindex(&chain)?;
            println!("Done!");
        }

        Command::GetBalance { address } => {
            if !validate_address(&address) {
                return Err(Box::new(ErrorKind::AddressInvalid(address)));
            }

            let id = node_id()?;
            let chain = Blockchain::open(chain_path(&id))?;
            let utxo = UtxoSet::open(&chain)?;
            let pub_key_hash = address_to_hash(&address)?;
            let outputs = utxo.find_utxo(&pub_key_hash)?;
            let balance: u64 = outputs.iter().map(|o| o.value).sum();

            println!("Balance of '{}': {}", address, balance);
        }

        Command::PrintChain => {
            let id = node_id()?;
            let chain = Blockchain::open(chain_path(&id))?;

            for block in chain.iter() {
                println!("============ Block {} ============", hex::encode(block.hash));
                println!("Prev. hash: {}", hex::encode(block.prev_block_hash));
                println!("PoW: {}", block.validate_pow());
                for txn in &block.transactions {
                    println!("  - Transaction {}", hex::encode(txn.id));
                }
                println!();
            }
        }

        Command::ReindexUtxo => {
            let id = node_id()?;
            let chain = Blockchain::open(chain_path(&id))?;
            let utxo = UtxoSet::open(&chain)?;
            utxo.reindex(&chain)?;
            println!("Done! There are {} transactions in the UTXO set.", utxo.count_transactions());
        }

        Command::Send { from, to, amount, mine } => {
            if !validate_address(&from) || !validate_address(&to) {
                return Err(Box::new(ErrorKind::AddressInvalid(format!("{} or {}", from, to))));
            }

            let id = node_id()?;
            let mut chain = Blockchain::open(chain_path(&id))?;
            let utxo = UtxoSet::open(&chain)?;
            let wallets = Wallets::load(wallet_path(&id))?;
            let wallet = wallets
                .get(&from)
                .ok_or_else(|| -> Error { Box::new(ErrorKind::UsageError(format!("no wallet for {}", from))) })?;

            let from_hash = wallet.pub_key_hash();
            let (accumulated, spendable) = utxo.find_spendable_outputs(&from_hash, amount)?;
            let prev_txs = resolve_prev_txs(&chain, &spendable)?;

            let payment = new_utxo_transaction(wallet, &to, amount, accumulated, &spendable, &prev_txs)?;

            if mine {
                let reward = make_coinbase_txn(&from, vec![])?;
                let block = chain.mine_block(vec![reward, payment])?;
                utxo.update(&block)?;
                println!("Success!");
            } else {
                let central: SocketAddr = node_address(CENTRAL_NODE_ID);
                let payload = TxPayload {
                    addr_from: node_address(&id),
                    transaction: payment,
                };
                message::dial_and_send(central, CMD_TX, &payload)?;
                println!("Sent tx to the network for mining.");
            }
        }

        Command::StartNode { miner } => {
            let id = node_id()?;
            let my_addr = node_address(&id);
            let is_central = id == CENTRAL_NODE_ID;

            if let Some(addr) = &miner {
                if !validate_address(addr) {
                    return Err(Box::new(ErrorKind::AddressInvalid(addr.clone())));
                }
            }

            let chain = Blockchain::open(chain_path(&id))?;
            let utxo = UtxoSet::open(&chain)?;

            let peers = PeerTable::new(vec![]);
            if !is_central {
                peers.add(node_address(CENTRAL_NODE_ID));
            }

            let ctx = Arc::new(NodeContext {
                chain: Mutex::new(chain),
                utxo,
                mempool: Mempool::new(),
                peers,
                blocks_in_transit: BlocksInTransit::new(),
                my_addr,
                miner_address: miner.clone(),
                is_central,
            });

            println!("Starting node {}", my_addr);
            if let Some(addr) = &miner {
                println!("Mining is on. Address to receive rewards: {}", addr);
            }

            if !is_central {
                sync::announce_to_known_nodes(&ctx);
            }

            server::listen(ctx)?;
        }
    }

    Ok(())
}

fn resolve_prev_txs(
    chain: &Blockchain,
    spendable: &[SpendableOutput],
) -> Result<std::collections::HashMap<crypto::Hash256, transaction::Transaction>> {
    let mut prev_txs = std::collections::HashMap::new();
    for output in spendable {
        if prev_txs.contains_key(&output.tx_id) {
            continue;
        }
        let txn = chain.find_transaction(&output.tx_id)?;
        prev_txs.insert(output.tx_id, txn);
    }
    Ok(prev_txs)
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
