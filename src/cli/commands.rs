use crate::api::rest::RestApi;
use crate::config::Config;
use crate::core::Blockchain;
use crate::node::Node;
use crate::storage::Database;
use crate::wallet::Wallet;
use crate::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::signal;

#[derive(Parser)]
#[command(name = "happeed")]
#[command(about = "Happee node - a minimal proof-of-work UTXO cryptocurrency")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Data directory")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Enable debug logging")]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the node: P2P listener, HTTP API and configured peers
    Start(StartArgs),

    /// Wallet management commands
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Blockchain information commands
    #[command(subcommand)]
    Chain(ChainCommands),
}

#[derive(Args, Debug, Default)]
pub struct StartArgs {
    #[arg(long, help = "Port for peer WebSocket connections")]
    pub p2p_port: Option<u16>,

    #[arg(long, help = "Port for the HTTP API")]
    pub http_port: Option<u16>,

    #[arg(long = "peer", help = "Peer to dial at startup (ws://host:port), repeatable")]
    pub peers: Vec<String>,
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Print the wallet address, creating the key if needed
    Address,

    /// Delete the wallet key
    Reset,
}

#[derive(Subcommand)]
pub enum ChainCommands {
    /// Show length, tip and difficulty of the stored chain
    Info,
}

pub async fn run_cli(config: Config) -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging once
    let _ = if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).try_init()
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init()
    };

    let mut config = config;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    std::fs::create_dir_all(&config.storage.data_dir)?;

    match cli.command {
        Commands::Start(args) => {
            apply_start_args(&mut config, args);
            start_node(config).await
        }
        Commands::Wallet(cmd) => handle_wallet_command(&config, cmd),
        Commands::Chain(cmd) => handle_chain_command(&config, cmd),
    }
}

/// Flags win over the file; peers given on the command line add to the configured ones.
fn apply_start_args(config: &mut Config, args: StartArgs) {
    if let Some(port) = args.p2p_port {
        config.network.p2p_port = port;
    }
    if let Some(port) = args.http_port {
        config.api.http_port = port;
    }
    for peer in args.peers {
        if !config.network.peers.contains(&peer) {
            config.network.peers.push(peer);
        }
    }
}

async fn start_node(config: Config) -> Result<()> {
    log::info!("🚀 Starting Happee node in {}", config.storage.data_dir.display());

    let node = Node::open(&config.storage.data_dir)?;
    log::info!("🔑 Wallet address: {}", node.address()?);

    let listener = crate::network::P2PNode::bind(config.network.p2p_port).await?;
    let p2p = node.p2p().clone();
    let p2p_shutdown = node.shutdown_signal();
    let p2p_handle = tokio::spawn(async move {
        if let Err(e) = p2p.serve(listener, p2p_shutdown).await {
            log::error!("P2P listener error: {}", e);
        }
    });

    for peer in &config.network.peers {
        if let Err(e) = node.add_peer(peer).await {
            log::warn!("⚠️ Could not reach peer {}: {}", peer, e);
        }
    }

    let rest_api = RestApi::new(node.clone(), config.api.clone());
    let mut rest_handle = tokio::spawn(async move {
        if let Err(e) = rest_api.start().await {
            log::error!("HTTP API error: {}", e);
        }
    });

    log::info!("✅ Happee node started");
    log::info!("🌐 P2P port: {}", config.network.p2p_port);
    log::info!("🔗 HTTP API: http://localhost:{}", config.api.http_port);

    let rest_finished = tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            log::info!("🛑 Interrupted, shutting down");
            node.stop();
            false
        }
        _ = &mut rest_handle => true,
    };

    if !rest_finished {
        let _ = rest_handle.await;
    }
    // The HTTP server may have exited on its own; make sure the listener follows.
    node.stop();
    let _ = p2p_handle.await;

    log::info!("✅ Happee node stopped");
    Ok(())
}

fn handle_wallet_command(config: &Config, cmd: WalletCommands) -> Result<()> {
    let wallet = Wallet::new(&config.storage.data_dir);

    match cmd {
        WalletCommands::Address => {
            wallet.ensure_exists()?;
            println!("{}", wallet.address()?);
        }
        WalletCommands::Reset => {
            if wallet.exists() {
                wallet.delete()?;
                println!("🗑️  Wallet key removed from {}", wallet.key_path().display());
            } else {
                println!("No wallet key at {}", wallet.key_path().display());
            }
        }
    }

    Ok(())
}

fn handle_chain_command(config: &Config, cmd: ChainCommands) -> Result<()> {
    let db = Database::new(config.storage.data_dir.join("chain.db"))?;
    let blockchain = Blockchain::new(Some(db))?;

    match cmd {
        ChainCommands::Info => {
            let tip = blockchain.latest_block();
            println!("⛓️  Blockchain Information:");
            println!("Length: {}", blockchain.len());
            println!("Tip hash: {}", tip.hash);
            println!("Tip index: {}", tip.index);
            println!("Next difficulty: {}", blockchain.current_difficulty());
            println!("Accumulated difficulty: {}", blockchain.accumulated_difficulty());
            println!("Pending transactions: {}", blockchain.pool().len());
            println!("Unspent outputs: {}", blockchain.utxos().len());
        }
    }

    Ok(())
}
