//! braid-node: runs a Braid ledger node.
//!
//! Startup sequence:
//!   1. Load network settings (preset or JSON file)
//!   2. Open the state database
//!   3. Start the manager: apply genesis, replay persisted vertices
//!   4. Start the optional block producers (PoA signer or PoW miner)
//!   5. Run the event loop until Ctrl-C, then persist and stop

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{debug, info};

use braid_core::settings::Settings;
use braid_core::vertex::VertexLike;
use braid_crypto::PoaKeyPair;
use braid_events::{Event, EventBus};
use braid_node::{Manager, PoaBlockProducer, PowMiner, TokioReactor};
use braid_storage::StateDb;

#[derive(Parser, Debug)]
#[command(name = "braid-node", version, about = "Braid DAG ledger node")]
struct Args {
    /// Directory for the persistent state database.
    #[arg(long, default_value = "~/.braid/data")]
    data_dir: PathBuf,

    /// Built-in network preset: `mainnet` or `unittests`.
    #[arg(long, default_value = "mainnet")]
    network: String,

    /// Settings JSON file; overrides `--network`.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Skip proof-of-work checks and use weight 1 everywhere.
    #[arg(long)]
    test_mode: bool,

    /// PoA signer key file. The node produces blocks when set.
    #[arg(long)]
    poa_key: Option<PathBuf>,

    /// Write a fresh PoA key file to this path and exit.
    #[arg(long)]
    generate_key: Option<PathBuf>,

    /// Run the CPU miner.
    #[arg(long)]
    mine: bool,

    /// Seconds between mining rounds.
    #[arg(long, default_value_t = 5)]
    mine_interval: u64,

    /// Hex output script that receives mined rewards.
    #[arg(long, default_value = "")]
    reward_script: String,

    /// Print the effective settings as JSON and exit.
    #[arg(long)]
    print_settings: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,braid=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    if let Some(path) = &args.generate_key {
        let keypair = PoaKeyPair::generate();
        keypair
            .save(path)
            .with_context(|| format!("writing key file {}", path.display()))?;
        println!("{}", hex::encode(&keypair.public_key));
        return Ok(());
    }

    let local = tokio::task::LocalSet::new();
    local.run_until(run(args)).await
}

async fn run(args: Args) -> anyhow::Result<()> {
    // ── Settings ──────────────────────────────────────────────────────────────
    let mut settings = load_settings(&args)?;
    if args.test_mode {
        settings.test_mode = true;
    }
    settings.validate().context("validating settings")?;
    if args.print_settings {
        println!("{}", serde_json::to_string_pretty(&settings).context("encoding settings")?);
        return Ok(());
    }
    let settings = Arc::new(settings);
    info!(network = %settings.network, poa = settings.is_poa(), test_mode = settings.test_mode, "Braid node starting");

    // ── State database ────────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir).join(&settings.network);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let db = StateDb::open(&data_dir).context("opening state database")?;

    // ── Manager ───────────────────────────────────────────────────────────────
    let reactor = Rc::new(TokioReactor::new());
    let bus = EventBus::new(reactor.clone());
    bus.subscribe_all(log_event);
    tokio::task::spawn_local(bus.forward_remote());
    let manager = Manager::new(settings.clone(), db, reactor.clone(), bus).into_shared();
    manager.borrow_mut().start().context("starting manager")?;
    // Without peers there is nothing to catch up with.
    manager.borrow_mut().set_synced(true);

    // ── Producers ─────────────────────────────────────────────────────────────
    let poa_producer = match &args.poa_key {
        Some(path) => {
            let keypair = PoaKeyPair::load(path)
                .with_context(|| format!("loading PoA key {}", path.display()))?;
            let producer = PoaBlockProducer::new(manager.clone(), keypair).context("configuring PoA signer")?;
            producer.start();
            Some(producer)
        }
        None => None,
    };

    let miner = if args.mine {
        if settings.is_poa() {
            bail!("--mine is not available on a PoA network");
        }
        let script = hex::decode(&args.reward_script).context("decoding --reward-script")?;
        let miner = Rc::new(PowMiner::new(manager.clone(), script, 1 << 20));
        miner.start(Duration::from_secs(args.mine_interval.max(1)));
        Some(miner)
    } else {
        None
    };

    info!("node ready");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutting down");

    if let Some(producer) = &poa_producer {
        producer.stop();
    }
    if let Some(miner) = &miner {
        miner.stop();
    }
    reactor.shutdown();
    manager.borrow_mut().stop().context("stopping manager")?;
    Ok(())
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    if let Some(path) = &args.settings {
        return Settings::load_json(path).with_context(|| format!("loading settings from {}", path.display()));
    }
    match args.network.as_str() {
        "mainnet" => Ok(Settings::mainnet()),
        "unittests" => Ok(Settings::unittests()),
        other => bail!("unknown network preset {other:?}"),
    }
}

fn log_event(event: &Event) {
    match event {
        Event::Accepted { vertex } => debug!(hash = %vertex.hash().short(), "vertex accepted"),
        Event::Voided { vertex, voided_by } => {
            debug!(hash = %vertex.short(), reasons = voided_by.len(), "vertex voided")
        }
        Event::Unvoided { vertex } => debug!(hash = %vertex.short(), "vertex unvoided"),
        Event::ReorgStarted {
            old_best_block,
            new_best_block,
            common_block,
        } => info!(
            old = %old_best_block.short(),
            new = %new_best_block.short(),
            common = %common_block.short(),
            "reorg started"
        ),
        Event::ReorgFinished { reorg_size } => info!(reorg_size, "reorg finished"),
        Event::ManagerStart | Event::ManagerStop => debug!(kind = ?event.kind(), "manager lifecycle"),
    }
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
