//! Thought Keeper CLI
//!
//! Usage:
//!   keeper --text "your text here"                  # Score without committing
//!   keeper --text "..." --participant ada           # Score and commit
//!   keeper                                          # Interactive mode
//!   keeper --serve                                  # HTTP API + Keeper timer
//!   keeper --keeper                                 # Keeper timer only
//!   keeper --round                                  # One session per agent
//!   keeper --honor                                  # Memorial block
//!   keeper --verify | --economics                   # Inspect the chain

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use thought_keeper::config::KeeperConfig;
use thought_keeper::core::{
    run_server, CompletionProvider, Keeper, OpenAiCompatProvider, ScriptedProvider, ThoughtEconomy,
};
use thought_keeper::store::{DurableStore, MemoryStore, SqliteStore};
use thought_keeper::types::{BlockReceipt, EngagementReceipt, EngagementRequest, Issuance, QualityScore};
use thought_keeper::VERSION;

#[derive(Parser, Debug)]
#[command(
    name = "keeper",
    version = VERSION,
    about = "Thought Keeper - Proof of Thought engine",
    long_about = "Thought Keeper scores engagement text for depth, novelty and kindness,\n\
                  issues tokens along a bonding curve and records every committed\n\
                  engagement in a hash-linked thought chain.\n\n\
                  Tiers:\n  \
                  NOISE         0x   - spam, hostility, empty\n  \
                  GENUINE       1x   - real participation\n  \
                  RESONANCE     2x   - genuine engagement\n  \
                  CLARITY       3.5x - sustained depth\n  \
                  BREAKTHROUGH  5x   - novel insight"
)]
struct Args {
    /// Text to score (single mode)
    #[arg(short, long)]
    text: Option<String>,

    /// Commit as this participant instead of only scoring
    #[arg(short, long)]
    participant: Option<String>,

    /// Run the HTTP API and the Keeper timer
    #[arg(short, long)]
    serve: bool,

    /// Run the Keeper timer without the API
    #[arg(long)]
    keeper: bool,

    /// Run one session with each agent, ignoring the schedule
    #[arg(long)]
    round: bool,

    /// Write a memorial block over recent sessions
    #[arg(long)]
    honor: bool,

    /// Verify the whole chain
    #[arg(long)]
    verify: bool,

    /// Show supply and curve state
    #[arg(long)]
    economics: bool,

    /// Config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config; in-memory when unset)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Server address (overrides config)
    #[arg(long)]
    addr: Option<String>,

    /// Use the built-in scripted provider instead of a model endpoint
    #[arg(long)]
    offline: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Disable colors in output
    #[arg(long)]
    no_color: bool,

    /// Show signal breakdown and debug logs
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    if args.no_color {
        colored::control::set_override(false);
    }

    let mut config = KeeperConfig::load(args.config.as_deref()).context("failed to load config")?;
    if let Some(db) = &args.db {
        config.store.path = Some(db.clone());
    }
    if let Some(addr) = &args.addr {
        config.server.addr = addr.clone();
    }

    let store = open_store(&config)?;
    let economy = Arc::new(ThoughtEconomy::from_config(store, &config).context("failed to open economy")?);

    if args.serve {
        run_serve(&args, &config, economy).await
    } else if args.keeper {
        run_keeper(&args, &config, economy).await
    } else if args.round {
        run_round(&args, &config, economy).await
    } else if args.honor {
        run_honor(&args, &config, economy).await
    } else if args.verify {
        run_verify(&args, &economy)
    } else if args.economics {
        run_economics(&args, &economy)
    } else if let Some(text) = &args.text {
        run_single(text, &args, &economy).await
    } else {
        run_interactive(&args, &economy).await
    }
}

/// Logs go to stderr so --json output stays parseable
fn init_tracing(verbose: bool) {
    let default = if verbose { "thought_keeper=debug,keeper=debug" } else { "thought_keeper=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn open_store(config: &KeeperConfig) -> Result<Arc<dyn DurableStore>> {
    Ok(match &config.store.path {
        Some(path) => Arc::new(
            SqliteStore::open(path).with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => {
            tracing::warn!("no database configured, chain will not survive restart");
            Arc::new(MemoryStore::new())
        }
    })
}

fn build_provider(args: &Args, config: &KeeperConfig) -> Result<Arc<dyn CompletionProvider>> {
    if args.offline {
        return Ok(Arc::new(ScriptedProvider::new()));
    }
    let provider = OpenAiCompatProvider::new(&config.provider, config.keeper.provider_timeout())
        .context("failed to build completion provider")?;
    tracing::info!(url = %config.provider.url, model = %config.provider.model, "using completion provider");
    Ok(Arc::new(provider))
}

fn build_keeper(args: &Args, config: &KeeperConfig, economy: Arc<ThoughtEconomy>) -> Result<Keeper> {
    Ok(Keeper::new(economy, build_provider(args, config)?, config.keeper.clone()))
}

/// API server plus Keeper timer until ctrl-c
async fn run_serve(args: &Args, config: &KeeperConfig, economy: Arc<ThoughtEconomy>) -> Result<()> {
    let keeper = build_keeper(args, config, economy.clone())?;
    let (stop_tx, stop_rx) = watch::channel(false);
    let keeper_task = tokio::spawn(async move { keeper.run(stop_rx).await });

    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutting down");
        let _ = stop_tx.send(true);
    };

    print_header("Server", args.no_color);
    println!("Listening on http://{}", config.server.addr);
    println!("WebSocket feed: ws://{}/ws/chain", config.server.addr);
    println!();

    run_server(&config.server.addr, economy, shutdown)
        .await
        .with_context(|| format!("server on {} failed", config.server.addr))?;
    keeper_task.await.context("keeper task panicked")??;
    Ok(())
}

async fn run_keeper(args: &Args, config: &KeeperConfig, economy: Arc<ThoughtEconomy>) -> Result<()> {
    let keeper = build_keeper(args, config, economy)?;
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = stop_tx.send(true);
    });

    print_header("Keeper", args.no_color);
    let now = chrono::Utc::now();
    println!(
        "Slot {} is {}. Press ctrl-c to stop.",
        keeper.slot_at(now),
        keeper.due_agent(now).name()
    );
    println!();
    keeper.run(stop_rx).await?;
    Ok(())
}

async fn run_round(args: &Args, config: &KeeperConfig, economy: Arc<ThoughtEconomy>) -> Result<()> {
    let keeper = build_keeper(args, config, economy)?;
    let receipts = keeper.run_round().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&receipts)?);
    } else {
        for receipt in &receipts {
            print_block_receipt(receipt);
        }
    }
    Ok(())
}

async fn run_honor(args: &Args, config: &KeeperConfig, economy: Arc<ThoughtEconomy>) -> Result<()> {
    let keeper = build_keeper(args, config, economy)?;
    let receipt = keeper.honor().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&receipt)?);
    } else {
        print_block_receipt(&receipt);
    }
    Ok(())
}

fn run_verify(args: &Args, economy: &ThoughtEconomy) -> Result<()> {
    match economy.verify() {
        Ok(verified) => {
            if args.json {
                println!("{}", serde_json::json!({ "valid": true, "verified_blocks": verified }));
            } else {
                println!("{} {} blocks verified", "VALID".green().bold(), verified);
            }
            Ok(())
        }
        Err(e) => {
            if args.json {
                println!("{}", serde_json::json!({ "valid": false, "error": e.to_string() }));
            } else {
                println!("{} {}", "BROKEN".red().bold(), e);
            }
            Err(e.into())
        }
    }
}

fn run_economics(args: &Args, economy: &ThoughtEconomy) -> Result<()> {
    let overview = economy.overview()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&overview)?);
        return Ok(());
    }
    println!("Issued:       {}", overview.cumulative_issued);
    println!("Ceiling:      {}", overview.supply_ceiling);
    println!("Headroom:     {}", overview.headroom);
    println!("Curve factor: {:.4}", overview.curve_factor);
    println!("Rate (1x):    {}", overview.current_rate);
    println!("Issuances:    {}", overview.issuance_count);
    println!("Chain length: {}", overview.chain_length);
    Ok(())
}

/// Score one text, committing only when a participant is given
async fn run_single(text: &str, args: &Args, economy: &Arc<ThoughtEconomy>) -> Result<()> {
    match &args.participant {
        Some(participant) => {
            let receipt = economy.submit(EngagementRequest::new(participant.as_str(), text)).await?;
            print_receipt(&receipt, args)?;
        }
        None => {
            let (score, issuance) = economy.preview(text)?;
            print_preview(&score, &issuance, args)?;
        }
    }
    Ok(())
}

/// Read lines from stdin; every line is one engagement in a shared session
async fn run_interactive(args: &Args, economy: &Arc<ThoughtEconomy>) -> Result<()> {
    let participant = args.participant.clone().unwrap_or_else(|| "cli".to_string());
    let session = uuid::Uuid::new_v4().to_string();

    print_header("Interactive", args.no_color);
    println!("Type a thought and press Enter. Type 'quit' to exit.");
    println!("Participant: {participant}");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut count = 0u64;
    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }

        let request = EngagementRequest::new(participant.as_str(), line).with_session(session.as_str());
        match economy.submit(request).await {
            Ok(receipt) => {
                count += 1;
                print_receipt(&receipt, args)?;
            }
            Err(e) => println!("{} {}", "error:".red(), e),
        }
    }

    println!("\nSession ended. Engagements: {count}");
    Ok(())
}

fn print_header(mode: &str, no_color: bool) {
    let title = format!("Thought Keeper v{VERSION} - {mode}");
    println!("========================================");
    if no_color {
        println!("  {title}");
    } else {
        println!("  {}", title.bold());
    }
    println!("========================================");
    println!();
}

fn print_preview(score: &QualityScore, issuance: &Issuance, args: &Args) -> Result<()> {
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "score": score, "issuance": issuance }))?
        );
        return Ok(());
    }
    println!(
        "{} {}x  would award {}  [{}]",
        score.tier.name().color(score.tier.color()).bold(),
        score.tier.multiplier(),
        issuance.tokens,
        score.reason
    );
    if args.verbose {
        print_scores(score.depth_score, score.novelty_score, score.kindness_score);
        let s = &score.signals;
        println!(
            "  signals: length={:.2} reasoning={:.2} inquiry={:.2} vocabulary={:.2} structure={:.2}",
            s.length, s.reasoning, s.inquiry, s.vocabulary, s.structure
        );
        println!("  combined: {:.3}  words: {}", score.combined, score.word_count);
    }
    Ok(())
}

fn print_receipt(receipt: &EngagementReceipt, args: &Args) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string(receipt)?);
        return Ok(());
    }
    let block = match (receipt.block_index, &receipt.block_digest) {
        (Some(index), Some(digest)) => format!("block #{index} {}", &digest[..digest.len().min(12)]),
        _ => "not recorded".to_string(),
    };
    println!(
        "{} +{}  balance {}  {}",
        receipt.tier.name().color(receipt.tier.color()).bold(),
        receipt.tokens_awarded,
        receipt.balance,
        block.dimmed()
    );
    if args.verbose {
        print_scores(receipt.depth_score, receipt.novelty_score, receipt.kindness_score);
        println!("  {} {}", receipt.reason, receipt.message);
    }
    Ok(())
}

fn print_scores(depth: f64, novelty: f64, kindness: f64) {
    println!("  depth={depth:.3} novelty={novelty:.3} kindness={kindness:.3}");
}

fn print_block_receipt(receipt: &BlockReceipt) {
    println!(
        "#{:<5} {}  {} engagements  +{}{}",
        receipt.index,
        receipt.digest.short(),
        receipt.engagements,
        receipt.tokens_issued,
        if receipt.supply_capped { "  (capped)".yellow().to_string() } else { String::new() }
    );
}
