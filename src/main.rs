//! Chess Escrow Server
//!
//! Serves the escrow ledger over WebSocket. `--demo` instead runs a scripted
//! settlement against an in-memory ledger and logs every receipt.

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use chess_escrow::{
    VERSION,
    core::amount::{format_units, units},
    escrow::{self, CreateMatch, EscrowConfig, Ledger, Receipt},
    network::{bootstrap_authority, load_genesis, AuthConfig, EscrowServer, ServerConfig},
    Identity,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Chess Escrow Server v{}", VERSION);

    let escrow_config = EscrowConfig::from_env().context("reading escrow config")?;
    escrow_config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid escrow config: {}", e))?;

    if std::env::args().any(|arg| arg == "--demo") {
        return demo_settlement(&escrow_config);
    }

    let server_config = ServerConfig::from_env()?;
    let auth_config = AuthConfig::from_env().context("reading auth config")?;
    if !auth_config.is_configured() {
        warn!("No AUTH_SECRET set; every auth request will fail");
    }

    let mut ledger = match &server_config.genesis_path {
        Some(path) => load_genesis(path).with_context(|| format!("loading genesis {}", path.display()))?,
        None => Ledger::new(),
    };
    match bootstrap_authority(&mut ledger, &auth_config)? {
        Some(receipt) => log_receipt("init_config", &receipt),
        None if auth_config.authority.is_none() => {
            warn!("No ESCROW_AUTHORITY set; the escrow cannot be initialized or settled");
        }
        None => {}
    }

    let server = EscrowServer::new(server_config, escrow_config, auth_config, ledger);
    server.run().await?;
    Ok(())
}

fn log_receipt(label: &str, receipt: &Receipt) {
    let names: Vec<&str> = receipt.events.iter().map(|e| e.name()).collect();
    info!(
        "#{} {}: [{}] root {}",
        receipt.sequence,
        label,
        names.join(", "),
        hex::encode(&receipt.state_hash[..8])
    );
}

/// Demo: every settlement path against an in-memory ledger.
fn demo_settlement(config: &EscrowConfig) -> Result<()> {
    info!("=== Starting Demo Settlement ===");

    let authority = Identity::from_subject("demo-authority");
    let alice = Identity::from_subject("alice");
    let bob = Identity::from_subject("bob");
    let players = [("authority", authority), ("alice", alice), ("bob", bob)];

    let mut ledger = Ledger::with_balances([(authority, 0), (alice, units(10)), (bob, units(10))]);
    let genesis_total = ledger.total_lamports();
    let now = chrono::Utc::now().timestamp();

    log_receipt("init_config", &escrow::init_config(&mut ledger, authority)?);

    let params = |seed: u64, code: &str| CreateMatch {
        seed,
        code: code.to_string(),
        match_duration: 600,
        bet_amount: units(1),
    };

    // Decisive result
    let (game, receipt) = escrow::create_match(&mut ledger, config, alice, params(1, "win"), now)?;
    info!("Match address: {}", game);
    log_receipt("create_match", &receipt);
    log_receipt("join_match", &escrow::join_match(&mut ledger, bob, game, "win")?);
    let (settlement, receipt) = escrow::resolve_match(&mut ledger, config, authority, game, "win", Some(alice))?;
    log_receipt("resolve_match (alice wins)", &receipt);
    info!("Winner paid {}, fee {}", format_units(settlement.paid_to(&alice)), format_units(settlement.fee));

    // Draw
    let (game, receipt) = escrow::create_match(&mut ledger, config, bob, params(2, "draw"), now)?;
    log_receipt("create_match", &receipt);
    log_receipt("join_match", &escrow::join_match(&mut ledger, alice, game, "draw")?);
    let (settlement, receipt) = escrow::resolve_match(&mut ledger, config, authority, game, "draw", None)?;
    log_receipt("resolve_match (draw)", &receipt);
    info!("Each player refunded {}, fee {}", format_units(settlement.paid_to(&bob)), format_units(settlement.fee));

    // Cancel before anyone joins
    let (game, receipt) = escrow::create_match(&mut ledger, config, alice, params(3, "solo"), now)?;
    log_receipt("create_match", &receipt);
    let (_, receipt) = escrow::cancel_match(&mut ledger, config, alice, game, "solo")?;
    log_receipt("cancel_match (waiting)", &receipt);

    // Cancel after both deposited
    let (game, receipt) = escrow::create_match(&mut ledger, config, bob, params(4, "abort"), now)?;
    log_receipt("create_match", &receipt);
    log_receipt("join_match", &escrow::join_match(&mut ledger, alice, game, "abort")?);
    let (settlement, receipt) = escrow::cancel_match(&mut ledger, config, alice, game, "abort")?;
    log_receipt("cancel_match (in progress)", &receipt);
    info!("Cancellation penalty {}", format_units(settlement.fee));

    let (withdrawn, receipt) = escrow::withdraw_from_treasury(&mut ledger, config, authority)?;
    log_receipt("withdraw_from_treasury", &receipt);
    info!("Authority withdrew {}", format_units(withdrawn));

    // Print final results
    info!("=== Final Balances ===");
    for (name, identity) in players {
        info!("{}: {}", name, format_units(ledger.balance(&identity)));
    }
    if let Some(treasury) = ledger.treasury() {
        info!(
            "treasury: {} (reserve {})",
            format_units(treasury.balance),
            format_units(config.rent.treasury_reserve())
        );
    }

    info!("Final State Root: {}", hex::encode(ledger.compute_hash()));
    info!("Journal Head: {}", hex::encode(ledger.journal().head_hash()));

    anyhow::ensure!(ledger.total_lamports() == genesis_total, "lamports not conserved");
    anyhow::ensure!(ledger.journal().verify().is_ok(), "journal chain broken");
    info!("CONSERVATION VERIFIED: {} lamports in, {} out", genesis_total, ledger.total_lamports());
    Ok(())
}
