//! Probe: raw dashboard, campaign detail and inventory shapes for one login.
//!
//! Dumps each response as returned by the API next to what the extractors
//! make of it, so schema drift shows up side by side.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;

use drops_miner::api::{DropsApi, GqlClient};
use drops_miner::config::{AppConfig, CONFIG_PATH};
use drops_miner::extract::{extract_campaigns, extract_channels, extract_drop_progress};
use drops_miner::integrity::IntegrityStore;
use drops_miner::ops::OpRegistry;
use drops_miner::session::CookieStore;

#[derive(Parser)]
#[command(name = "probe_dashboard", about = "Dump raw drops responses for one account")]
struct Args {
    /// Account login whose cookie bundle to use
    login: String,

    /// Config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Campaign to inspect (defaults to the first discovered)
    #[arg(long)]
    campaign: Option<String>,
}

fn dump(title: &str, value: &Value) -> Result<()> {
    println!("--- {title} ---");
    println!("{}", serde_json::to_string_pretty(value)?);
    println!();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::load_or_default(&args.config)?;
    let ops = Arc::new(OpRegistry::load(&config.paths.ops_path));
    let token = CookieStore::new(&config.paths.cookies_dir)
        .auth_token(&args.login)
        .with_context(|| format!("No auth-token cookie for {}", args.login))?;
    let integrity = IntegrityStore::new(&config.paths.integrity_dir).load(&args.login);

    println!("=== Probe: drops dashboard ===");
    println!("Login: {}", args.login);
    println!("Integrity token: {}", if integrity.is_some() { "present" } else { "absent" });
    println!();

    let mut api = GqlClient::new(&args.login, token, config.client.clone(), ops)
        .with_integrity(integrity);

    // 1. Dashboard
    let start = Instant::now();
    let dashboard = api.viewer_dashboard().await?;
    println!("Dashboard latency: {:?}", start.elapsed());
    dump("ViewerDropsDashboard (raw)", &dashboard)?;
    let campaigns = extract_campaigns(&dashboard);
    println!("Extracted {} campaign(s):", campaigns.len());
    for c in &campaigns {
        println!("  - {} | {} | {} ({} listed channel(s))", c.id, c.name, c.game, c.channels.len());
    }
    println!();

    // 2. Campaign detail
    let campaign_id = args
        .campaign
        .clone()
        .or_else(|| campaigns.first().map(|c| c.id.clone()));
    match campaign_id {
        Some(id) => {
            let start = Instant::now();
            let details = api.campaign_details(&id).await?;
            println!("Campaign detail latency: {:?}", start.elapsed());
            dump(&format!("DropCampaignDetails {id} (raw)"), &details)?;
            let channels = extract_channels(&details);
            println!("Extracted {} channel(s):", channels.len());
            for ch in channels.iter().take(10) {
                println!("  - {} (id={}) viewers={} live={}", ch.login, ch.id, ch.viewers, ch.live);
            }
            println!();
        }
        None => println!("No campaign to inspect\n"),
    }

    // 3. Inventory
    let start = Instant::now();
    let inventory = api.inventory().await?;
    println!("Inventory latency: {:?}", start.elapsed());
    dump("Inventory (raw)", &inventory)?;
    match extract_drop_progress(&inventory, args.campaign.as_deref(), |_| false) {
        Some(drop) => println!(
            "Active drop: {} [{}] {}/{} min ({:.1}%)",
            drop.name,
            drop.drop_instance_id,
            drop.current_minutes,
            drop.required_minutes,
            drop.percent()
        ),
        None => println!("No drop in progress"),
    }

    api.close();
    println!("\n=== Probe complete ===");
    Ok(())
}
