use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use futures_util::future::join_all;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

use drops_miner::accounts::load_accounts;
use drops_miner::api::GqlClient;
use drops_miner::config::{AppConfig, CONFIG_PATH};
use drops_miner::events::{CommandSender, control_channel, event_channel};
use drops_miner::integrity::{FileIntegrityProvider, IntegrityProvider, IntegrityStore};
use drops_miner::ops::OpRegistry;
use drops_miner::reporter::{self, Tally};
use drops_miner::session::CookieStore;
use drops_miner::types::Command;
use drops_miner::worker::run_account;

#[derive(Parser)]
#[command(name = "drops-miner", about = "Accrue watch time and claim time-based drops for many accounts")]
struct Args {
    /// Account file (`.txt` colon-separated or CSV with header)
    #[arg(long)]
    accounts: PathBuf,

    /// Config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    /// Only run these logins (repeatable)
    #[arg(long)]
    only: Vec<String>,
}

/// Route one stdin control line (`{"login": .., "cmd": .., "value": ..}`) to its worker.
fn dispatch_control(line: &str, controls: &HashMap<String, CommandSender>) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!("Ignoring control line: {e}");
            return;
        }
    };
    let Some(login) = value.get("login").and_then(Value::as_str) else {
        warn!("Ignoring control line without login");
        return;
    };
    let command: Command = match serde_json::from_value(value.clone()) {
        Ok(c) => c,
        Err(e) => {
            warn!("[{login}] Ignoring control line: {e}");
            return;
        }
    };
    match controls.get(login) {
        Some(tx) if tx.send(command) => {}
        Some(_) => warn!("[{login}] Worker already exited"),
        None => warn!("[{login}] Unknown account"),
    }
}

#[tokio::main(flavor = "current_thread")]
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

    // Startup health check
    let ops = Arc::new(OpRegistry::load(&config.paths.ops_path));
    let missing = ops.missing();
    if !missing.is_empty() {
        anyhow::bail!(
            "Missing persisted-query hashes in {}: {}",
            config.paths.ops_path.display(),
            missing.join(", ")
        );
    }
    info!(
        "Loaded {} operation hash(es) from {}",
        ops.len(),
        config.paths.ops_path.display()
    );

    let mut accounts = load_accounts(&args.accounts)?;
    if !args.only.is_empty() {
        accounts.retain(|a| args.only.iter().any(|o| o.eq_ignore_ascii_case(&a.login)));
    }
    if accounts.is_empty() {
        anyhow::bail!("No accounts to run in {}", args.accounts.display());
    }
    info!("Starting {} account worker(s). Press Ctrl+C to stop.", accounts.len());

    let cookies = CookieStore::new(&config.paths.cookies_dir);
    let integrity_store = IntegrityStore::new(&config.paths.integrity_dir);
    let provider: Arc<dyn IntegrityProvider> =
        Arc::new(FileIntegrityProvider::new(integrity_store.clone()));
    let (sink, mut stream) = event_channel();
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut controls = HashMap::new();
    let mut handles = Vec::new();

    for account in accounts {
        let (tx, queue) = control_channel();
        controls.insert(account.login.clone(), tx);

        let events = sink.for_account(&account.login);
        let cookies = cookies.clone();
        let worker_config = config.worker.clone();
        let client_config = config.client.clone();
        let ops = ops.clone();
        let provider = provider.clone();
        let store = integrity_store.clone();
        let stop = stop_rx.clone();
        let integrity = account
            .integrity()
            .or_else(|| integrity_store.load(&account.login));

        handles.push(tokio::spawn(async move {
            let login = account.login.clone();
            let connect = move |token: String| -> drops_miner::error::Result<GqlClient> {
                Ok(GqlClient::new(&account.login, token, client_config, ops)
                    .with_proxy(account.proxy())
                    .with_integrity(integrity)
                    .with_refresh(provider, Some(store)))
            };
            run_account(&login, &cookies, connect, &worker_config, events, queue, stop).await
        }));
    }
    drop(sink);

    let mut tally = Tally::default();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut stopping = false;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            event = stream.recv() => {
                let Some(event) = event else { break };
                tally.observe(&event);
                reporter::report_event(&event);
            }
            _ = &mut ctrl_c, if !stopping => {
                info!("Shutdown signal received");
                stopping = true;
                stop_tx.send_replace(true);
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => dispatch_control(&line, &controls),
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Control input closed: {e}");
                    stdin_open = false;
                }
            },
        }
    }

    for result in join_all(handles).await {
        match result {
            Ok(snapshot) => info!(
                "[{}] {} claim(s), {} error(s)",
                snapshot.login, snapshot.total_claims, snapshot.total_errors
            ),
            Err(e) => warn!("Worker task failed: {e}"),
        }
    }
    reporter::report_tally(&tally);

    Ok(())
}
