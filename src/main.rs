//! Negation Ledger operator CLI
//!
//! ## Usage
//!
//! ```bash
//! # Create storage dir, default config and database
//! negation-ledger init
//!
//! # Credit an identity and mint a session token for it
//! negation-ledger grant --user did:privy:alice --amount 100
//! TOKEN=$(negation-ledger token --user did:privy:alice)
//!
//! # Create a point backed by 10 cred, then inspect it
//! negation-ledger make-point --token "$TOKEN" --content "..." --cred 10
//! negation-ledger show --point 1 --token "$TOKEN"
//! negation-ledger endorsements --point 1
//!
//! # Use a specific database file
//! negation-ledger --database /data/ledger.db stats
//! ```
//!
//! Results are printed as JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use negation_ledger::services::{spawn_logging_listener, EnrichmentStats};
use negation_ledger::{
    CallerContext, Config, ConnectionOptions, EnrichmentWorker, EventBus, HttpEnricher, Identity,
    JwtIdentityResolver, LedgerDb, LedgerService,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "negation-ledger")]
#[command(about = "Cred ledger for Negation Game points")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, env = "NEGATION_LEDGER_DB")]
    database: Option<PathBuf>,

    /// HS256 secret for session tokens (dev-mode secret when unset)
    #[arg(long, env = "NEGATION_LEDGER_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Endpoint receiving newly committed points for enrichment
    #[arg(long, env = "NEGATION_LEDGER_ENRICHMENT_URL")]
    enrichment_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the storage directory, default config and database
    Init,

    /// Credit cred to an identity
    Grant {
        #[arg(long)]
        user: String,
        #[arg(long)]
        amount: i64,
    },

    /// Mint a session token for an identity
    Token {
        #[arg(long)]
        user: String,
    },

    /// Create a point, optionally endorsing it with cred
    MakePoint {
        /// Session token of the acting identity
        #[arg(long, env = "NEGATION_LEDGER_TOKEN")]
        token: Option<String>,
        #[arg(long)]
        content: String,
        #[arg(long, default_value_t = 0)]
        cred: i64,
    },

    /// Commit cred to an existing point
    Endorse {
        #[arg(long, env = "NEGATION_LEDGER_TOKEN")]
        token: Option<String>,
        #[arg(long)]
        point: i64,
        #[arg(long)]
        cred: i64,
    },

    /// Show a point with its endorsement totals
    Show {
        #[arg(long)]
        point: i64,
        /// Include the viewer's own cred on the point
        #[arg(long, env = "NEGATION_LEDGER_TOKEN")]
        token: Option<String>,
    },

    /// List the newest points of an identity
    List {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Show the endorsement history of a point
    Endorsements {
        #[arg(long)]
        point: i64,
    },

    /// Show the balance of an identity
    Balance {
        #[arg(long)]
        user: String,
    },

    /// Show row counts
    Stats,
}

#[derive(Serialize)]
struct PointCreated {
    point_id: i64,
}

#[derive(Serialize)]
struct Balance<'a> {
    user_id: &'a str,
    cred: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs on stderr, results on stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("negation_ledger=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config, falling back to the one `init` saved in the storage dir
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::discover(args.storage_dir.clone())
            .context("Failed to load config from storage dir")?,
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(path) = args.database {
        config.database_path = Some(path);
    }
    if let Some(secret) = args.jwt_secret {
        config.auth.jwt_secret = secret;
    }
    if let Some(url) = args.enrichment_url {
        config.enrichment.endpoint = Some(url);
    }

    if matches!(args.command, Command::Init) {
        std::fs::create_dir_all(&config.storage_dir)?;
        let config_path = config.config_path();
        if !config_path.exists() {
            config.save(&config_path)?;
            info!(path = %config_path.display(), "Created default config");
        }
    }

    let resolver = Arc::new(JwtIdentityResolver::from_config(&config.auth)?);

    let db = Arc::new(LedgerDb::open(
        &config.database_path(),
        ConnectionOptions {
            busy_timeout: config.busy_timeout(),
            pool_size: config.pool_size,
        },
    )?);

    let events = Arc::new(EventBus::new());
    let listener = spawn_logging_listener(events.clone());

    let mut service = LedgerService::new(db.clone(), resolver.clone(), events.clone());
    let mut worker: Option<JoinHandle<EnrichmentStats>> = None;

    if let Some(ref endpoint) = config.enrichment.endpoint {
        let enricher = HttpEnricher::new(endpoint.clone(), config.enrichment.request_timeout())?;
        let (queue, handle) = EnrichmentWorker::spawn(
            config.enrichment.queue_capacity,
            Arc::new(enricher),
            config.enrichment.retry_policy(),
        );
        info!(endpoint = %endpoint, "Enrichment enabled");
        service = service.with_enrichment(queue);
        worker = Some(handle);
    }

    let caller = |token: Option<String>| match token {
        Some(token) => CallerContext::with_token(token),
        None => CallerContext::anonymous(),
    };

    match args.command {
        Command::Init => print_json(&db.stats()?)?,
        Command::Grant { user, amount } => {
            let cred = service.grant_cred(&Identity::new(user.as_str()), amount)?;
            print_json(&Balance {
                user_id: &user,
                cred,
            })?;
        }
        Command::Token { user } => {
            if user.trim().is_empty() {
                bail!("user must not be empty");
            }
            println!("{}", resolver.issue_token(&Identity::new(user))?);
        }
        Command::MakePoint {
            token,
            content,
            cred,
        } => {
            let point_id = service.make_point(&caller(token), &content, cred)?;
            print_json(&PointCreated { point_id })?;
        }
        Command::Endorse { token, point, cred } => {
            let endorsement = service.endorse(&caller(token), point, cred)?;
            print_json(&endorsement)?;
        }
        Command::Show { point, token } => match service.fetch_point(&caller(token), point)? {
            Some(view) => print_json(&view)?,
            None => bail!("point {} not found", point),
        },
        Command::List { user, limit } => {
            print_json(&service.list_points(&Identity::new(user), limit)?)?
        }
        Command::Endorsements { point } => print_json(&service.point_endorsements(point)?)?,
        Command::Balance { user } => {
            let cred = service.balance_of(&Identity::new(user.as_str()))?;
            print_json(&Balance {
                user_id: &user,
                cred,
            })?;
        }
        Command::Stats => print_json(&db.stats()?)?,
    }

    // Closing the queue and the bus lets both background tasks drain and stop
    drop(service);
    drop(events);

    if let Some(handle) = worker {
        match handle.await {
            Ok(stats) if stats.failed > 0 => {
                warn!(failed = stats.failed, "Some points were not enriched")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Enrichment worker panicked"),
        }
    }
    let _ = listener.await;

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
