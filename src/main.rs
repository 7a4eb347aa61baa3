use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollbooth::config::{StoreKind, TollboothConfig};
use tollbooth::error::TollboothError;
use tollbooth::ratelimit::{now_ms, CounterStore, PersistentRateLimiter, RateLimiterRes};
use tollbooth::store::{MemoryStore, PostgresStore, SqliteStore};

/// Exit status for a consume rejected as over limit.
const OVER_LIMIT_EXIT: u8 = 2;

/// Administer persistent rate limit counters.
#[derive(Debug, Parser)]
#[command(name = "tollbooth", version, about)]
struct Cli {
    /// YAML configuration file; TOLLBOOTH__* variables override it
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Spend points for a key
    Consume {
        key: String,
        #[arg(short, long, default_value_t = 1)]
        points: u32,
    },
    /// Show the current window for a key
    Get { key: String },
    /// Remove the counter for a key
    Delete { key: String },
    /// Deny a key for a number of seconds
    Block {
        key: String,
        #[arg(short, long)]
        secs: u64,
    },
    /// Overwrite the counter for a key
    Set {
        key: String,
        #[arg(short, long)]
        points: u32,
        #[arg(short, long, default_value_t = 0)]
        secs: u64,
    },
    /// Add points without enforcing the limit
    Penalty {
        key: String,
        #[arg(short, long, default_value_t = 1)]
        points: u32,
    },
    /// Give points back
    Reward {
        key: String,
        #[arg(short, long, default_value_t = 1)]
        points: u32,
    },
    /// Remove counters that expired more than an hour ago
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = TollboothConfig::load(cli.config.as_deref())?;
    let mut options = config.limiter.clone();
    // One-shot commands have no use for the background purge.
    options.clear_expired_interval_secs = 0;

    let db = &config.database;
    info!(store = ?db.store_kind()?, "Configuration loaded");

    match db.store_kind()? {
        StoreKind::Postgres => {
            let store = PostgresStore::connect(&db.url, db.max_connections, &options).await?;
            run(PersistentRateLimiter::new(options, store).await?, cli.command).await
        }
        StoreKind::Sqlite => {
            let store = SqliteStore::connect(&db.url, db.max_connections, &options).await?;
            run(PersistentRateLimiter::new(options, store).await?, cli.command).await
        }
        StoreKind::Memory => {
            run(PersistentRateLimiter::new(options, MemoryStore::new()).await?, cli.command).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run<S: CounterStore + 'static>(
    limiter: PersistentRateLimiter<S>,
    command: Command,
) -> anyhow::Result<ExitCode> {
    let limit = limiter.options().points;

    let res = match command {
        Command::Consume { key, points } => match limiter.consume(&key, points).await {
            Err(TollboothError::OverLimit(res)) => {
                warn!(key = %key, "Rate limit exceeded");
                print_result(&res, limit)?;
                return Ok(ExitCode::from(OVER_LIMIT_EXIT));
            }
            other => other?,
        },
        Command::Get { key } => match limiter.get(&key).await? {
            Some(res) => res,
            None => {
                println!("null");
                return Ok(ExitCode::SUCCESS);
            }
        },
        Command::Delete { key } => {
            let removed = limiter.delete(&key).await?;
            println!("{}", serde_json::json!({ "deleted": removed }));
            return Ok(ExitCode::SUCCESS);
        }
        Command::Block { key, secs } => limiter.block(&key, secs).await?,
        Command::Set { key, points, secs } => limiter.set(&key, points, secs).await?,
        Command::Penalty { key, points } => limiter.penalty(&key, points).await?,
        Command::Reward { key, points } => limiter.reward(&key, points).await?,
        Command::Purge => {
            let removed = limiter.clear_expired(now_ms() - 3_600_000).await?;
            println!("{}", serde_json::json!({ "removed": removed }));
            return Ok(ExitCode::SUCCESS);
        }
    };

    print_result(&res, limit)?;
    Ok(ExitCode::SUCCESS)
}

fn print_result(res: &RateLimiterRes, limit: u32) -> anyhow::Result<()> {
    let now = now_ms();
    let reset_at = chrono::DateTime::from_timestamp_millis(now + res.ms_before_next as i64)
        .map(|at| at.to_rfc3339());
    let headers: serde_json::Map<String, serde_json::Value> = res
        .headers(limit, now)
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.into()))
        .collect();

    let mut output = serde_json::to_value(res)?;
    output["resetAt"] = serde_json::json!(reset_at);
    output["headers"] = serde_json::Value::Object(headers);

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
