mod config;
mod logging;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tagq::error::EndpointKind;
use tagq::{CacheError, CacheStore, Dispatcher, HttpTransport, QuerySubscription};
use tracing::info;

/// How long `mutate --watch` waits for the watched query to refresh.
const WATCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "tagq")]
#[command(about = "Query a REST API through a tag-invalidated cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tagq/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Debug logging for the cache
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List registered query and mutation endpoints
  Endpoints,
  /// Run a query and print its value
  Query {
    endpoint: String,
    /// Arguments as a JSON object
    #[arg(default_value = "{}")]
    args: String,
  },
  /// Run a mutation and print its result
  Mutate {
    endpoint: String,
    /// Arguments as a JSON object
    #[arg(default_value = "{}")]
    args: String,
    /// Subscribe to a query first and print it again once the mutation has
    /// been applied
    #[arg(long, num_args = 2, value_names = ["ENDPOINT", "ARGS"])]
    watch: Option<Vec<String>>,
  },
}

fn parse_args(raw: &str) -> Result<Value> {
  serde_json::from_str(raw).map_err(|e| eyre!("Arguments must be JSON: {}", e))
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn print_subscription(sub: &QuerySubscription) -> Result<()> {
  let snapshot = sub.snapshot();
  if let Some(error) = &snapshot.error {
    eprintln!("Error: {}", error);
  }
  match snapshot.value {
    Some(value) => print_json(&value),
    None => Err(eyre!("{} returned no data", sub.key().endpoint())),
  }
}

/// Wait until `sub` holds a fresh value, or give up after `WATCH_TIMEOUT`.
async fn wait_fresh(sub: &mut QuerySubscription) -> Result<()> {
  let endpoint = sub.key().endpoint().to_string();
  let fresh = async {
    loop {
      let snapshot = sub.snapshot();
      if !snapshot.stale && !snapshot.is_loading() {
        return Ok::<(), CacheError>(());
      }
      sub.changed().await?;
    }
  };
  match tokio::time::timeout(WATCH_TIMEOUT, fresh).await {
    Ok(result) => Ok(result?),
    Err(_) => Err(eyre!("Timed out waiting for {} to refresh", endpoint)),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log, args.verbose)?;

  let api_key = config::Config::get_api_key();
  let transport = HttpTransport::new(
    &config.api.url,
    api_key
      .as_deref()
      .map(|key| (config.api.api_key_header.as_str(), key)),
  )?;
  let cache = Dispatcher::new(
    Arc::new(CacheStore::new()),
    tagq::api::registry(),
    Arc::new(transport),
    config.cache.clone(),
  );

  let result = run(&cache, args.command).await;
  cache.shutdown();
  result
}

async fn run(cache: &Dispatcher, command: Command) -> Result<()> {
  match command {
    Command::Endpoints => {
      for kind in [EndpointKind::Query, EndpointKind::Mutation] {
        for name in cache.registry().names(kind) {
          println!("{:<10} {}", kind, name);
        }
      }
      Ok(())
    }
    Command::Query { endpoint, args } => {
      let sub = cache.query(&endpoint, parse_args(&args)?).await?;
      print_subscription(&sub)
    }
    Command::Mutate {
      endpoint,
      args,
      watch,
    } => {
      let mut watched = match watch.as_deref() {
        Some([watch_endpoint, watch_args]) => {
          let sub = cache.query(watch_endpoint, parse_args(watch_args)?).await?;
          print_subscription(&sub)?;
          Some(sub)
        }
        _ => None,
      };

      let handle = cache.mutate(&endpoint, parse_args(&args)?);
      let value = handle.await?;
      info!(endpoint = %endpoint, "Mutation applied");
      print_json(&value)?;

      if let Some(sub) = watched.as_mut() {
        wait_fresh(sub).await?;
        print_subscription(sub)?;
      }
      Ok(())
    }
  }
}
