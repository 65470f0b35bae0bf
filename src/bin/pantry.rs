use clap::{Parser, Subcommand};
use pantry::store::{run_expiration_task, MemoryStore, Store, StoreBackend};
use pantry::{GetOptions, Pantry, PantryConfig, PutOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pantry", about = "Freshness-tiered cache", version)]
struct Args {
  #[arg(short, long, env = "PANTRY_CONFIG")]
  config: Option<String>,
  #[arg(long)]
  log_level: Option<String>,
  /// memory or redis
  #[arg(long, env = "PANTRY_BACKEND")]
  backend: Option<StoreBackend>,
  #[arg(long, env = "PANTRY_REDIS_HOST")]
  redis_host: Option<String>,
  #[arg(long, env = "PANTRY_REDIS_PORT")]
  redis_port: Option<u16>,
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Check the store is reachable
  Ping,
  /// Stock a value, read it fresh, cold and expired
  Demo,
  Put {
    key: String,
    value: String,
    #[arg(long, requires = "use_by_secs")]
    best_by_secs: Option<u64>,
    #[arg(long, requires = "best_by_secs")]
    use_by_secs: Option<u64>,
  },
  Get {
    key: String,
  },
  Remove {
    key: String,
  },
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  let args = Args::parse();

  // Load config: explicit path > auto-detect > defaults
  let mut config = if let Some(path) = &args.config {
    PantryConfig::from_file(path)?
  } else {
    PantryConfig::find_and_load()?.unwrap_or_default()
  };

  // CLI args override config file
  if let Some(level) = args.log_level {
    config.logging.level = level;
  }
  if let Some(backend) = args.backend {
    config.store.backend = backend;
  }
  if let Some(host) = args.redis_host {
    config.store.redis.host = host;
  }
  if let Some(port) = args.redis_port {
    config.store.redis.port = port;
  }

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  let store = open_store(&config).await?;
  let pantry = Pantry::from_config(store, &config)?;

  match args.command {
    Command::Ping => {
      pantry.ping().await?;
      println!("PONG");
    }
    Command::Demo => run_demo(&pantry).await?,
    Command::Put {
      key,
      value,
      best_by_secs,
      use_by_secs,
    } => {
      let mut options = PutOptions::new();
      if let (Some(best_by), Some(use_by)) = (best_by_secs, use_by_secs) {
        options = options.with_durations(Duration::from_secs(best_by), Duration::from_secs(use_by));
      }
      pantry.put(&key, &value, options).await?;
      println!("OK");
    }
    Command::Get { key } => {
      let retrieval = pantry.get(&key, GetOptions::new()).await?;
      match retrieval.value() {
        Some(value) => println!("{} ({:?})", value, retrieval.freshness()),
        None => println!("(not found, {:?})", retrieval.freshness()),
      }
    }
    Command::Remove { key } => {
      pantry.remove(&key).await?;
      println!("OK");
    }
  }

  pantry.close().await?;
  Ok(())
}

async fn open_store(config: &PantryConfig) -> Result<Arc<dyn Store>, anyhow::Error> {
  match config.store.backend {
    StoreBackend::Memory => {
      let store = Arc::new(MemoryStore::new());
      tokio::spawn(run_expiration_task(
        store.clone(),
        config.store.sweep_interval(),
      ));
      Ok(store)
    }
    #[cfg(feature = "redis")]
    StoreBackend::Redis => {
      let store = pantry::store::RedisStore::connect(&config.store.redis).await?;
      Ok(Arc::new(store))
    }
    #[cfg(not(feature = "redis"))]
    StoreBackend::Redis => anyhow::bail!("built without the `redis` feature"),
  }
}

async fn run_demo(pantry: &Pantry) -> Result<(), anyhow::Error> {
  pantry.on_event(|event| println!("  event: {} {}", event.event_type, event.key));

  let options = PutOptions::new().with_durations(Duration::from_secs(1), Duration::from_secs(2));
  pantry.put("food", "Pizza", options).await?;

  for (label, wait) in [("now", 0), ("after 1s", 1), ("after 3s", 2)] {
    tokio::time::sleep(Duration::from_secs(wait)).await;
    let retrieval = pantry.get("food", GetOptions::new()).await?;
    println!(
      "get food {}: {:?} ({:?})",
      label,
      retrieval.value(),
      retrieval.freshness()
    );
    // Let the dispatcher print this round's events
    tokio::time::sleep(Duration::from_millis(50)).await;
  }

  pantry.remove("food").await?;
  Ok(())
}
