mod cache;
mod config;
mod connectivity;
mod db;
mod error;
mod interceptor;
mod logging;
mod net;
mod queue;
mod reconcile;
mod store;
mod upload;

use chrono::Local;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use cache::AssetCache;
use config::Config;
use connectivity::{spawn_probe, ConnectivityMonitor, HttpProbe, Probe};
use db::Database;
use interceptor::Interceptor;
use net::{HttpNetwork, Request, RequestMode};
use queue::PendingQueue;
use reconcile::SyncWorker;
use store::{MemoryStore, RecordId, RecordStore, SqliteStore};
use upload::{HttpUploader, Uploader};

#[derive(Parser, Debug)]
#[command(name = "kali-sync")]
#[command(about = "Offline queue and app-shell cache for KaLI field work")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/kali-sync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Keep everything in memory for this run only
  #[arg(long, global = true)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Queue a record for upload
  Enqueue {
    /// Record kind, e.g. visit_report
    #[arg(short, long)]
    kind: String,
    /// Record payload as JSON
    #[arg(short, long)]
    payload: String,
  },
  /// Queue a field visit report
  Visit {
    #[arg(long)]
    farmer: String,
    #[arg(long)]
    crop: String,
    #[arg(long, default_value = "")]
    notes: String,
  },
  /// Show queued records, oldest first
  List,
  /// Drop a queued record
  Remove { id: i64 },
  /// Upload every queued record now
  Sync,
  /// Fetch the app shell and activate it as the current cache generation
  Warm,
  /// Serve one request the way the app would see it
  Fetch {
    /// Path under the origin or an absolute URL
    target: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// navigate, same-origin, cors or no-cors
    #[arg(long, default_value = "same-origin")]
    mode: RequestMode,
  },
  /// Show connectivity, queue size and cache generation
  Status,
  /// Track connectivity and sync whenever it comes back
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  if args.ephemeral {
    let db = Database::open_in_memory()?;
    let queue = build_queue(MemoryStore::new(), &config);
    run(args.command, &config, queue, db).await
  } else {
    let path = config.database_path()?;
    let db = Database::open(&path).map_err(|e| {
      if e.is_storage() {
        eyre!("{}\nOffline store: {}", e, path.display())
      } else {
        eyre!(e)
      }
    })?;
    let queue = build_queue(SqliteStore::new(db.clone()), &config);
    run(args.command, &config, queue, db).await
  }
}

fn build_queue<S: RecordStore>(store: S, config: &Config) -> PendingQueue<S> {
  PendingQueue::new(store)
    .with_upload_timeout(config.upload_timeout())
    .with_policy(config.upload.policy)
}

fn build_uploader(config: &Config) -> Result<HttpUploader> {
  Ok(HttpUploader::new(
    config.upload_endpoint()?,
    config.upload_timeout(),
    Config::get_upload_token(),
  )?)
}

async fn run<S: RecordStore>(
  command: Command,
  config: &Config,
  queue: PendingQueue<S>,
  db: Database,
) -> Result<()> {
  let cache = AssetCache::new(db.clone(), &config.cache.name, config.cache.version);

  match command {
    Command::Enqueue { kind, payload } => {
      let payload: Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Payload is not valid JSON: {}", e))?;
      let id = queue.enqueue(&kind, payload).await?;
      println!("queued record {}", id);
    }
    Command::Visit {
      farmer,
      crop,
      notes,
    } => {
      let payload = json!({
        "farmer": farmer,
        "crop": crop,
        "notes": notes,
        "visited_at": Local::now().to_rfc3339(),
      });
      let id = queue.enqueue("visit_report", payload).await?;
      println!("queued visit report {}", id);
    }
    Command::List => {
      let records = queue.list().await?;
      if records.is_empty() {
        println!("No pending uploads");
      }
      for record in &records {
        println!(
          "{:>6}  {}  {:<14}  {}",
          record.id,
          record
            .enqueued_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S"),
          record.kind,
          record.payload
        );
      }
    }
    Command::Remove { id } => {
      queue.remove(RecordId(id)).await?;
      println!("removed record {}", id);
    }
    Command::Sync => {
      let uploader = build_uploader(config)?;
      let uploader = &uploader;
      let report = queue
        .drain(move |record| async move { uploader.upload(&record).await })
        .await?;

      println!(
        "uploaded {}, failed {}, left for later {}",
        report.uploaded.len(),
        report.failed.len(),
        report.skipped
      );
      for record in &report.failed {
        println!("  still queued: {} ({})", record.id, record.kind);
      }
    }
    Command::Warm => {
      let network = HttpNetwork::new(config.fetch_timeout())?;
      let assets = config.asset_urls()?;
      let name = cache.warm(&assets, &network).await?;
      println!("activated {} ({} assets)", name, assets.len());
    }
    Command::Fetch {
      target,
      method,
      mode,
    } => {
      let url = config.resolve(&target)?;
      let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let request = match mode {
        RequestMode::Navigate => Request::navigate(url),
        other => Request::get(url).with_mode(other),
      }
      .with_method(method);

      let network = Arc::new(HttpNetwork::new(config.fetch_timeout())?);
      let interceptor = Interceptor::new(&config.origin()?, cache, network);
      let strategy = interceptor.strategy_for(&request);
      let served = interceptor.handle(&request).await?;

      println!(
        "{} {} -> {} via {:?} ({:?}, {:?})",
        request.method, request.url, served.response.status, served.source, strategy,
        request.destination
      );
      println!(
        "{} bytes, content-type {}",
        served.response.body.len(),
        served.response.header("content-type").unwrap_or("-")
      );
    }
    Command::Status => {
      let probe = HttpProbe::new(config.probe_url()?, config.probe_timeout())?;
      let connectivity = probe.probe().await;
      let pending = queue.pending_count().await?;
      let active = cache.active_generation().await?;

      println!("connectivity:     {}", connectivity);
      println!("pending uploads:  {}", pending);
      println!(
        "cache generation: {} (configured {})",
        active.as_deref().unwrap_or("none"),
        cache.generation_name()
      );
      println!("schema version:   {}", db.schema_version()?);
    }
    Command::Watch => watch(config, queue).await?,
  }

  Ok(())
}

async fn watch<S: RecordStore>(config: &Config, queue: PendingQueue<S>) -> Result<()> {
  let uploader: Arc<dyn Uploader> = Arc::new(build_uploader(config)?);
  let probe = Arc::new(HttpProbe::new(config.probe_url()?, config.probe_timeout())?);

  let monitor = Arc::new(ConnectivityMonitor::new(probe.probe().await));
  monitor.on_change(|state| {
    if !state.is_online() {
      warn!("offline, new records stay queued");
    }
  });
  info!(state = %monitor.current(), "watching connectivity");

  let worker = SyncWorker::spawn(queue, uploader, &monitor);
  if monitor.current().is_online() {
    worker.request_sync();
  }
  let prober = spawn_probe(monitor, probe, config.probe_interval());

  tokio::signal::ctrl_c().await?;
  info!("shutting down");
  prober.abort();
  worker.shutdown().await;

  Ok(())
}
