use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use refetch::cache::{select_backend, FileKvStore, KvStore, MemoryKvStore, TimedCache};
use refetch::config::{CacheConfig, Config};
use refetch::files::FileStore;
use refetch::host::{Clock, HostContext, SystemClock};
use refetch::http::ReqwestTransport;
use refetch::last_requested::LastRequestedStorage;
use refetch::logger::{LoggerIdentity, Severity};
use refetch::probe::HttpProbe;
use refetch::{Component, Delivery, FetchError, LifecycleObserver};

#[derive(Parser, Debug)]
#[command(name = "refetch")]
#[command(about = "Keep a remote resource fresh through a local cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/refetch/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch a url on a timer and print every delivery
  Watch {
    url: String,

    /// Request header as `Name: value`, repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
  },
  /// Get a file through the file store
  Get {
    url: String,

    /// Write the file here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Serve a cached copy without checking its etag
    #[arg(long)]
    no_check: bool,
  },
  /// Remove expired entries from a cache namespace
  Sweep {
    /// Namespace to sweep (default: the configured cache namespace)
    #[arg(short, long)]
    namespace: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.storage.data_dir()?;
  let _guard = init_tracing(&config, &data_dir);

  let clock: Arc<dyn Clock> = Arc::new(SystemClock);
  let host = HostContext::new(clock.clone(), Arc::new(HttpProbe::new(&config.probe))).with_preview(config.preview);
  let transport = Arc::new(ReqwestTransport::new(clock));

  match args.command {
    Command::Watch { url, headers } => {
      let headers = headers.iter().map(|h| parse_header(h)).collect::<Result<Vec<_>>>()?;
      watch(&config, &data_dir, host, transport, &url, headers).await
    }
    Command::Get { url, output, no_check } => get(&config, &data_dir, host, transport, &url, output, no_check).await,
    Command::Sweep { namespace } => sweep(&config, &data_dir, host, namespace),
  }
}

/// Console output plus a daily rolling file. The returned guard flushes the
/// file writer on drop.
fn init_tracing(config: &Config, data_dir: &Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
  use tracing_subscriber::prelude::*;
  use tracing_subscriber::EnvFilter;

  let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
  let console = tracing_subscriber::fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .with_filter(console_filter);

  let (file, guard) = if config.log.file {
    let appender = tracing_appender::rolling::daily(data_dir.join("logs"), "refetch.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = tracing_subscriber::fmt::layer()
      .with_writer(writer)
      .with_ansi(false)
      .with_filter(EnvFilter::new("refetch=debug,info"));
    (Some(layer), Some(guard))
  } else {
    (None, None)
  };

  tracing_subscriber::registry().with(console).with(file).init();

  guard
}

fn parse_header(raw: &str) -> Result<(String, String)> {
  let (name, value) = raw
    .split_once(':')
    .ok_or_else(|| eyre!("Invalid header '{}': expected 'Name: value'", raw))?;

  Ok((name.trim().to_string(), value.trim().to_string()))
}

/// Prints what the component delivers.
struct Printer;

impl LifecycleObserver for Printer {
  fn on_data(&self, delivery: &Delivery) {
    let response = &delivery.response;
    println!(
      "{} {} cached={} offline={} bytes={}",
      response.status,
      response.url,
      delivery.is_cached,
      delivery.is_offline.map(|o| o.to_string()).unwrap_or_else(|| "-".to_string()),
      response.body.len()
    );
  }

  fn on_error(&self, error: &FetchError) {
    eprintln!("error: {}", error);
  }
}

async fn watch(
  config: &Config,
  data_dir: &Path,
  host: HostContext,
  transport: Arc<ReqwestTransport>,
  url: &str,
  headers: Vec<(String, String)>,
) -> Result<()> {
  let identity = LoggerIdentity {
    name: "refetch-watch".to_string(),
    id: "watch".to_string(),
    ..LoggerIdentity::default()
  };
  let mut component = Component::new(identity, config.cache.clone(), config.fetch.clone(), transport, host);
  component.observe(Arc::new(Printer));

  let backend = select_backend(config.storage.backend, data_dir, &config.cache.namespace, component.logger());
  component.init(backend);
  component.start();
  component.fetch(url, headers);

  tokio::signal::ctrl_c()
    .await
    .map_err(|e| eyre!("Failed to listen for ctrl-c: {}", e))?;

  component.teardown();
  Ok(())
}

async fn get(
  config: &Config,
  data_dir: &Path,
  host: HostContext,
  transport: Arc<ReqwestTransport>,
  url: &str,
  output: Option<PathBuf>,
  no_check: bool,
) -> Result<()> {
  let logger = host.logger(LoggerIdentity {
    name: "store-files".to_string(),
    id: "get".to_string(),
    ..LoggerIdentity::default()
  });

  let namespace = &config.files.cache.namespace;
  let backend = select_backend(config.storage.backend, data_dir, namespace, &logger);
  let cache = TimedCache::open(config.files.cache.clone(), backend, host.clock.clone(), logger.clone());

  let kv: Arc<dyn KvStore> = match FileKvStore::open(&data_dir.join("kv")) {
    Ok(store) => Arc::new(store),
    Err(e) => {
      logger.log(
        Severity::Warning,
        "file storage unavailable, file checks won't persist",
        None,
        Some(json!({ "error": format!("{:#}", e) })),
      );
      Arc::new(MemoryKvStore::new())
    }
  };

  let store = FileStore::new(
    config.files.clone(),
    cache,
    LastRequestedStorage::new(kv, logger.clone()),
    transport,
    host.clock.clone(),
    logger,
  );

  let Some(file) = store.get_file(url, no_check).await? else {
    return Err(eyre!("File {} was deleted from storage", url));
  };

  match output {
    Some(path) => std::fs::write(&path, &file.body)
      .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?,
    None => std::io::stdout()
      .write_all(&file.body)
      .map_err(|e| eyre!("Failed to write to stdout: {}", e))?,
  }

  Ok(())
}

fn sweep(config: &Config, data_dir: &Path, host: HostContext, namespace: Option<String>) -> Result<()> {
  let logger = host.logger(LoggerIdentity::default());
  let namespace = namespace.unwrap_or_else(|| config.cache.namespace.clone());

  let backend = select_backend(config.storage.backend, data_dir, &namespace, &logger)
    .ok_or_else(|| eyre!("No cache backend available for namespace '{}'", namespace))?;

  // Preserve on open so the sweep below is the one that counts.
  let cache = TimedCache::open(
    CacheConfig {
      namespace,
      preserve_expired: true,
      ..config.cache.clone()
    },
    Some(backend),
    host.clock.clone(),
    logger,
  );

  let removed = cache.sweep_expired();
  println!("removed {} expired entries from '{}'", removed, cache.namespace());

  Ok(())
}
