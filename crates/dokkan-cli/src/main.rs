use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use dokkan_client::HttpSources;
use dokkan_core::traits::{CacheStore, NullCache};
use dokkan_core::{
    AggregatorConfig, AppError, Coordinator, DataTypeDef, Refresher, TracingRefreshReporter,
};
use dokkan_store::{FileCacheStore, StoreConfig};

mod output;

use output::OutputFormat;

#[derive(Parser)]
#[command(name = "dokkan", version, about = "Multi-source Dokkan Battle data aggregator")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Path to a JSON config file (built-in source table when omitted)
    #[arg(long, global = true, env = "DOKKAN_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding cache entries
    #[arg(long, global = true, env = "DOKKAN_CACHE_DIR", default_value = ".dokkan-cache")]
    cache_dir: PathBuf,

    /// Entries kept in memory in front of the cache files
    #[arg(long, global = true, env = "DOKKAN_CACHE_CAPACITY", default_value_t = 256)]
    cache_capacity: u64,

    /// Per-request HTTP timeout in seconds
    #[arg(long, global = true, env = "DOKKAN_HTTP_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Bypass the cache entirely: every read goes to the sources
    #[arg(long, global = true, default_value_t = false)]
    no_cache: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the records of a data type, refreshing them if expired
    Get {
        /// Data type name (e.g. "cards")
        data_type: String,

        /// Serve an expired entry if every source fails
        #[arg(long, default_value_t = false)]
        stale: bool,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Refresh data types (all registered types when none are given)
    Update {
        types: Vec<String>,
    },

    /// Remove every cache entry
    Clear,

    /// Sample each source and report freshness scores. Reordered priorities
    /// are not persisted; they only apply within a running `watch`.
    Rescore {
        /// Only rescore this data type
        data_type: Option<String>,
    },

    /// Register a new data type and learn its parser from a sample
    Discover {
        name: String,

        /// Source ids in priority order
        #[arg(short, long, value_delimiter = ',', required = true)]
        sources: Vec<String>,

        /// Cache TTL in seconds
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,

        /// Records sampled to learn the parser
        #[arg(long, default_value_t = 10)]
        sample_size: usize,

        /// Fetch and print the records after discovery
        #[arg(long, default_value_t = false)]
        fetch: bool,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// List registered data types with TTLs, priorities and parsers
    Types,

    /// Keep refreshing and rescoring until interrupted
    Watch {
        /// Seconds between full updates (config value when omitted, 0 disables)
        #[arg(long)]
        update_secs: Option<u64>,

        /// Seconds between rescoring passes (config value when omitted, 0 disables)
        #[arg(long)]
        rescore_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dokkan=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.global.config {
        Some(path) => AggregatorConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AggregatorConfig::default_seed(),
    };
    let sources = HttpSources::new(&config.sources, Duration::from_secs(cli.global.timeout_secs))
        .context("Failed to create HTTP client")?;

    if cli.global.no_cache {
        let coordinator = Coordinator::from_config(&config, sources, NullCache)?;
        run(cli.command, &config, coordinator).await
    } else {
        let store_config = StoreConfig {
            dir: cli.global.cache_dir.clone(),
            memory_capacity: cli.global.cache_capacity,
        };
        let store = FileCacheStore::open(&store_config)
            .await
            .context("Failed to open cache directory")?;
        let coordinator = Coordinator::from_config(&config, sources, store)?;
        run(cli.command, &config, coordinator).await
    }
}

async fn run<S>(
    command: Commands,
    config: &AggregatorConfig,
    coordinator: Coordinator<HttpSources, S>,
) -> Result<()>
where
    S: CacheStore,
{
    match command {
        Commands::Get {
            data_type,
            stale,
            format,
        } => cmd_get(&coordinator, &data_type, stale, format).await,
        Commands::Update { types } => cmd_update(&coordinator, types).await,
        Commands::Clear => {
            coordinator.clear_cache().await?;
            tracing::info!("Cache cleared");
            Ok(())
        }
        Commands::Rescore { data_type } => cmd_rescore(&coordinator, data_type.as_deref()).await,
        Commands::Discover {
            name,
            sources,
            ttl_secs,
            sample_size,
            fetch,
            format,
        } => {
            let def = DataTypeDef {
                name,
                ttl_ms: ttl_secs.saturating_mul(1000),
                sources,
            };
            cmd_discover(&coordinator, def, sample_size, fetch, format).await
        }
        Commands::Types => {
            println!("{}", serde_json::to_string_pretty(&coordinator.data_types())?);
            Ok(())
        }
        Commands::Watch {
            update_secs,
            rescore_secs,
        } => {
            let update = update_secs.map_or(config.refresh.update_interval(), Duration::from_secs);
            let rescore =
                rescore_secs.map_or(config.refresh.rescore_interval(), Duration::from_secs);
            let refresher = Refresher::new(Arc::new(coordinator), &config.refresh)
                .with_intervals(update, rescore);
            cmd_watch(refresher).await
        }
    }
}

async fn cmd_get<S: CacheStore>(
    coordinator: &Coordinator<HttpSources, S>,
    data_type: &str,
    stale: bool,
    format: OutputFormat,
) -> Result<()> {
    let refreshed = if stale {
        coordinator.get_or_stale(data_type).await?
    } else {
        coordinator.get_or_refresh(data_type).await?
    };

    tracing::info!(
        data_type = %data_type,
        count = refreshed.data.len(),
        from_cache = refreshed.from_cache,
        stale = refreshed.stale,
        source = refreshed.source.as_deref().unwrap_or("-"),
        "Records ready"
    );
    println!("{}", output::render(&refreshed.data, format)?);
    Ok(())
}

async fn cmd_update<S: CacheStore>(
    coordinator: &Coordinator<HttpSources, S>,
    types: Vec<String>,
) -> Result<()> {
    let requested = (!types.is_empty()).then_some(types);
    let report = coordinator.update_all(requested.as_deref()).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.success {
        let failed = report.results.values().filter(|r| !r.is_ok()).count();
        anyhow::bail!("{failed} data type(s) failed to refresh");
    }
    Ok(())
}

async fn cmd_rescore<S: CacheStore>(
    coordinator: &Coordinator<HttpSources, S>,
    data_type: Option<&str>,
) -> Result<()> {
    let scores = coordinator.rescore_and_reorder(data_type).await?;

    for name in scores.keys() {
        let priority = coordinator.orchestrator().priority(name).unwrap_or_default();
        tracing::info!(data_type = %name, priority = ?priority, "Priority after rescoring");
    }
    println!("{}", serde_json::to_string_pretty(&scores)?);
    Ok(())
}

async fn cmd_discover<S: CacheStore>(
    coordinator: &Coordinator<HttpSources, S>,
    def: DataTypeDef,
    sample_size: usize,
    fetch: bool,
    format: OutputFormat,
) -> Result<()> {
    let name = def.name.clone();
    let summary = coordinator.discover_type(def, sample_size).await?;

    if fetch {
        let refreshed = coordinator.get_or_refresh(&name).await?;
        println!("{}", output::render(&refreshed.data, format)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

async fn cmd_watch<S: CacheStore>(refresher: Refresher<HttpSources, S>) -> Result<()> {
    let cancel = CancellationToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for CTRL+C");
        }
        tracing::info!("Shutdown signal received");
        signal_token.cancel();
    });

    match refresher.run(cancel, &TracingRefreshReporter).await {
        Ok(()) | Err(AppError::Cancelled) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
