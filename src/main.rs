//! VICINITY: quota-aware area data aggregator
//!
//! Entry point. Loads configuration, initialises structured logging,
//! builds the area service (restoring usage counters from disk when
//! configured), serves the HTTP API and sweeps expired cache entries
//! until shutdown.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use vicinity::config;
use vicinity::dashboard;
use vicinity::service::AreaService;

const BANNER: &str = r#"
__     _____ ____ ___ _   _ ___ _______   __
\ \   / /_ _/ ___|_ _| \ | |_ _|_   _\ \ / /
 \ \ / / | | |    | ||  \| || |  | |  \ V /
  \ V /  | | |___ | || |\  || |  | |   | |
   \_/  |___\____|___|_| \_|___| |_|   |_|

  Quota-aware area data aggregator
  v0.1.0
"#;

/// Config file path, overridable with `VICINITY_CONFIG`.
const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("VICINITY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        service = %cfg.service.name,
        port = cfg.service.port,
        providers = cfg.providers.len(),
        sweep_interval_secs = cfg.cache.sweep_interval_secs,
        "VICINITY starting up"
    );

    // -- Initialise components -------------------------------------------

    let service = Arc::new(AreaService::from_config(&cfg)?);
    let server = dashboard::spawn_server(service.clone(), cfg.service.port).await?;

    // -- Main loop -------------------------------------------------------

    let mut interval =
        tokio::time::interval(Duration::from_secs(cfg.cache.sweep_interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Serving. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let evicted = service.evict_expired_cache();
                debug!(evicted, cached = service.cached_records(), "Cache sweep");
                service.flush();
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    server.abort();
    service.flush();

    let stats = service.stats();
    info!(
        aggregations = stats.aggregations,
        cache_hits = stats.cache_hits,
        stale_fallbacks = stats.stale_fallbacks,
        "VICINITY shut down cleanly."
    );

    Ok(())
}

/// Initialise tracing. `RUST_LOG` overrides the default filter;
/// `VICINITY_LOG_JSON` switches to JSON lines.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vicinity=info"));

    let json_logging = std::env::var("VICINITY_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
