//! PerpWatch entry point

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use perpwatch::alerts::{AlertSink, LogSink, TelegramSink};
use perpwatch::config::AppConfig;
use perpwatch::monitor::{Monitor, MonitorSettings};
use perpwatch::oracle::{build_providers, FailoverFetcher};

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("PERPWATCH_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).try_init()?;
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate().context("Invalid configuration")?;
    info!(config = %config, "⚙️ Configuration loaded");

    let providers = build_providers(&config.sources.priority, &config.sources.transport_settings())
        .context("Failed to build market data providers")?;
    let fetcher = Arc::new(FailoverFetcher::new(
        providers,
        &config.sources.priority,
        config.sources.failover_settings(),
    ));

    let sink: Arc<dyn AlertSink> = match config.telegram.credentials() {
        Some((token, chat_id)) => Arc::new(TelegramSink::new(
            token,
            chat_id,
            config.telegram.timeout(),
        )?),
        None => {
            warn!("Telegram credentials not set, alerts go to the log only");
            Arc::new(LogSink)
        }
    };
    info!(sink = sink.name(), "Alert sink ready");

    let monitor = Monitor::new(MonitorSettings::from_config(&config), fetcher, sink);
    monitor.announce_start().await;

    tokio::select! {
        _ = monitor.run() => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("🛑 Shutting down");
        }
    }

    Ok(())
}
