//! ARL Engine
//!
//! Mines association rules from an interaction log and serves item-to-item
//! recommendations.
//!
//! # Run
//!
//! 1. Load the event CSV
//! 2. Mine baskets, frequent itemsets and rules on a blocking thread
//! 3. Optionally export the rules and answer a one-shot query
//! 4. Optionally serve the model over HTTP until shutdown
//!
//! # Graceful Shutdown
//!
//! SIGTERM and SIGINT cancel a mining run at the next stage boundary and stop
//! the API server once in-flight requests complete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use arl::config::Config;
use arl::pipeline::{MinedModel, MiningPipeline};
use arl::{api, loader, Error};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing with structured logging
    init_tracing();

    info!("═══════════════════════════════════════════════════════════════");
    info!("  🚀 ARL Engine v{}", env!("CARGO_PKG_VERSION"));
    info!("═══════════════════════════════════════════════════════════════");
    info!("  Stages:");
    info!("    • Basket Builder");
    info!("    • Apriori Itemset Miner");
    info!("    • Rule Generator");
    info!("    • Recommender");
    info!("═══════════════════════════════════════════════════════════════");

    // Load configuration
    let config = Config::from_env()?;
    info!("✅ Configuration loaded and validated");

    #[cfg(feature = "prometheus")]
    install_metrics_exporter(&config.api.metrics_addr)?;

    // Load events
    let path = config.data.events_path.clone();
    let delimiter = config.data.delimiter;
    let events =
        tokio::task::spawn_blocking(move || loader::read_events(path, delimiter)).await??;

    // Mine
    let model = match run_pipeline(&config, events).await? {
        Some(model) => Arc::new(model),
        None => {
            info!("👋 ARL Engine stopped before mining completed");
            return Ok(());
        }
    };

    if let Some(path) = &config.data.rules_output {
        loader::export_rules(path, model.recommender.ranked_rules())?;
    }

    if let Some(item) = &config.query.item {
        let items = model.recommend(item, config.query.count);
        info!(
            "🎯 Recommendations for {}: {}",
            item,
            items
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        println!("{}", serde_json::to_string(&items)?);
    }

    if config.api.enabled {
        info!("═══════════════════════════════════════════════════════════════");
        info!("  📡 API: http://{}", config.api.bind_addr());
        info!("  🔗 Health: http://{}/health", config.api.bind_addr());
        info!("═══════════════════════════════════════════════════════════════");

        api::start_server(model, &config.api, async {
            shutdown_signal().await;
            info!("📴 Shutdown signal received");
        })
        .await?;
    }

    info!("👋 ARL Engine stopped gracefully");
    Ok(())
}

/// Run the pipeline on a blocking thread. Returns `None` if a shutdown
/// signal cancelled the run.
async fn run_pipeline(
    config: &Config,
    events: Vec<arl::RawEvent>,
) -> anyhow::Result<Option<MinedModel>> {
    let cancel = Arc::new(AtomicBool::new(false));
    let pipeline = MiningPipeline::new(config.mining.clone())?.with_cancellation(cancel.clone());

    let mut mining = tokio::task::spawn_blocking(move || pipeline.run(&events));

    let outcome = tokio::select! {
        joined = &mut mining => joined?,
        _ = shutdown_signal() => {
            warn!("📴 Shutdown signal received, cancelling after the current stage");
            cancel.store(true, Ordering::Relaxed);
            mining.await?
        }
    };

    match outcome {
        Ok(model) => {
            let report = &model.report;
            info!(
                "✅ Mined {} rules from {} baskets ({} events, {} skipped)",
                model.rule_count(),
                report.baskets,
                report.events_seen,
                report.records_skipped
            );
            for issue in &report.sample_errors {
                warn!("  record #{}: {}", issue.index, issue.reason);
            }
            Ok(Some(model))
        }
        Err(Error::Cancelled { stage }) => {
            warn!("🛑 Mining cancelled before stage '{}'", stage);
            Ok(None)
        }
        Err(e) => {
            error!("Mining failed: {}", e);
            Err(e.into())
        }
    }
}

/// Initialize structured logging with tracing
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // Default log levels
        EnvFilter::new("arl_engine=debug,arl=debug,tower_http=debug,info")
    });

    let json = std::env::var("ARL_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let (text_layer, json_layer) = if json {
        (None, Some(fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(std::env::var("NO_COLOR").is_err()),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .init();
}

#[cfg(feature = "prometheus")]
fn install_metrics_exporter(addr: &str) -> anyhow::Result<()> {
    let addr: std::net::SocketAddr = addr.parse()?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    info!("📈 Prometheus metrics on http://{}/metrics", addr);
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
