//! civic-watch: headless report dashboard.
//!
//! Connects to the configured remote, keeps a synchronized store and logs the
//! aggregate view every time the store changes. Stops on Ctrl-C.

use civic_core::{ReportCategory, ReportStatus};
use civic_sync::{ClientResult, RestClient, SyncClient, SyncConfig, SyncSettings, WsChannel};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ClientResult<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = SyncConfig::load()?;
    let rest = Arc::new(RestClient::new(&config)?);
    let channel = Arc::new(WsChannel::new(&config));
    let client = SyncClient::start(
        rest.clone(),
        channel,
        rest,
        SyncSettings::from(&config),
    );

    let mut changes = client.changes();
    let mut feed_status = client.feed_status();
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                log_aggregates(&client);
            }
            changed = feed_status.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = feed_status.borrow_and_update().clone();
                tracing::info!(status = ?status, "Feed status changed");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

fn log_aggregates(client: &SyncClient) {
    let stats = client.aggregates();
    let mean_resolution_hours = stats
        .mean_resolution
        .map(|d| d.num_minutes() as f64 / 60.0);
    tracing::info!(
        version = %stats.version,
        total = stats.total,
        open = stats.count(ReportStatus::Open),
        in_progress = stats.count(ReportStatus::InProgress),
        resolved = stats.count(ReportStatus::Resolved),
        closed = stats.count(ReportStatus::Closed),
        potholes = stats.count_category(ReportCategory::Pothole),
        mean_resolution_hours = ?mean_resolution_hours,
        "Report aggregates"
    );
}
