//! SafeWatch Client
//!
//! Main entry point: runs the live pipeline, or one-shot REST commands.

use anyhow::Context;
use clap::{Parser, Subcommand};
use safewatch_client::{
    alert_channel::{HistoryQuery, NotificationApi, NotificationClient},
    frame_channel::ConnectionState,
    incident_client::IncidentClient,
    models::AlertRecord,
    state::{AppConfig, ClientState},
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Live feed and safety alert client
#[derive(Parser, Debug)]
#[command(name = "safewatch-client")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the live feed and alert pipeline until Ctrl-C (default)
    Watch {
        /// Start with alert sounds muted
        #[arg(long)]
        mute: bool,

        /// Write the latest frame to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print pending alerts
    Pending,

    /// Print the notification history
    History {
        #[arg(long, default_value = "1")]
        page: u32,

        #[arg(long, default_value = "20")]
        limit: u32,

        /// Filter by type (fire, fall, test_alert)
        #[arg(long = "type")]
        kind: Option<String>,
    },

    /// List recorded incidents
    Incidents,

    /// Show one incident
    Incident {
        id: String,

        /// Save the incident image to this file
        #[arg(long)]
        save_image: Option<PathBuf>,
    },

    /// Acknowledge an alert
    Ack { id: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safewatch_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::default();

    match cli.command.unwrap_or(Commands::Watch { mute: false, output: None }) {
        Commands::Watch { mute, output } => {
            if mute {
                config.sound_enabled = false;
            }
            if output.is_some() {
                config.frame_output_path = output;
            }
            watch(config).await
        }
        Commands::Pending => {
            let client = NotificationClient::with_timeout(&config.api_base_url, config.http_timeout())?;
            let alerts = client.pending().await.context("Failed to fetch pending alerts")?;
            let records: Vec<AlertRecord> = alerts.iter().map(AlertRecord::from).collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
        Commands::History { page, limit, kind } => {
            let client = NotificationClient::with_timeout(&config.api_base_url, config.http_timeout())?;
            let query = HistoryQuery {
                kind,
                ..HistoryQuery::page(page, limit)
            };
            let history = client.history(&query).await.context("Failed to fetch history")?;
            let records: Vec<AlertRecord> = history.notifications.iter().map(AlertRecord::from).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "notifications": records,
                    "total": history.total,
                }))?
            );
            Ok(())
        }
        Commands::Incidents => {
            let client = IncidentClient::with_timeout(&config.api_base_url, config.http_timeout())?;
            let incidents = client.list().await.context("Failed to list incidents")?;
            println!("{}", serde_json::to_string_pretty(&incidents)?);
            Ok(())
        }
        Commands::Incident { id, save_image } => {
            let client = IncidentClient::with_timeout(&config.api_base_url, config.http_timeout())?;
            let incident = client
                .get(&id)
                .await
                .with_context(|| format!("Failed to fetch incident {}", id))?;
            println!("{}", serde_json::to_string_pretty(&incident)?);

            if let Some(path) = save_image {
                match client.fetch_image(&incident).await? {
                    Some(bytes) => {
                        tokio::fs::write(&path, &bytes).await?;
                        tracing::info!(path = %path.display(), size = bytes.len(), "Incident image saved");
                    }
                    None => tracing::warn!(incident = %id, "Incident has no image"),
                }
            }
            Ok(())
        }
        Commands::Ack { id } => {
            let client = NotificationClient::with_timeout(&config.api_base_url, config.http_timeout())?;
            client
                .acknowledge(&id)
                .await
                .with_context(|| format!("Failed to acknowledge {}", id))?;
            tracing::info!(alert_id = %id, "Alert acknowledged");
            Ok(())
        }
    }
}

/// Run the live pipeline
///
/// Keyboard: `a` acknowledge, `c` close, `s` toggle sound, `p` pause/resume video.
async fn watch(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!("Starting SafeWatch client v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        feed_url = %config.feed_url,
        alert_feed_url = ?config.alert_feed_url,
        api_base_url = %config.api_base_url,
        frame_buffer_capacity = config.frame_buffer_capacity,
        poll_interval_ms = config.alert_poll_interval_ms,
        "Configuration loaded"
    );

    let state = ClientState::build(config).context("Invalid configuration")?;
    state.start().await;

    let mut connection = state.feed.watch_state();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *connection.borrow_and_update();
                if current == ConnectionState::Disconnected {
                    tracing::warn!("Live feed disconnected");
                } else {
                    tracing::info!(state = ?current, "Live feed state changed");
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => handle_key(&state, line.trim()).await,
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to read stdin");
                        stdin_open = false;
                    }
                }
            }
        }
    }

    state.shutdown().await;

    let frames = state.frames.stats().await;
    let rendered = state.renderer.stats();
    tracing::info!(
        accepted = frames.accepted,
        rejected_stale = frames.rejected_stale,
        evicted = frames.evicted,
        rendered = rendered.rendered,
        decode_failures = rendered.decode_failures,
        "SafeWatch client stopped"
    );
    Ok(())
}

async fn handle_key(state: &ClientState, key: &str) {
    match key {
        "a" => {
            if let Err(e) = state.presenter.acknowledge().await {
                tracing::error!(error = %e, "Acknowledge failed, alert still pending");
            }
        }
        "c" => state.presenter.close().await,
        "s" => {
            state.presenter.toggle_sound().await;
        }
        "p" => {
            let enabled = !state.renderer.is_enabled();
            state.renderer.set_enabled(enabled).await;
        }
        "" => {}
        other => tracing::info!(key = other, "Keys: a=acknowledge c=close s=sound p=pause video"),
    }
}
