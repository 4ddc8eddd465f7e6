use callerid_rs::config::Config;
use callerid_rs::consts::{EVENT_BUS_CAPACITY, WEBHOOK_TIMEOUT};
use callerid_rs::error::{handle_error, AppError};
use callerid_rs::handlers;
use callerid_rs::serial::{list_ports, SerialChannel};
use callerid_rs::tasks::{forward_events, run_line, track_calls, webhook_client};
use callerid_rs::types::AppState;

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "callerid", version, about = "Caller-ID call monitor for analog modem lines")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor the configured lines and serve call events over HTTP
    Serve,
    /// Print the serial ports available on this host as JSON
    Ports,
}

fn init_tracing(level: LevelFilter) {
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(
            tracing_subscriber::filter::Targets::new()
                .with_targets([
                    ("hyper", LevelFilter::OFF),
                    ("callerid_rs", level),
                    ("callerid", level),
                ])
                .with_default(LevelFilter::INFO),
        );
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {e}");
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // a missing .env file is fine; the environment may already be set
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Ports => {
            init_tracing(LevelFilter::WARN);
            let ports = list_ports()?;
            println!("{}", serde_json::to_string_pretty(&ports)?);
            Ok(())
        }
    }
}

async fn serve() -> Result<(), AppError> {
    let config = Config::from_env()?;
    init_tracing(config.log_level);

    let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
    let calls = Arc::new(Mutex::new(HashMap::new()));
    tokio::spawn(track_calls(events.subscribe(), calls.clone()));

    if let Some(url) = config.webhook_url.clone() {
        info!(url=%url, "forwarding events to webhook");
        tokio::spawn(forward_events(
            events.subscribe(),
            webhook_client(WEBHOOK_TIMEOUT)?,
            url,
        ));
    }

    let settings = config.monitor_settings();
    let mut started = 0;
    for line in &config.lines {
        let channel = match SerialChannel::open(&line.port, config.baud_rate) {
            Ok(channel) => channel,
            Err(e) => {
                warn!(line=%line.line, port=%line.port, "skipping line");
                handle_error(e).await;
                continue;
            }
        };
        info!(line=%line.line, port=%channel.port_name(), baud_rate = config.baud_rate, "monitoring line");
        let identity = line.identity();
        let events = events.clone();
        tokio::spawn(async move {
            let line = identity.line.clone();
            if let Err(e) = run_line(channel, identity, settings, events).await {
                warn!(line=%line, "line stopped");
                handle_error(e).await;
            }
        });
        started += 1;
    }
    if started == 0 {
        return Err(AppError::Config("no configured line could be opened".to_string()));
    }

    let app_state = Arc::new(AppState { events, calls });

    let app = handlers::router(app_state);

    info!(addr=%config.listen_addr, "listening");
    axum::Server::bind(&config.listen_addr)
        .serve(app.into_make_service())
        .await
        .map_err(|e| AppError::Server(e.to_string()))
}
