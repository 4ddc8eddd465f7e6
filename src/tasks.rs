use crate::channel::Channel;
use crate::consts::{CALLER_ID_COMMAND, HANG_UP_COMMAND, VOICE_MODE_COMMAND};
use crate::error::AppError;
use crate::monitor::{LineMonitor, MonitorSettings};
use crate::types::{Call, LineIdentity, MonitorEvent};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

async fn send_command<C: Channel>(channel: &mut C, command: &str) -> Result<(), AppError> {
    channel.write(command).await.map_err(|e| {
        error!(command=?command, error=%e, "failed to write modem command");
        e
    })?;
    channel.drain().await.map_err(|e| {
        error!(command=?command, error=%e, "failed to drain modem command");
        e
    })
}

/// Put the modem into voice mode with Caller-ID reporting, start listening,
/// and hang up. Returns the inbound data stream.
pub async fn initialize<C: Channel>(channel: &mut C) -> Result<mpsc::Receiver<Vec<u8>>, AppError> {
    send_command(channel, VOICE_MODE_COMMAND).await?;
    send_command(channel, CALLER_ID_COMMAND).await?;
    let inbound = channel.subscribe()?;
    send_command(channel, HANG_UP_COMMAND).await?;
    Ok(inbound)
}

fn publish(events: &broadcast::Sender<MonitorEvent>, event: MonitorEvent) {
    trace!(line=%event.line(), event=%event.name(), "publishing event");
    // no subscribers is not an error
    let _ = events.send(event);
}

/// Task that owns one line: initializes the modem, then feeds inbound chunks
/// and silence checks to the line's monitor until the inbound stream ends.
pub async fn run_line<C: Channel>(
    mut channel: C,
    identity: LineIdentity,
    settings: MonitorSettings,
    events: broadcast::Sender<MonitorEvent>,
) -> Result<(), AppError> {
    let mut inbound = initialize(&mut channel).await?;
    info!(line=%identity.line, description=%identity.description, "line initialized");
    publish(&events, MonitorEvent::Init(identity.clone()));

    let mut monitor = LineMonitor::new(identity, settings);
    loop {
        let deadline = monitor.check_deadline();
        tokio::select! {
            chunk = inbound.recv() => match chunk {
                Some(chunk) => {
                    trace!(line=%monitor.identity().line, chunk=?String::from_utf8_lossy(&chunk), "inbound chunk");
                    for event in monitor.handle_chunk(&chunk, Instant::now()) {
                        publish(&events, event);
                    }
                }
                None => {
                    info!(line=%monitor.identity().line, "inbound stream closed");
                    for event in monitor.finish() {
                        publish(&events, event);
                    }
                    break Ok(());
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                for event in monitor.handle_check_expiry(Instant::now()) {
                    publish(&events, event);
                }
            }
        }
    }
}

/// Task that keeps the map of ongoing calls per line in sync with the event bus.
pub async fn track_calls(
    mut events: broadcast::Receiver<MonitorEvent>,
    calls: Arc<Mutex<HashMap<String, Call>>>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let mut calls = calls.lock().unwrap_or_else(PoisonError::into_inner);
                match event {
                    MonitorEvent::RingingStart(call) | MonitorEvent::Ringing(call) => {
                        calls.insert(call.line.clone(), call);
                    }
                    MonitorEvent::RingingEnd(call) => {
                        calls.remove(&call.line);
                    }
                    MonitorEvent::Init(_) => (),
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // a missed ringing.end would leave its call behind forever;
                // live calls come back with their next ringing event
                warn!(skipped, "call tracker lagging behind event bus; clearing ongoing calls");
                calls.lock().unwrap_or_else(PoisonError::into_inner).clear();
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("event bus closed; call tracker stopping");
                break;
            }
        }
    }
}

pub fn webhook_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Task that POSTs every event to a webhook. Delivery failures are logged and
/// the event is dropped.
pub async fn forward_events(
    mut events: broadcast::Receiver<MonitorEvent>,
    http_client: reqwest::Client,
    url: String,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Err(e) = post_event(&http_client, &url, &event).await {
                    warn!(error=%e, event=%event.name(), line=%event.line(), "failed to deliver event to webhook");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "webhook forwarder lagging behind event bus");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("event bus closed; webhook forwarder stopping");
                break;
            }
        }
    }
}

async fn post_event(
    http_client: &reqwest::Client,
    url: &str,
    event: &MonitorEvent,
) -> Result<(), AppError> {
    let resp = http_client
        .post(url)
        .json(event)
        .send()
        .await?
        .error_for_status()?;
    debug!(status=%resp.status(), event=%event.name(), "webhook accepted event");
    Ok(())
}
