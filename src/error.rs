use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("webhook error: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("http server error: {0}")]
    Server(String),

    #[error("inbound data already subscribed")]
    AlreadySubscribed,
}

pub async fn handle_error(e: impl std::error::Error) {
    error!("ERROR: {e}")
}
