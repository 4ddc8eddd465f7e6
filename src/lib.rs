//! Caller-ID call detection for analog telephone lines.
//!
//! A voice modem on a serial port reports ring pulses and Caller-ID payloads.
//! [`monitor::LineMonitor`] turns that token stream into call lifecycle events,
//! [`tasks::run_line`] drives one monitor per line over a [`channel::Channel`],
//! and the rest of the crate fans the events out to HTTP, websocket and
//! webhook consumers.

pub mod channel;
pub mod config;
pub mod decoder;
pub mod error;
pub mod handlers;
pub mod monitor;
pub mod serial;
pub mod tasks;
pub mod types;

pub mod consts {
    use std::time::Duration;

    /// DLE-shielded ring pulse.
    pub const RING_TOKEN: &str = "\u{10}R";
    /// DLE-shielded dial tone report.
    pub const DIAL_TONE_TOKEN: &str = "\u{10}d";
    /// DLE-shielded busy report.
    pub const BUSY_TOKEN: &str = "\u{10}b";
    pub const NUMBER_MARKER: &str = "NMBR=";
    pub const UNKNOWN_NUMBER: &str = "unknown";

    pub const VOICE_MODE_COMMAND: &str = "AT+FCLASS=8\r";
    pub const CALLER_ID_COMMAND: &str = "AT+VCID=1\r";
    pub const HANG_UP_COMMAND: &str = "ATH0\r";

    pub const DEFAULT_RING_GAP: Duration = Duration::from_secs(6);
    /// Extra wait past the ring gap before the silence check runs.
    pub const CHECK_GRACE: Duration = Duration::from_secs(1);

    pub const DEFAULT_BAUD_RATE: u32 = 9_600;
    pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
    pub const EVENT_BUS_CAPACITY: usize = 256;
    pub const INBOUND_CHANNEL_CAPACITY: usize = 64;
    pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
}
