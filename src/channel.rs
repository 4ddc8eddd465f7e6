use crate::consts::INBOUND_CHANNEL_CAPACITY;
use crate::error::AppError;

use async_trait::async_trait;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Byte-oriented line to the modem.
#[async_trait]
pub trait Channel: Send {
    async fn write(&mut self, command: &str) -> Result<(), AppError>;

    /// Wait until everything written so far has left the host.
    async fn drain(&mut self) -> Result<(), AppError>;

    /// Start delivering inbound data. Each item is one chunk as read off the
    /// wire; chunk boundaries carry no meaning. Only one subscription is
    /// allowed per channel.
    fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, AppError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOp {
    Write(String),
    Drain,
    Subscribe,
}

/// In-memory channel for driving a line without hardware.
pub struct MemoryChannel {
    ops: Arc<Mutex<Vec<ChannelOp>>>,
    inbound: Option<mpsc::Receiver<Vec<u8>>>,
    fail_on: Option<String>,
}

/// The far end of a [`MemoryChannel`]: inject modem output and inspect what
/// the line sent.
#[derive(Clone)]
pub struct MemoryHandle {
    pub inbound: mpsc::Sender<Vec<u8>>,
    ops: Arc<Mutex<Vec<ChannelOp>>>,
}

impl MemoryChannel {
    pub fn new() -> (Self, MemoryHandle) {
        let ops = Arc::new(Mutex::new(Vec::new()));
        let (inbound_sink, inbound) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let channel = Self {
            ops: ops.clone(),
            inbound: Some(inbound),
            fail_on: None,
        };
        let handle = MemoryHandle {
            inbound: inbound_sink,
            ops,
        };
        (channel, handle)
    }

    /// Make writes of `command` fail as a broken pipe.
    pub fn fail_on(mut self, command: &str) -> Self {
        self.fail_on = Some(command.to_string());
        self
    }

    fn record(&self, op: ChannelOp) {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(op);
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn write(&mut self, command: &str) -> Result<(), AppError> {
        if self.fail_on.as_deref() == Some(command) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe).into());
        }
        self.record(ChannelOp::Write(command.to_string()));
        Ok(())
    }

    async fn drain(&mut self) -> Result<(), AppError> {
        self.record(ChannelOp::Drain);
        Ok(())
    }

    fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<u8>>, AppError> {
        let inbound = self.inbound.take().ok_or(AppError::AlreadySubscribed)?;
        self.record(ChannelOp::Subscribe);
        Ok(inbound)
    }
}

impl MemoryHandle {
    pub fn ops(&self) -> Vec<ChannelOp> {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn send(&self, chunk: impl Into<Vec<u8>>) -> Result<(), AppError> {
        self.inbound
            .send(chunk.into())
            .await
            .map_err(|_| AppError::ChannelClosed("memory channel inbound"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_operations_in_order() {
        let (mut channel, handle) = MemoryChannel::new();
        channel.write("AT\r").await.unwrap();
        channel.drain().await.unwrap();
        let mut inbound = channel.subscribe().unwrap();

        handle.send(&b"OK\r\n"[..]).await.unwrap();
        assert_eq!(inbound.recv().await.unwrap(), b"OK\r\n".to_vec());
        assert_eq!(
            handle.ops(),
            vec![
                ChannelOp::Write("AT\r".to_string()),
                ChannelOp::Drain,
                ChannelOp::Subscribe,
            ]
        );
    }

    #[tokio::test]
    async fn second_subscription_is_rejected() {
        let (mut channel, _handle) = MemoryChannel::new();
        let _inbound = channel.subscribe().unwrap();
        assert!(matches!(
            channel.subscribe(),
            Err(AppError::AlreadySubscribed)
        ));
    }

    #[tokio::test]
    async fn configured_write_fails() {
        let (channel, handle) = MemoryChannel::new();
        let mut channel = channel.fail_on("ATH0\r");
        assert!(channel.write("AT\r").await.is_ok());
        assert!(matches!(
            channel.write("ATH0\r").await,
            Err(AppError::Io(_))
        ));
        assert_eq!(handle.ops(), vec![ChannelOp::Write("AT\r".to_string())]);
    }
}
