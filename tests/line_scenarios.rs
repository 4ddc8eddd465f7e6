use callerid_rs::channel::{MemoryChannel, MemoryHandle};
use callerid_rs::monitor::MonitorSettings;
use callerid_rs::tasks::run_line;
use callerid_rs::types::{LineIdentity, MonitorEvent};

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};

const RING: &[u8] = b"\x10R";

struct Line {
    handle: MemoryHandle,
    events: broadcast::Receiver<MonitorEvent>,
}

impl Line {
    async fn start() -> Self {
        let (channel, handle) = MemoryChannel::new();
        let (sink, mut events) = broadcast::channel(64);
        let identity = LineIdentity {
            line: "100".to_string(),
            description: "Front desk".to_string(),
        };
        tokio::spawn(run_line(channel, identity, MonitorSettings::default(), sink));
        match events.recv().await.unwrap() {
            MonitorEvent::Init(identity) => assert_eq!(identity.line, "100"),
            other => panic!("expected init, got {other:?}"),
        }
        Self { handle, events }
    }

    async fn send(&self, chunk: &[u8]) {
        self.handle.send(chunk).await.unwrap();
    }

    async fn next(&mut self) -> MonitorEvent {
        self.events.recv().await.unwrap()
    }

    /// Let the line task process everything queued so far.
    async fn settle(&self) {
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn noise_then_caller_id() {
    let mut line = Line::start().await;
    line.send(b"RING-noise").await;
    line.send(b"NMBR=12025550123;").await;

    match line.next().await {
        MonitorEvent::RingingStart(call) => assert_eq!(call.number, "unknown"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(line.next().await, MonitorEvent::Ringing(_)));
    match line.next().await {
        MonitorEvent::Ringing(call) => {
            assert_eq!(call.number, "12025550123");
            assert_eq!(call.rings, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn rings_within_gap_are_counted() {
    let mut line = Line::start().await;
    line.send(RING).await;
    assert!(matches!(line.next().await, MonitorEvent::RingingStart(_)));
    assert!(matches!(line.next().await, MonitorEvent::Ringing(_)));

    sleep(Duration::from_secs(4)).await;
    line.send(RING).await;
    match line.next().await {
        MonitorEvent::Ringing(call) => assert_eq!(call.rings, 2),
        other => panic!("unexpected {other:?}"),
    }

    sleep(Duration::from_secs(5)).await;
    line.send(RING).await;
    match line.next().await {
        MonitorEvent::Ringing(call) => assert_eq!(call.rings, 3),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn silence_ends_call_once() {
    let mut line = Line::start().await;
    let t0 = Instant::now();
    line.send(RING).await;
    line.next().await;
    line.next().await;

    match line.next().await {
        MonitorEvent::RingingEnd(call) => assert_eq!(call.rings, 1),
        other => panic!("unexpected {other:?}"),
    }
    let elapsed = t0.elapsed();
    assert!(elapsed > Duration::from_secs(6));
    assert!(elapsed < Duration::from_secs(8));

    sleep(Duration::from_secs(60)).await;
    line.settle().await;
    assert!(line.events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn ring_after_gap_starts_a_new_call() {
    let mut line = Line::start().await;
    line.send(RING).await;
    let first = match line.next().await {
        MonitorEvent::RingingStart(call) => call,
        other => panic!("unexpected {other:?}"),
    };
    line.next().await;

    sleep(Duration::from_secs(8)).await;
    assert!(matches!(line.next().await, MonitorEvent::RingingEnd(_)));

    line.send(RING).await;
    match line.next().await {
        MonitorEvent::RingingStart(call) => {
            assert_ne!(call.id, first.id);
            assert_eq!(call.rings, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn late_ring_refreshes_liveness_without_counting() {
    let mut line = Line::start().await;
    line.send(b"NMBR=2025550123\r").await;
    assert!(matches!(line.next().await, MonitorEvent::RingingStart(_)));
    assert!(matches!(line.next().await, MonitorEvent::Ringing(_)));

    // first ring token of a call detected from its Caller-ID payload
    sleep(Duration::from_secs(5)).await;
    line.send(RING).await;
    line.settle().await;
    assert!(line.events.try_recv().is_err());

    // past the original check deadline, still alive thanks to the ring
    sleep(Duration::from_secs(4)).await;
    line.settle().await;
    assert!(line.events.try_recv().is_err());

    match line.next().await {
        MonitorEvent::RingingEnd(call) => {
            assert_eq!(call.number, "2025550123");
            assert_eq!(call.rings, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
}
