use crate::consts::{CHECK_GRACE, DEFAULT_RING_GAP};
use crate::decoder::{decode, Token};
use crate::types::{Call, LineIdentity, MonitorEvent};

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Longest gap between two rings of the same call
    pub ring_gap: Duration,
}

impl MonitorSettings {
    pub fn check_delay(&self) -> Duration {
        self.ring_gap + CHECK_GRACE
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            ring_gap: DEFAULT_RING_GAP,
        }
    }
}

struct OngoingCall {
    call: Call,
    /// Liveness reference until the first ring token of the call
    detected_at: Instant,
}

/// Call detection state for one line.
///
/// The monitor is a plain state machine: the caller feeds it inbound chunks
/// and check-timer expiries together with the current instant, and gets back
/// the events to publish. It owns at most one call and at most one pending
/// check deadline.
pub struct LineMonitor {
    identity: LineIdentity,
    settings: MonitorSettings,
    ongoing: Option<OngoingCall>,
    last_ring_at: Option<Instant>,
    check_at: Option<Instant>,
}

impl LineMonitor {
    pub fn new(identity: LineIdentity, settings: MonitorSettings) -> Self {
        Self {
            identity,
            settings,
            ongoing: None,
            last_ring_at: None,
            check_at: None,
        }
    }

    pub fn identity(&self) -> &LineIdentity {
        &self.identity
    }

    pub fn ongoing_call(&self) -> Option<&Call> {
        self.ongoing.as_ref().map(|ongoing| &ongoing.call)
    }

    /// When the silence check should next run, if a call is being tracked.
    pub fn check_deadline(&self) -> Option<Instant> {
        self.check_at
    }

    pub fn handle_chunk(&mut self, chunk: &[u8], now: Instant) -> Vec<MonitorEvent> {
        let mut events = Vec::new();
        let token = decode(chunk);
        trace!(line=%self.identity.line, token=?token, "decoded chunk");

        match (token, self.ongoing.is_some()) {
            (Token::Number(number), false) => {
                self.start_call(Some(number), now, &mut events);
            }
            (Token::Number(number), true) => {
                // Leaves the check timer alone; a late payload does not count
                // as a ring.
                if let Some(ongoing) = self.ongoing.as_mut() {
                    debug!(line=%self.identity.line, number=%number, "caller id received");
                    ongoing.call.number = number;
                    events.push(MonitorEvent::Ringing(ongoing.call.clone()));
                }
            }
            (token, false) => {
                self.start_call(None, now, &mut events);
                if token == Token::Ring {
                    self.ring(now, &mut events);
                }
            }
            (Token::Ring, true) => self.ring(now, &mut events),
            (token, true) => {
                trace!(line=%self.identity.line, token=?token, "ignoring chunk during call");
            }
        }

        events
    }

    /// Silence check. Ends the call once no ring has been seen for longer
    /// than the ring gap, otherwise re-arms itself.
    pub fn handle_check_expiry(&mut self, now: Instant) -> Vec<MonitorEvent> {
        self.check_at = None;
        let Some(ongoing) = self.ongoing.as_ref() else {
            return Vec::new();
        };

        let reference = self.last_ring_at.unwrap_or(ongoing.detected_at);
        if now.saturating_duration_since(reference) <= self.settings.ring_gap {
            trace!(line=%self.identity.line, "line still ringing; re-arming check");
            self.arm_check(now);
            return Vec::new();
        }

        self.end_call().into_iter().collect()
    }

    /// End whatever call is in progress, e.g. because the inbound stream closed.
    pub fn finish(&mut self) -> Vec<MonitorEvent> {
        self.end_call().into_iter().collect()
    }

    fn start_call(&mut self, number: Option<String>, now: Instant, events: &mut Vec<MonitorEvent>) {
        let call = Call::new(&self.identity, number);
        info!(
            line=%self.identity.line,
            call=%call.id,
            number=%call.number,
            "call started"
        );
        events.push(MonitorEvent::RingingStart(call.clone()));
        events.push(MonitorEvent::Ringing(call.clone()));
        self.ongoing = Some(OngoingCall {
            call,
            detected_at: now,
        });
        self.arm_check(now);
    }

    fn ring(&mut self, now: Instant, events: &mut Vec<MonitorEvent>) {
        let Some(ongoing) = self.ongoing.as_mut() else {
            return;
        };

        match self.last_ring_at {
            Some(last) if now.saturating_duration_since(last) <= self.settings.ring_gap => {
                ongoing.call.rings += 1;
                debug!(line=%self.identity.line, rings=ongoing.call.rings, "ring");
                events.push(MonitorEvent::Ringing(ongoing.call.clone()));
            }
            _ => {
                trace!(line=%self.identity.line, "first ring after a gap; refreshing liveness only");
            }
        }

        self.last_ring_at = Some(now);
        self.arm_check(now);
    }

    fn arm_check(&mut self, now: Instant) {
        self.check_at = Some(now + self.settings.check_delay());
    }

    fn end_call(&mut self) -> Option<MonitorEvent> {
        self.check_at = None;
        self.last_ring_at = None;
        let ongoing = self.ongoing.take()?;
        info!(
            line=%self.identity.line,
            call=%ongoing.call.id,
            rings=ongoing.call.rings,
            "call ended"
        );
        Some(MonitorEvent::RingingEnd(ongoing.call))
    }
}
