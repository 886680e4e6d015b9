//! Events published by a session to its subscribers.

use std::sync::mpsc::{self, Receiver, Sender};

use super::phase::Phase;
use super::state::TestResult;
use crate::protocol::Message;

/// Something observable happened in the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PhaseChanged { from: Phase, to: Phase },
    /// An unsolicited `service_mode` beacon.
    Beacon(Message),
    /// The response resolving the outstanding command.
    Response(Message),
    /// A protocol message nobody was waiting for.
    Unsolicited(Message),
    /// A non-protocol line (boot log, firmware print).
    Noise(String),
    /// A line written to the device, without its trailing newline.
    Sent(String),
    TestUpdated(TestResult),
}

/// Fans events out to every live subscriber.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Vec<Sender<SessionEvent>>,
}

impl EventBus {
    pub(crate) fn subscribe(&mut self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Subscribers whose receiver was dropped are pruned.
    pub(crate) fn publish(&mut self, event: SessionEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn fan_out_and_prune() {
    let mut bus = EventBus::default();
    let first = bus.subscribe();
    let second = bus.subscribe();
    bus.publish(SessionEvent::Noise("boot".into()));
    assert_eq!(first.try_recv().unwrap(), SessionEvent::Noise("boot".into()));
    assert_eq!(second.try_recv().unwrap(), SessionEvent::Noise("boot".into()));

    drop(second);
    bus.publish(SessionEvent::Sent("{}".into()));
    assert_eq!(bus.subscribers.len(), 1);
    assert_eq!(first.try_recv().unwrap(), SessionEvent::Sent("{}".into()));
}
