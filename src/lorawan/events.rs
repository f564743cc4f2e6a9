//! Application-level notifications emitted by the link.

use log::debug;
use std::sync::mpsc;

/// Notification emitted by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Cached connection state changed.
    ConnectionChanged(bool),
    /// An uplink finished; `true` when the module reported success.
    SendComplete(bool),
    /// A downlink message arrived (opcode in the most significant byte).
    MessageReceived(u32),
    /// Credentials or region changed; takes effect after a restart.
    RestartRequired,
}

/// Receiver of [`LinkEvent`]s (status LED, application logic, tests).
pub trait EventSink {
    /// Deliver an event. Must not block.
    fn notify(&mut self, event: LinkEvent);
}

impl EventSink for Vec<LinkEvent> {
    fn notify(&mut self, event: LinkEvent) {
        self.push(event);
    }
}

impl EventSink for mpsc::Sender<LinkEvent> {
    fn notify(&mut self, event: LinkEvent) {
        if self.send(event).is_err() {
            debug!("Dropping {:?}: receiver gone", event);
        }
    }
}

impl EventSink for tokio::sync::broadcast::Sender<LinkEvent> {
    fn notify(&mut self, event: LinkEvent) {
        // No subscribers is not an error for a status feed
        if self.send(event).is_err() {
            debug!("Dropping {:?}: no subscribers", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_records_in_order() {
        let mut sink: Vec<LinkEvent> = Vec::new();
        sink.notify(LinkEvent::ConnectionChanged(true));
        sink.notify(LinkEvent::SendComplete(false));
        assert_eq!(
            sink,
            vec![
                LinkEvent::ConnectionChanged(true),
                LinkEvent::SendComplete(false)
            ]
        );
    }

    #[test]
    fn test_mpsc_sink() {
        let (mut tx, rx) = mpsc::channel();
        tx.notify(LinkEvent::MessageReceived(0x0102_0304));
        assert_eq!(rx.recv().unwrap(), LinkEvent::MessageReceived(0x0102_0304));

        drop(rx);
        // Receiver gone: must not panic
        tx.notify(LinkEvent::RestartRequired);
    }

    #[test]
    fn test_broadcast_sink_without_subscribers() {
        let (mut tx, _) = tokio::sync::broadcast::channel(4);
        tx.notify(LinkEvent::ConnectionChanged(false));

        let mut rx = tx.subscribe();
        tx.notify(LinkEvent::ConnectionChanged(true));
        assert_eq!(rx.try_recv().unwrap(), LinkEvent::ConnectionChanged(true));
    }
}
