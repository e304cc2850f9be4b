//! Bounded snapshot handoff between collectors and the writer thread.
//!
//! Producers use a non-blocking `try_send`; only the single consumer
//! ever blocks, in `recv`. Capacity is fixed at construction. What
//! happens on saturation is the writer's backpressure policy, not the
//! channel's concern: the channel only reports the condition.

use std::sync::mpsc::{self, Receiver, SyncSender};

use crate::writer::StatsMessage;

/// Non-blocking send failure.
#[derive(Debug)]
pub enum TrySendError {
    /// The channel is at capacity. The message is handed back.
    Full(StatsMessage),
    /// The consumer is gone. The message is handed back.
    Disconnected(StatsMessage),
}

impl std::fmt::Display for TrySendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "snapshot queue is full"),
            TrySendError::Disconnected(_) => write!(f, "snapshot consumer is gone"),
        }
    }
}

impl std::error::Error for TrySendError {}

/// Producer side. Cloneable; one per collector.
#[derive(Clone)]
pub struct SnapshotSender {
    tx: SyncSender<StatsMessage>,
}

impl SnapshotSender {
    /// Attempts to enqueue a message without blocking.
    pub fn try_send(&self, msg: StatsMessage) -> Result<(), TrySendError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::TrySendError::Full(m) => TrySendError::Full(m),
            mpsc::TrySendError::Disconnected(m) => TrySendError::Disconnected(m),
        })
    }
}

/// Consumer side. Held by the single writer thread.
pub struct SnapshotReceiver {
    rx: Receiver<StatsMessage>,
}

impl SnapshotReceiver {
    /// Blocks until a message is available. Returns `None` once every
    /// sender has been dropped.
    pub fn recv(&self) -> Option<StatsMessage> {
        self.rx.recv().ok()
    }
}

/// Creates a fixed-capacity snapshot channel.
pub fn bounded(capacity: usize) -> (SnapshotSender, SnapshotReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (SnapshotSender { tx }, SnapshotReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn msg(source: &str) -> StatsMessage {
        StatsMessage::snapshot(0, source, crate::fields::FieldMap::new())
    }

    #[test]
    fn saturation_yields_full_without_blocking() {
        let (tx, _rx) = bounded(2);
        tx.try_send(msg("a")).unwrap();
        tx.try_send(msg("b")).unwrap();

        match tx.try_send(msg("c")) {
            Err(TrySendError::Full(m)) => assert_eq!(m.source, "c"),
            other => panic!("expected Full, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn per_producer_fifo_order() {
        let (tx, rx) = bounded(8);
        for source in ["first", "second", "third"] {
            tx.try_send(msg(source)).unwrap();
        }

        assert_eq!(rx.recv().unwrap().source, "first");
        assert_eq!(rx.recv().unwrap().source, "second");
        assert_eq!(rx.recv().unwrap().source, "third");
    }

    #[test]
    fn recv_blocks_until_message_arrives() {
        let (tx, rx) = bounded(1);

        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            tx.try_send(msg("late")).unwrap();
        });

        let received = rx.recv().unwrap();
        assert_eq!(received.source, "late");
        producer.join().unwrap();
    }

    #[test]
    fn recv_returns_none_when_senders_are_gone() {
        let (tx, rx) = bounded(1);
        drop(tx);
        assert!(rx.recv().is_none());
    }
}
