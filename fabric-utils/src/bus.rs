//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tokio::sync::mpsc;

use crate::{UnboundedReceiver, UnboundedSender};

/// Single-writer, multi-reader message bus.
///
/// Every reader consumes an independent copy of the stream, in publication
/// order. Dropping the bus (or calling [`Bus::close`]) closes all reader
/// channels, which readers observe as end-of-stream.
#[derive(Debug, Default)]
pub struct Bus<T> {
    readers: Vec<UnboundedSender<T>>,
}

/// Reader endpoint of a [`Bus`].
pub type BusReceiver<T> = UnboundedReceiver<T>;

// ===== impl Bus =====

impl<T> Bus<T>
where
    T: Clone,
{
    pub fn new() -> Bus<T> {
        Bus {
            readers: Vec::new(),
        }
    }

    /// Registers a new reader. Messages published before the subscription are
    /// not replayed.
    pub fn subscribe(&mut self) -> BusReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.readers.push(tx);
        rx
    }

    /// Publishes a message to all readers. Readers that went away are pruned.
    pub fn publish(&mut self, msg: T) {
        self.readers.retain(|tx| tx.send(msg.clone()).is_ok());
    }

    /// Signals end-of-stream to all readers.
    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fanout_order_and_eof() {
        let mut bus = Bus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        for n in 0..3 {
            bus.publish(n);
        }
        bus.close();

        for rx in [&mut rx1, &mut rx2] {
            for n in 0..3 {
                assert_eq!(rx.recv().await, Some(n));
            }
            assert_eq!(rx.recv().await, None);
        }
    }

    #[tokio::test]
    async fn late_subscriber_misses_history() {
        let mut bus = Bus::new();
        bus.publish(1);
        let mut rx = bus.subscribe();
        bus.publish(2);
        bus.close();

        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, None);
    }
}
