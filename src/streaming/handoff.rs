//! Rendezvous channel between a connection's feeder and its writer.
//!
//! `send` only returns once the receiver has taken the item, so at most one
//! item is ever in flight between the two sides. Dropping the sender is the
//! completion signal; dropping the receiver makes every later `send` fail.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Returned by [`HandoffSender::send`] when the receiving side is gone.
///
/// The refused item has already been dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("handoff receiver dropped")]
pub struct HandoffClosed;

struct Offer<T> {
    item: T,
    taken: oneshot::Sender<()>,
}

/// Producer half of a handoff channel.
pub struct HandoffSender<T> {
    tx: mpsc::Sender<Offer<T>>,
}

/// Consumer half of a handoff channel.
pub struct HandoffReceiver<T> {
    rx: mpsc::Receiver<Offer<T>>,
}

/// Create a zero-capacity handoff channel.
pub fn channel<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (HandoffSender { tx }, HandoffReceiver { rx })
}

impl<T> HandoffSender<T> {
    /// Hand `item` to the receiver, waiting until it has been taken.
    pub async fn send(&self, item: T) -> Result<(), HandoffClosed> {
        let (taken, picked_up) = oneshot::channel();

        // A receiver dropped with the offer still queued drops the offer too,
        // which also drops `taken` and fails the wait below.
        self.tx
            .send(Offer { item, taken })
            .await
            .map_err(|_| HandoffClosed)?;

        picked_up.await.map_err(|_| HandoffClosed)
    }
}

impl<T> HandoffReceiver<T> {
    /// Take the next item, or `None` once the sender is dropped.
    pub async fn recv(&mut self) -> Option<T> {
        let Offer { item, taken } = self.rx.recv().await?;
        let _ = taken.send(());
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_items_arrive_in_order() {
        let (tx, mut rx) = channel();

        let producer = tokio::spawn(async move {
            for i in 0..5u32 {
                tx.send(i).await.unwrap();
            }
        });

        let mut received = Vec::new();
        while let Some(i) = rx.recv().await {
            received.push(i);
        }
        producer.await.unwrap();

        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_send_waits_for_receiver() {
        let (tx, mut rx) = channel();

        let sender = tokio::spawn(async move { tx.send("a").await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sender.is_finished(), "send completed with nobody receiving");

        assert_eq!(rx.recv().await, Some("a"));
        assert!(sender.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_send_fails_when_receiver_dropped() {
        let (tx, rx) = channel::<u8>();
        drop(rx);

        assert_eq!(tx.send(1).await, Err(HandoffClosed));
    }

    #[tokio::test]
    async fn test_receiver_dropped_while_offer_queued() {
        let (tx, rx) = channel::<u8>();

        let sender = tokio::spawn(async move { tx.send(7).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(rx);

        assert_eq!(sender.await.unwrap(), Err(HandoffClosed));
    }

    #[tokio::test]
    async fn test_recv_none_after_sender_dropped() {
        let (tx, mut rx) = channel::<u8>();
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }
}
