//! Producer-to-consumer handoff with an explicit capacity policy.
//!
//! [`HandoffPolicy::Rendezvous`] is a zero-buffer connection: `send`
//! completes only once the consumer has taken the item, which is what
//! couples ingestion speed to store-write speed. [`HandoffPolicy::Buffered`]
//! lets the producer run up to `n` items ahead.
//!
//! Closing is implicit: when every [`HandoffSender`] is dropped the receiver
//! drains what is already queued and then returns `None`.

use std::num::NonZeroUsize;

use tokio::sync::{mpsc, oneshot};

/// Capacity policy of a handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffPolicy {
    /// No buffering; a send waits for the matching receive.
    Rendezvous,
    /// Up to `n` items may wait for the consumer.
    Buffered(NonZeroUsize),
}

impl HandoffPolicy {
    /// Policy for a configured capacity, where `0` means rendezvous.
    pub fn from_capacity(capacity: usize) -> Self {
        NonZeroUsize::new(capacity).map_or(Self::Rendezvous, Self::Buffered)
    }
}

/// The consumer side has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("handoff receiver dropped")]
pub struct HandoffClosed;

struct Slot<T> {
    item: T,
    taken: Option<oneshot::Sender<()>>,
}

/// Sending half of a handoff.
pub struct HandoffSender<T> {
    tx: mpsc::Sender<Slot<T>>,
    policy: HandoffPolicy,
}

impl<T> Clone for HandoffSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            policy: self.policy,
        }
    }
}

impl<T> HandoffSender<T> {
    /// Hand `item` to the consumer.
    ///
    /// Under [`HandoffPolicy::Rendezvous`] this resolves only after the
    /// consumer has received the item.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffClosed`] if the receiver was dropped before taking
    /// the item.
    pub async fn send(&self, item: T) -> Result<(), HandoffClosed> {
        match self.policy {
            HandoffPolicy::Rendezvous => {
                let (taken_tx, taken_rx) = oneshot::channel();
                self.tx
                    .send(Slot {
                        item,
                        taken: Some(taken_tx),
                    })
                    .await
                    .map_err(|_closed| HandoffClosed)?;
                taken_rx.await.map_err(|_closed| HandoffClosed)
            }
            HandoffPolicy::Buffered(_) => self
                .tx
                .send(Slot { item, taken: None })
                .await
                .map_err(|_closed| HandoffClosed),
        }
    }

    /// The capacity policy of this handoff.
    pub const fn policy(&self) -> HandoffPolicy {
        self.policy
    }
}

/// Receiving half of a handoff.
pub struct HandoffReceiver<T> {
    rx: mpsc::Receiver<Slot<T>>,
}

impl<T> HandoffReceiver<T> {
    /// Take the next item, waiting if none is available.
    ///
    /// Returns `None` once all senders are dropped and nothing is queued.
    pub async fn recv(&mut self) -> Option<T> {
        let slot = self.rx.recv().await?;
        if let Some(taken) = slot.taken {
            // The sender may have given up waiting; the item is still ours.
            let _ = taken.send(());
        }
        Some(slot.item)
    }
}

/// Create a connected sender/receiver pair.
pub fn handoff<T>(policy: HandoffPolicy) -> (HandoffSender<T>, HandoffReceiver<T>) {
    let capacity = match policy {
        HandoffPolicy::Rendezvous => 1,
        HandoffPolicy::Buffered(n) => n.get(),
    };
    let (tx, rx) = mpsc::channel(capacity);
    (HandoffSender { tx, policy }, HandoffReceiver { rx })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn zero_capacity_means_rendezvous() {
        assert_eq!(HandoffPolicy::from_capacity(0), HandoffPolicy::Rendezvous);
        assert_eq!(
            HandoffPolicy::from_capacity(4),
            HandoffPolicy::Buffered(NonZeroUsize::new(4).unwrap())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rendezvous_send_waits_for_receive() {
        let (tx, mut rx) = handoff::<u32>(HandoffPolicy::Rendezvous);

        let blocked = tokio::time::timeout(Duration::from_millis(100), tx.send(1)).await;
        assert!(blocked.is_err(), "send completed without a receiver");

        let sender = tokio::spawn(async move { tx.send(2).await });
        // The timed-out send had already placed its item in the slot.
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(sender.await.unwrap(), Ok(()));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_send_runs_ahead() {
        let (tx, mut rx) = handoff::<u32>(HandoffPolicy::Buffered(NonZeroUsize::new(2).unwrap()));

        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        let third = tokio::time::timeout(Duration::from_millis(100), tx.send(3)).await;
        assert!(third.is_err(), "buffer of two accepted a third item");

        drop(tx);
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn closing_drains_pending_item() {
        let (tx, mut rx) = handoff::<&'static str>(HandoffPolicy::Rendezvous);
        let producer = tokio::spawn(async move {
            tx.send("last").await.unwrap();
        });
        assert_eq!(rx.recv().await, Some("last"));
        producer.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_gone() {
        let (tx, rx) = handoff::<u32>(HandoffPolicy::Rendezvous);
        drop(rx);
        assert_eq!(tx.send(7).await, Err(HandoffClosed));
    }
}
