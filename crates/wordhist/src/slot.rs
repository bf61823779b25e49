//! Single-slot handoff between a job's producer and consumer.
//!
//! The slot is a bounded channel of capacity one, so at any instant it is
//! either empty or holds exactly one unconsumed word. Both halves watch the
//! job's [`CancellationToken`]: a producer parked on a full slot and a consumer
//! parked on an empty one are both woken by cancellation even when no word
//! moves.
//!
//! A word counts as *placed* once [`SlotSender::place`] returns
//! [`Placement::Placed`]. Every placed word is delivered to the consumer
//! exactly once, including words still sitting in the slot when cancellation
//! arrives; [`SlotReceiver::drain`] hands those over.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outcome of offering a word to the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The word is in the slot and will be consumed.
    Placed,
    /// Cancellation was observed first; nothing was placed.
    Cancelled,
    /// The consumer is gone; nothing was placed.
    Closed,
}

/// Creates a connected producer/consumer pair sharing `token`.
pub fn handoff<T>(token: CancellationToken) -> (SlotSender<T>, SlotReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (
        SlotSender {
            tx,
            token: token.clone(),
        },
        SlotReceiver { rx, token },
    )
}

/// Producer half of the slot.
#[derive(Debug)]
pub struct SlotSender<T> {
    tx: mpsc::Sender<T>,
    token: CancellationToken,
}

impl<T> SlotSender<T> {
    /// Waits for the slot to be empty, then places the value produced by
    /// `fetch`.
    ///
    /// `fetch` runs only after the slot has room, so a word is never taken
    /// from the source unless it is placed.
    pub async fn place_with<F>(&self, fetch: F) -> Placement
    where
        F: FnOnce() -> T,
    {
        tokio::select! {
            biased;
            () = self.token.cancelled() => Placement::Cancelled,
            permit = self.tx.reserve() => match permit {
                Ok(permit) => {
                    permit.send(fetch());
                    Placement::Placed
                }
                Err(_) => Placement::Closed,
            },
        }
    }

    /// Waits for the slot to be empty, then places `value`.
    pub async fn place(&self, value: T) -> Placement {
        self.place_with(move || value).await
    }

    /// Resolves once the job has been cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Consumer half of the slot.
#[derive(Debug)]
pub struct SlotReceiver<T> {
    rx: mpsc::Receiver<T>,
    token: CancellationToken,
}

impl<T> SlotReceiver<T> {
    /// Waits for the slot to fill and empties it.
    ///
    /// Returns `None` once cancellation is observed or the producer is gone.
    /// A word that is already in the slot is returned even if cancellation has
    /// been requested; the rest is collected with [`drain`].
    ///
    /// [`drain`]: SlotReceiver::drain
    pub async fn take(&mut self) -> Option<T> {
        tokio::select! {
            biased;
            value = self.rx.recv() => value,
            () = self.token.cancelled() => None,
        }
    }

    /// Closes the slot and hands every word that was placed but not yet taken
    /// to `sink`.
    ///
    /// Waits for a producer that already secured the slot before the close to
    /// finish placing, so a word that was reported as placed is never lost.
    pub async fn drain(mut self, mut sink: impl FnMut(T)) -> usize {
        self.rx.close();
        let mut drained = 0;
        while let Some(value) = self.rx.recv().await {
            sink(value);
            drained += 1;
        }
        drained
    }
}
