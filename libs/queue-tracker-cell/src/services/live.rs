use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument};

use super::channel::TaskChannel;
use super::realtime::QueueSubscription;
use super::tracker::QueueTracker;
use crate::models::{QueueStatus, QueueUpdate};

/// Position updates for one tracked appointment.
///
/// Owns a processing task, which in turn owns the realtime subscription.
/// `close()` tears both down in order.
#[derive(Debug)]
pub struct LiveQueue {
    updates: TaskChannel<QueueUpdate>,
}

impl LiveQueue {
    pub fn start(tracker: QueueTracker, initial: QueueStatus, subscription: QueueSubscription) -> Self {
        let updates = TaskChannel::spawn(move |sender, shutdown| {
            process(tracker, initial, subscription, sender, shutdown)
        });

        Self { updates }
    }

    pub async fn recv(&mut self) -> Option<QueueUpdate> {
        self.updates.recv().await
    }

    pub async fn close(self) {
        self.updates.close().await;
    }
}

#[instrument(skip_all)]
async fn process(
    mut tracker: QueueTracker,
    initial: QueueStatus,
    mut subscription: QueueSubscription,
    sender: mpsc::Sender<QueueUpdate>,
    mut shutdown: oneshot::Receiver<()>,
) {
    info!(
        "Live queue started for appointment {}",
        tracker.appointment().appointment_id
    );

    let mut pending = tracker.apply(&initial);

    loop {
        if let Some(update) = pending.take() {
            if sender.send(update).await.is_err() {
                debug!("Live queue consumer went away");
                break;
            }
        }

        tokio::select! {
            _ = &mut shutdown => break,
            status = subscription.recv() => match status {
                Some(status) => pending = tracker.apply(&status),
                None => {
                    info!("Queue subscription ended");
                    break;
                }
            }
        }
    }

    subscription.close().await;
    debug!("Live queue stopped");
}
