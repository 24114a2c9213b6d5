//! Queue-backed reconcile dispatch with bounded parallelism.

use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};

use crate::cluster::ClusterEvent;
use crate::controller::ReceiverController;

#[derive(Clone, Copy, Debug)]
pub struct DispatcherOptions {
    pub max_concurrent_reconciles: usize,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            max_concurrent_reconciles: 4,
        }
    }
}

/// Consumes control-plane events until the channel closes, spawning one
/// reconcile per affected receiver. At most `max_concurrent_reconciles`
/// reconciles run at a time; excess work waits for a permit.
///
/// A failed reconcile is logged; the control plane re-delivers the event.
pub async fn run(
    controller: Arc<ReceiverController>,
    mut events: mpsc::Receiver<ClusterEvent>,
    options: DispatcherOptions,
) {
    let semaphore = Arc::new(Semaphore::new(options.max_concurrent_reconciles.max(1)));

    while let Some(event) = events.recv().await {
        let keys = match controller.affected(&event).await {
            Ok(keys) => keys,
            Err(err) => {
                tracing::error!(error = %err, event = ?event, "failed to map event to receivers");
                continue;
            }
        };

        for key in keys {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                return;
            };
            let controller = Arc::clone(&controller);

            tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = controller.reconcile(&key).await {
                    tracing::error!(
                        error = %err,
                        namespace = %key.namespace,
                        name = %key.name,
                        "reconcile failed"
                    );
                }
            });
        }
    }
}
