use std::sync::Arc;
use std::thread;
use tokio::sync::{mpsc, oneshot, watch};
use shared::types::{Address, PortInfo, Robot};
use crate::error::{DiscoveryError, Result};
use crate::store::{Action, Snapshot, State};

/// Commands sent to the store thread
pub enum StoreCommand {
    Dispatch(Action, oneshot::Sender<bool>),
    Shutdown,
}

/// Handle to the store thread, the single owner of the discovery state.
///
/// Commands are applied one at a time in arrival order. Projections are
/// published on a watch channel after every change.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
    snapshot_rx: watch::Receiver<Snapshot>,
}

impl StoreHandle {
    /// Spawn a new store thread with empty state
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());

        thread::spawn(move || {
            let mut state = State::default();

            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::Dispatch(action, reply) => {
                        state.reduce(action);
                        // Only notify subscribers when a projection was replaced
                        let changed = snapshot_tx.send_if_modified(|current| {
                            let next = current.derive(&state);
                            if next.same_as(current) {
                                false
                            } else {
                                *current = next;
                                true
                            }
                        });
                        let _ = reply.send(changed);
                    }
                    StoreCommand::Shutdown => {
                        tracing::debug!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx, snapshot_rx }
    }

    /// Apply an action. Returns true if any projection changed.
    pub async fn dispatch(&self, action: Action) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Dispatch(action, reply))
            .await
            .map_err(|_| DiscoveryError::StoreClosed)?;
        rx.await.map_err(|_| DiscoveryError::StoreClosed)
    }

    /// Current projections
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn addresses(&self) -> Arc<Vec<Address>> {
        Arc::clone(&self.snapshot_rx.borrow().addresses)
    }

    pub fn robots(&self) -> Arc<Vec<Robot>> {
        Arc::clone(&self.snapshot_rx.borrow().robots)
    }

    pub fn serial_ports(&self) -> Arc<Vec<PortInfo>> {
        Arc::clone(&self.snapshot_rx.borrow().serial_ports)
    }

    /// Subscribe to projection changes. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_rx.clone()
    }

    /// Stop the store thread. Later dispatches fail with `StoreClosed`.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .map_err(|_| DiscoveryError::StoreClosed)
    }
}
