use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use shared::types::{Address, AddressKey, HealthPollerResult};
use super::probe;

/// The single poll task owned for one address
struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Polls every address in a list on a fixed interval.
///
/// Each address is driven by exactly one task, so cycles for one address never
/// overlap. Restarting with a new list keeps the tasks of addresses present in
/// both lists and cancels the rest.
pub struct HealthPoller {
    client: reqwest::Client,
    results_tx: mpsc::Sender<HealthPollerResult>,
    limiter: Arc<Semaphore>,
    interval: Option<Duration>,
    tasks: HashMap<AddressKey, PollTask>,
}

impl HealthPoller {
    pub fn new(
        client: reqwest::Client,
        results_tx: mpsc::Sender<HealthPollerResult>,
        max_concurrent_probes: usize,
    ) -> Self {
        Self {
            client,
            results_tx,
            limiter: Arc::new(Semaphore::new(max_concurrent_probes.max(1))),
            interval: None,
            tasks: HashMap::new(),
        }
    }

    /// Start polling `list`, superseding whatever was polled before.
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, list: &[Address], interval: Duration) {
        if self.interval != Some(interval) {
            self.stop();
            self.interval = Some(interval);
        }

        let wanted: HashMap<AddressKey, &Address> =
            list.iter().map(|address| (address.key(), address)).collect();

        self.tasks.retain(|key, task| {
            if wanted.contains_key(key) {
                true
            } else {
                tracing::debug!("Stopped polling {}:{}", key.0, key.1);
                task.cancel.cancel();
                false
            }
        });

        for (key, address) in wanted {
            if self.tasks.contains_key(&key) {
                continue;
            }

            tracing::debug!("Polling {}:{} every {:?}", key.0, key.1, interval);
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(poll_loop(
                self.client.clone(),
                Address::new(address.ip.clone(), address.port),
                interval,
                self.limiter.clone(),
                self.results_tx.clone(),
                cancel.clone(),
            ));
            self.tasks.insert(key, PollTask { cancel, handle });
        }
    }

    /// Cancel every poll task. Safe to call repeatedly.
    pub fn stop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.cancel.cancel();
        }
        self.interval = None;
    }

    /// Whether results for `key` belong to the current list
    pub fn is_polling(&self, key: &AddressKey) -> bool {
        self.tasks.contains_key(key)
    }

    /// Number of addresses currently being polled
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every task and wait for them to finish
    pub async fn shutdown(&mut self) {
        let tasks: Vec<PollTask> = self.tasks.drain().map(|(_, task)| task).collect();
        self.interval = None;

        for task in &tasks {
            task.cancel.cancel();
        }
        for task in tasks {
            let _ = task.handle.await;
        }
    }
}

impl Drop for HealthPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One address, one cycle at a time, until cancelled
async fn poll_loop(
    client: reqwest::Client,
    address: Address,
    interval: Duration,
    limiter: Arc<Semaphore>,
    results_tx: mpsc::Sender<HealthPollerResult>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let cycle = async {
            let _permit = limiter.acquire().await.ok();
            probe::poll_address(&client, &address).await
        };

        // A cancelled cycle is dropped mid-flight and its result discarded
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = cycle => result,
        };

        // The receiver may have stopped draining, so a full channel must not
        // outlive cancellation
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = results_tx.send(result) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    tracing::trace!("Poll task for {}:{} stopped", address.ip, address.port);
}
