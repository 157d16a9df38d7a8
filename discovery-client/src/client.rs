//! Discovery orchestrator.
//!
//! Ties the store, the health poller, the mDNS browser and the serial port
//! poller together and tells the outside world when the robot list changes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use shared::types::{Address, HealthPollerResult, PortInfo, Robot, Service};
use crate::config::Config;
use crate::error::Result;
use crate::health::{probe, HealthPoller};
use crate::mdns::browser;
use crate::serial;
use crate::store::{Action, Snapshot};
use crate::store_manager::StoreHandle;

/// Called with the full robot list every time it changes
pub type ListChangeCallback = Arc<dyn Fn(&[Robot]) + Send + Sync>;

/// Background work belonging to one `start`
struct Running {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    commands: mpsc::Sender<LoopCommand>,
    #[cfg(test)]
    services: mpsc::Sender<Service>,
    #[cfg(test)]
    serial_ports: mpsc::Sender<Vec<PortInfo>>,
}

/// Requests served by the event loop so they are ordered with poll results
enum LoopCommand {
    RemoveRobot(String, oneshot::Sender<Result<()>>),
}

/// Finds robots on the local network and keeps their health up to date.
///
/// Idle after construction. `start` begins discovery, `stop` ends it; both may
/// be called any number of times. Reads and `remove_robot` work in either state.
pub struct DiscoveryClient {
    store: StoreHandle,
    on_list_change: ListChangeCallback,
    running: Option<Running>,
}

impl DiscoveryClient {
    pub fn new<F>(on_list_change: F) -> Self
    where
        F: Fn(&[Robot]) + Send + Sync + 'static,
    {
        Self {
            store: StoreHandle::spawn(),
            on_list_change: Arc::new(on_list_change),
            running: None,
        }
    }

    /// Seed the store from `config` and start discovering. A running client is
    /// stopped first. Must be called from within a tokio runtime.
    pub async fn start(&mut self, config: Config) -> Result<()> {
        self.stop().await;

        let http = probe::build_client(config.poller.request_timeout())?;
        self.store
            .dispatch(Action::InitializeState(config.initial.clone()))
            .await?;

        let mut subscription = self.store.subscribe();
        let initial = subscription.borrow_and_update().clone();

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let (results_tx, results_rx) = mpsc::channel(256);
        let mut poller = HealthPoller::new(http, results_tx, config.poller.max_concurrent_probes);
        poller.start(&initial.addresses, config.poller.interval());

        let (services_tx, services_rx) = mpsc::channel(256);
        #[cfg(test)]
        let services = services_tx.clone();
        if config.browser.enabled {
            let browser_config = config.browser.clone();
            let browser_cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = browser::run_browser(browser_config, services_tx, browser_cancel).await {
                    tracing::error!("mDNS browser error: {:#}", e);
                }
            }));
        }

        let (serial_tx, serial_rx) = mpsc::channel(16);
        #[cfg(test)]
        let serial_ports = serial_tx.clone();
        if config.serial.enabled {
            tasks.push(tokio::spawn(serial::run_serial_poller(
                config.serial.interval(),
                serial_tx,
                cancel.clone(),
            )));
        }

        let event_loop = EventLoop {
            store: self.store.clone(),
            poller,
            interval: config.poller.interval(),
            on_list_change: self.on_list_change.clone(),
            addresses: initial.addresses,
            robots: initial.robots,
        };
        let (commands, commands_rx) = mpsc::channel(16);
        tasks.push(tokio::spawn(event_loop.run(
            subscription,
            commands_rx,
            services_rx,
            results_rx,
            serial_rx,
            cancel.clone(),
        )));

        tracing::info!(
            "Discovery started with {} known addresses, polling every {:?}",
            self.store.addresses().len(),
            config.poller.interval()
        );
        self.running = Some(Running {
            cancel,
            tasks,
            commands,
            #[cfg(test)]
            services,
            #[cfg(test)]
            serial_ports,
        });
        Ok(())
    }

    /// Stop discovering. Once this returns no callback fires until the next
    /// `start`. Does nothing when idle.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.cancel.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                tracing::error!("Discovery task failed: {}", e);
            }
        }

        tracing::info!("Discovery stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Forget a robot and every address grouped under it.
    ///
    /// While running, the removal is applied by the event loop so that a poll
    /// result it already accepted cannot bring the robot back.
    pub async fn remove_robot(&self, name: &str) -> Result<()> {
        tracing::info!("Removing robot {}", name);

        if let Some(running) = &self.running {
            let (reply, rx) = oneshot::channel();
            let command = LoopCommand::RemoveRobot(name.to_string(), reply);
            if running.commands.send(command).await.is_ok() {
                if let Ok(result) = rx.await {
                    return result;
                }
            }
            tracing::debug!("Event loop gone, removing {} directly", name);
        }

        self.store.dispatch(Action::RemoveRobot(name.to_string())).await?;
        Ok(())
    }

    pub fn robots(&self) -> Arc<Vec<Robot>> {
        self.store.robots()
    }

    pub fn addresses(&self) -> Arc<Vec<Address>> {
        self.store.addresses()
    }

    pub fn serial_ports(&self) -> Arc<Vec<PortInfo>> {
        self.store.serial_ports()
    }

    /// Stop discovering and release the store
    pub async fn shutdown(mut self) -> Result<()> {
        self.stop().await;
        self.store.shutdown().await
    }
}

impl Drop for DiscoveryClient {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            tracing::warn!("Discovery client dropped while still running");
            running.cancel.cancel();
        }
    }
}

/// State owned by the task that bridges producers into the store
struct EventLoop {
    store: StoreHandle,
    poller: HealthPoller,
    interval: Duration,
    on_list_change: ListChangeCallback,
    addresses: Arc<Vec<Address>>,
    robots: Arc<Vec<Robot>>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut subscription: watch::Receiver<Snapshot>,
        mut commands_rx: mpsc::Receiver<LoopCommand>,
        mut services_rx: mpsc::Receiver<Service>,
        mut results_rx: mpsc::Receiver<HealthPollerResult>,
        mut serial_rx: mpsc::Receiver<Vec<PortInfo>>,
        cancel: CancellationToken,
    ) {
        loop {
            let action = tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                changed = subscription.changed() => {
                    if changed.is_err() {
                        tracing::error!("Discovery store closed");
                        break;
                    }
                    let snapshot = subscription.borrow_and_update().clone();
                    self.on_snapshot(snapshot);
                    continue;
                }

                Some(command) = commands_rx.recv() => {
                    match command {
                        LoopCommand::RemoveRobot(name, reply) => {
                            let result = self.store.dispatch(Action::RemoveRobot(name)).await.map(|_| ());
                            // Retire the removed addresses' poll tasks before the next result
                            let snapshot = subscription.borrow_and_update().clone();
                            self.on_snapshot(snapshot);

                            let failed = result.is_err();
                            let _ = reply.send(result);
                            if failed {
                                tracing::error!("Discovery store closed");
                                break;
                            }
                        }
                    }
                    continue;
                }

                Some(service) = services_rx.recv() => Action::ServiceFound(service),

                Some(result) = results_rx.recv() => {
                    if !self.poller.is_polling(&(result.ip.clone(), result.port)) {
                        tracing::trace!("Discarding stale result for {}:{}", result.ip, result.port);
                        continue;
                    }
                    Action::HealthPolled(result)
                }

                Some(ports) = serial_rx.recv() => Action::SerialPortsPolled(ports),
            };

            if let Err(e) = self.store.dispatch(action).await {
                tracing::error!("Failed to dispatch discovery event: {}", e);
                break;
            }
        }

        // Poll tasks may be parked on a full channel; nothing reads it past here
        drop(results_rx);
        self.poller.shutdown().await;
    }

    fn on_snapshot(&mut self, snapshot: Snapshot) {
        if !Arc::ptr_eq(&snapshot.addresses, &self.addresses) {
            tracing::debug!("Address list changed, {} addresses", snapshot.addresses.len());
            self.poller.start(&snapshot.addresses, self.interval);
            self.addresses = snapshot.addresses;
        }

        if !Arc::ptr_eq(&snapshot.robots, &self.robots) {
            tracing::info!("Robot list changed, {} robots", snapshot.robots.len());
            self.robots = snapshot.robots;
            (self.on_list_change)(self.robots.as_slice());
        }
    }
}
