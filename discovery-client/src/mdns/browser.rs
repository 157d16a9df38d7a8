use std::collections::HashMap;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::Future;
use anyhow::{Context, Result};
use shared::protocol::TXT_ROBOT_MODEL;
use shared::types::{is_local_ip, AddressKey, Service};
use crate::config::BrowserConfig;

type RecvResult = (usize, flume::Receiver<ServiceEvent>, std::result::Result<ServiceEvent, flume::RecvError>);
type RecvFuture = Pin<Box<dyn Future<Output = RecvResult> + Send>>;

/// Each future owns a clone of the receiver, avoiding borrow issues with the
/// receivers vec. flume::Receiver is Clone (multi-consumer).
fn make_recv_future(idx: usize, rx: flume::Receiver<ServiceEvent>) -> RecvFuture {
    Box::pin(async move {
        let result = rx.recv_async().await;
        (idx, rx, result)
    })
}

/// Browse the configured service types and report every advertised address
/// on a configured port until `cancel` fires.
pub async fn run_browser(
    config: BrowserConfig,
    tx: mpsc::Sender<Service>,
    cancel: CancellationToken,
) -> Result<()> {
    let daemon = ServiceDaemon::new().context("Failed to create mDNS daemon")?;

    if let Some(interface) = &config.interface {
        daemon
            .disable_interface(mdns_sd::IfKind::All)
            .context("Failed to disable default interfaces")?;
        daemon
            .enable_interface(interface.as_str())
            .with_context(|| format!("Failed to enable interface {}", interface))?;
    }

    let result = browse(&daemon, &config, &tx, &cancel).await;

    if let Err(e) = daemon.shutdown() {
        tracing::error!("Failed to shutdown mDNS daemon: {}", e);
    }

    result
}

async fn browse(
    daemon: &ServiceDaemon,
    config: &BrowserConfig,
    tx: &mpsc::Sender<Service>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut type_futures: FuturesUnordered<RecvFuture> = FuturesUnordered::new();
    for (idx, service_type) in config.service_types.iter().enumerate() {
        let receiver = daemon
            .browse(service_type)
            .with_context(|| format!("Failed to browse {}", service_type))?;
        tracing::info!("Browsing {} on ports {:?}", service_type, config.ports);
        type_futures.push(make_recv_future(idx, receiver));
    }

    // Addresses last resolved per instance, reported again on withdrawal
    let mut resolved: HashMap<String, Vec<Service>> = HashMap::new();

    loop {
        tokio::select! {
            Some((idx, rx, result)) = type_futures.next() => {
                match result {
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        let services = convert_service_info(&info, &config.ports);
                        for service in &services {
                            tracing::debug!("Resolved {} at {}:{}", service.name, service.ip, service.port);
                            if tx.send(service.clone()).await.is_err() {
                                return Ok(());
                            }
                        }
                        if !services.is_empty() {
                            resolved.insert(info.get_fullname().to_string(), services);
                        }
                        type_futures.push(make_recv_future(idx, rx));
                    }
                    Ok(ServiceEvent::ServiceRemoved(_typ, fullname)) => {
                        tracing::debug!("Service removed: {}", fullname);
                        if let Some(services) = resolved.remove(&fullname) {
                            for service in withdrawn(services) {
                                if tx.send(service).await.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                        type_futures.push(make_recv_future(idx, rx));
                    }
                    Ok(_) => {
                        type_futures.push(make_recv_future(idx, rx));
                    }
                    Err(e) => {
                        tracing::warn!("Receiver {} disconnected: {}", idx, e);
                    }
                }
            }

            _ = cancel.cancelled() => {
                tracing::info!("mDNS browser shutting down");
                break;
            }
        }
    }

    Ok(())
}

/// Convert an mdns-sd ServiceInfo to one Service per address, keeping only
/// advertisements on one of `ports`
fn convert_service_info(info: &ServiceInfo, ports: &[u16]) -> Vec<Service> {
    let port = info.get_port();
    if !ports.contains(&port) {
        tracing::trace!("Skipping {} on unwatched port {}", info.get_fullname(), port);
        return Vec::new();
    }

    let name = instance_name(info.get_fullname(), info.get_type());
    let robot_model = info.get_property_val_str(TXT_ROBOT_MODEL).map(str::to_string);

    let mut ips: Vec<String> = info.get_addresses().iter().map(|ip| ip.to_string()).collect();
    ips.sort();

    ips.into_iter()
        .map(|ip| Service {
            name: name.clone(),
            local: is_local_ip(&ip),
            ip,
            port,
            advertising: true,
            robot_model: robot_model.clone(),
        })
        .collect()
}

/// "flex-1._http._tcp.local." -> "flex-1"
fn instance_name(fullname: &str, service_type: &str) -> String {
    fullname
        .strip_suffix(service_type)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or(fullname)
        .to_string()
}

fn withdrawn(services: Vec<Service>) -> Vec<Service> {
    let mut seen: Vec<AddressKey> = Vec::new();
    services
        .into_iter()
        .filter(|service| {
            let key = (service.ip.clone(), service.port);
            let first = !seen.contains(&key);
            seen.push(key);
            first
        })
        .map(|service| Service {
            advertising: false,
            ..service
        })
        .collect()
}
