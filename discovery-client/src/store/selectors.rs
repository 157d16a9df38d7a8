use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use shared::types::{Address, HealthStatus, PortInfo, Robot};
use super::state::State;

/// Derived projections of the state.
///
/// Each projection is only replaced when its content changes, so
/// `Arc::ptr_eq` against a previous snapshot tells whether anything changed.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub addresses: Arc<Vec<Address>>,
    pub robots: Arc<Vec<Robot>>,
    pub serial_ports: Arc<Vec<PortInfo>>,
}

impl Snapshot {
    /// Recompute projections from `state`, reusing unchanged ones from `self`
    pub fn derive(&self, state: &State) -> Snapshot {
        Snapshot {
            addresses: reuse(&self.addresses, addresses(state)),
            robots: reuse(&self.robots, robots(state)),
            serial_ports: reuse(&self.serial_ports, serial_ports(state)),
        }
    }

    /// True if no projection was replaced between `self` and `other`
    pub fn same_as(&self, other: &Snapshot) -> bool {
        Arc::ptr_eq(&self.addresses, &other.addresses)
            && Arc::ptr_eq(&self.robots, &other.robots)
            && Arc::ptr_eq(&self.serial_ports, &other.serial_ports)
    }
}

fn reuse<T: PartialEq>(previous: &Arc<Vec<T>>, next: Vec<T>) -> Arc<Vec<T>> {
    if **previous == next {
        Arc::clone(previous)
    } else {
        Arc::new(next)
    }
}

/// Every known address, ordered by `(ip, port)`
pub fn addresses(state: &State) -> Vec<Address> {
    state.addresses.values().cloned().collect()
}

/// Addresses grouped by their last known robot name. Addresses that never
/// reported a name are left out.
pub fn robots(state: &State) -> Vec<Robot> {
    let mut grouped: BTreeMap<&str, Vec<&Address>> = BTreeMap::new();
    for address in state.addresses.values() {
        if let Some(name) = address.robot_name() {
            grouped.entry(name).or_default().push(address);
        }
    }

    grouped
        .into_iter()
        .map(|(name, mut addresses)| {
            addresses.sort_by(|a, b| compare_preference(a, b));

            let record = state.robots.get(name);
            let health = record
                .and_then(|r| r.health.clone())
                .or_else(|| addresses.iter().find_map(|a| a.health.clone()));
            let server_health = record
                .and_then(|r| r.server_health.clone())
                .or_else(|| addresses.iter().find_map(|a| a.server_health.clone()));

            Robot {
                name: name.to_string(),
                health,
                server_health,
                addresses: addresses.into_iter().cloned().collect(),
            }
        })
        .collect()
}

pub fn serial_ports(state: &State) -> Vec<PortInfo> {
    state.serial_ports.clone()
}

/// Healthy, then server-healthy, then non-local, then advertised addresses first
fn compare_preference(a: &Address, b: &Address) -> Ordering {
    let rank = |address: &Address| {
        (
            address.health_status != Some(HealthStatus::Ok),
            address.server_health_status != Some(HealthStatus::Ok),
            address.is_local(),
            !address.seen,
        )
    };

    rank(a)
        .cmp(&rank(b))
        .then_with(|| a.ip.cmp(&b.ip))
        .then_with(|| a.port.cmp(&b.port))
}
