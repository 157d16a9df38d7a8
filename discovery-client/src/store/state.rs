use std::collections::BTreeMap;
use shared::types::{
    Address, AddressKey, HealthPollerResult, HealthResponse, HealthStatus, InitialState,
    PortInfo, Robot, ServerHealthResponse, Service,
};

/// Events that advance the discovery state
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Replace addresses and robots with a seed
    InitializeState(InitialState),
    /// The browser saw (or lost) an advertisement
    ServiceFound(Service),
    /// One poll cycle finished for one address
    HealthPolled(HealthPollerResult),
    /// Forget a robot and every address grouped under it
    RemoveRobot(String),
    /// The serial port poller produced a fresh list
    SerialPortsPolled(Vec<PortInfo>),
}

/// Latest payloads observed for a robot across all of its addresses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotRecord {
    pub health: Option<HealthResponse>,
    pub server_health: Option<ServerHealthResponse>,
}

/// Discovery state. Only ever changed through [`State::reduce`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    pub(crate) addresses: BTreeMap<AddressKey, Address>,
    pub(crate) robots: BTreeMap<String, RobotRecord>,
    pub(crate) serial_ports: Vec<PortInfo>,
}

impl State {
    pub fn reduce(&mut self, action: Action) {
        match action {
            Action::InitializeState(seed) => self.initialize(seed),
            Action::ServiceFound(service) => self.service_found(service),
            Action::HealthPolled(result) => self.health_polled(result),
            Action::RemoveRobot(name) => self.remove_robot(&name),
            Action::SerialPortsPolled(ports) => self.serial_ports = ports,
        }
    }

    fn initialize(&mut self, seed: InitialState) {
        self.addresses.clear();
        self.robots.clear();

        for robot in seed.robots {
            for mut address in robot.addresses.iter().cloned() {
                // Seeded addresses group under their robot even if they carry no payload
                if address.robot_name() != Some(robot.name.as_str()) {
                    address.health = Some(seed_payload(&robot));
                }
                self.addresses.insert(address.key(), address);
            }

            self.robots.insert(
                robot.name,
                RobotRecord {
                    health: robot.health,
                    server_health: robot.server_health,
                },
            );
        }

        for manual in seed.manual_addresses {
            self.addresses
                .entry((manual.ip.clone(), manual.port))
                .or_insert_with(|| Address::new(manual.ip, manual.port));
        }
    }

    fn service_found(&mut self, service: Service) {
        let address = self
            .addresses
            .entry((service.ip.clone(), service.port))
            .or_insert_with(|| Address::new(service.ip, service.port));

        address.seen = service.advertising;
        if !service.name.is_empty() {
            address.advertised_name = Some(service.name);
        }
        if service.robot_model.is_some() {
            address.advertised_model = service.robot_model;
        }
    }

    fn health_polled(&mut self, result: HealthPollerResult) {
        let HealthPollerResult {
            ip,
            port,
            health,
            server_health,
        } = result;

        let address = self
            .addresses
            .entry((ip.clone(), port))
            .or_insert_with(|| Address::new(ip, port));

        let health_ok = health.is_ok();
        match health {
            Ok(payload) => {
                address.health = Some(payload);
                address.health_error = None;
                address.health_status = Some(HealthStatus::Ok);
            }
            Err(error) => {
                address.health_status = Some(error.health_status());
                address.health_error = Some(error);
            }
        }

        let server_health_ok = server_health.is_ok();
        match server_health {
            Ok(payload) => {
                address.server_health = Some(payload);
                address.server_health_error = None;
                address.server_health_status = Some(HealthStatus::Ok);
            }
            Err(error) => {
                address.server_health_status = Some(error.health_status());
                address.server_health_error = Some(error);
            }
        }

        // Most recent successful payload wins for the robot as a whole
        if let Some(name) = address.robot_name() {
            let record = self.robots.entry(name.to_string()).or_default();
            if health_ok {
                record.health = address.health.clone();
            }
            if server_health_ok {
                record.server_health = address.server_health.clone();
            }
        }
    }

    fn remove_robot(&mut self, name: &str) {
        self.addresses
            .retain(|_, address| address.robot_name() != Some(name));
        self.robots.remove(name);
    }
}

fn seed_payload(robot: &Robot) -> HealthResponse {
    let mut health = robot.health.clone().unwrap_or_default();
    health.name = robot.name.clone();
    health
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use shared::types::{HealthErrorResponse, ManualAddress};

    pub(crate) fn service(ip: &str, port: u16) -> Service {
        Service {
            name: "svc".to_string(),
            ip: ip.to_string(),
            port,
            local: false,
            advertising: true,
            robot_model: None,
        }
    }

    pub(crate) fn health(name: &str) -> HealthResponse {
        HealthResponse {
            name: name.to_string(),
            api_version: "7.0.0".to_string(),
            fw_version: "v1".to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn server_health(name: &str) -> ServerHealthResponse {
        ServerHealthResponse {
            name: name.to_string(),
            api_server_version: "7.0.0".to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn polled_ok(ip: &str, port: u16, name: &str) -> HealthPollerResult {
        HealthPollerResult {
            ip: ip.to_string(),
            port,
            health: Ok(health(name)),
            server_health: Ok(server_health(name)),
        }
    }

    pub(crate) fn polled_unreachable(ip: &str, port: u16) -> HealthPollerResult {
        HealthPollerResult {
            ip: ip.to_string(),
            port,
            health: Err(HealthErrorResponse::unreachable("connection refused")),
            server_health: Err(HealthErrorResponse::unreachable("connection refused")),
        }
    }

    fn reduced(actions: impl IntoIterator<Item = Action>) -> State {
        let mut state = State::default();
        for action in actions {
            state.reduce(action);
        }
        state
    }

    fn key(ip: &str, port: u16) -> AddressKey {
        (ip.to_string(), port)
    }

    #[test]
    fn test_service_found_creates_seen_candidate() {
        let state = reduced([Action::ServiceFound(service("10.0.0.5", 31950))]);

        let address = &state.addresses[&key("10.0.0.5", 31950)];
        assert!(address.seen);
        assert_eq!(address.advertised_name.as_deref(), Some("svc"));
        assert_eq!(address.health_status, None);
        assert_eq!(address.robot_name(), None);
    }

    #[test]
    fn test_service_found_is_idempotent() {
        let once = reduced([Action::ServiceFound(service("10.0.0.5", 31950))]);
        let twice = reduced([
            Action::ServiceFound(service("10.0.0.5", 31950)),
            Action::ServiceFound(service("10.0.0.5", 31950)),
        ]);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_service_and_health_commute() {
        let found_first = reduced([
            Action::ServiceFound(service("10.0.0.5", 31950)),
            Action::HealthPolled(polled_ok("10.0.0.5", 31950, "flex-1")),
        ]);
        let polled_first = reduced([
            Action::HealthPolled(polled_ok("10.0.0.5", 31950, "flex-1")),
            Action::ServiceFound(service("10.0.0.5", 31950)),
        ]);

        assert_eq!(found_first, polled_first);
    }

    #[test]
    fn test_withdrawn_advertisement_clears_seen() {
        let mut withdrawn = service("10.0.0.5", 31950);
        withdrawn.advertising = false;

        let state = reduced([
            Action::ServiceFound(service("10.0.0.5", 31950)),
            Action::ServiceFound(withdrawn),
        ]);

        assert!(!state.addresses[&key("10.0.0.5", 31950)].seen);
    }

    #[test]
    fn test_transport_failure_keeps_last_good_payload() {
        let state = reduced([
            Action::HealthPolled(polled_ok("10.0.0.5", 31950, "flex-1")),
            Action::HealthPolled(polled_unreachable("10.0.0.5", 31950)),
        ]);

        let address = &state.addresses[&key("10.0.0.5", 31950)];
        assert_eq!(address.health_status, Some(HealthStatus::Unreachable));
        assert_eq!(address.server_health_status, Some(HealthStatus::Unreachable));
        assert_eq!(address.health, Some(health("flex-1")));
        assert!(address.health_error.is_some());
        assert_eq!(address.robot_name(), Some("flex-1"));
    }

    #[test]
    fn test_http_error_is_not_ok_and_success_clears_it() {
        let failed = HealthPollerResult {
            ip: "10.0.0.5".to_string(),
            port: 31950,
            health: Ok(health("flex-1")),
            server_health: Err(HealthErrorResponse::not_ok(404, json!({"message": "nope"}))),
        };

        let mut state = reduced([Action::HealthPolled(failed)]);
        let address = &state.addresses[&key("10.0.0.5", 31950)];
        assert_eq!(address.health_status, Some(HealthStatus::Ok));
        assert_eq!(address.server_health_status, Some(HealthStatus::NotOk));
        assert_eq!(
            address.server_health_error,
            Some(HealthErrorResponse::not_ok(404, json!({"message": "nope"})))
        );

        state.reduce(Action::HealthPolled(polled_ok("10.0.0.5", 31950, "flex-1")));
        let address = &state.addresses[&key("10.0.0.5", 31950)];
        assert_eq!(address.server_health_status, Some(HealthStatus::Ok));
        assert_eq!(address.server_health_error, None);
    }

    #[test]
    fn test_most_recent_payload_wins_for_robot() {
        let mut newer = health("flex-1");
        newer.fw_version = "v2".to_string();

        let state = reduced([
            Action::HealthPolled(polled_ok("10.0.0.5", 31950, "flex-1")),
            Action::HealthPolled(HealthPollerResult {
                ip: "10.0.0.6".to_string(),
                port: 31950,
                health: Ok(newer.clone()),
                server_health: Err(HealthErrorResponse::unreachable("timed out")),
            }),
        ]);

        let record = &state.robots["flex-1"];
        assert_eq!(record.health, Some(newer));
        assert_eq!(record.server_health, Some(server_health("flex-1")));
    }

    #[test]
    fn test_remove_robot_removes_all_grouped_addresses() {
        let mut state = reduced([
            Action::HealthPolled(polled_ok("10.0.0.5", 31950, "flex-1")),
            Action::HealthPolled(polled_ok("10.0.0.6", 31950, "flex-1")),
            Action::HealthPolled(polled_ok("10.0.0.7", 31950, "ot2")),
            Action::ServiceFound(service("10.0.0.8", 31950)),
        ]);

        state.reduce(Action::RemoveRobot("flex-1".to_string()));

        let remaining: Vec<_> = state.addresses.keys().cloned().collect();
        assert_eq!(remaining, vec![key("10.0.0.7", 31950), key("10.0.0.8", 31950)]);
        assert!(!state.robots.contains_key("flex-1"));
    }

    #[test]
    fn test_initialize_replaces_addresses_and_keeps_serial_ports() {
        let port = PortInfo {
            path: "/dev/ttyACM0".to_string(),
            name: "ttyACM0".to_string(),
            manufacturer: None,
            serial_number: None,
            vendor_id: None,
            product_id: None,
        };

        let mut state = reduced([
            Action::HealthPolled(polled_ok("10.0.0.5", 31950, "flex-1")),
            Action::SerialPortsPolled(vec![port.clone()]),
        ]);

        state.reduce(Action::InitializeState(InitialState {
            robots: vec![Robot {
                name: "ot2".to_string(),
                health: None,
                server_health: None,
                addresses: vec![Address::new("10.0.0.9", 31950)],
            }],
            manual_addresses: vec![ManualAddress {
                ip: "192.168.1.20".to_string(),
                port: 31950,
            }],
        }));

        assert_eq!(state.serial_ports, vec![port]);
        assert!(!state.addresses.contains_key(&key("10.0.0.5", 31950)));
        assert_eq!(
            state.addresses[&key("10.0.0.9", 31950)].robot_name(),
            Some("ot2")
        );
        assert_eq!(state.addresses[&key("192.168.1.20", 31950)].robot_name(), None);
        assert!(state.robots.contains_key("ot2"));
    }
}
