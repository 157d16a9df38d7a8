use std::collections::BTreeMap;
use std::net::IpAddr;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::protocol::DEFAULT_PORT;

/// Identity key of an address record
pub type AddressKey = (String, u16);

/// Outcome of one health request: the parsed payload or the captured failure
pub type PollOutcome<T> = Result<T, HealthErrorResponse>;

/// Reachability of one health endpoint on one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthStatus {
    /// The request never got an HTTP response
    Unreachable,
    /// The endpoint answered with a non-success status
    NotOk,
    /// The endpoint answered with a success status
    Ok,
}

/// `GET /health` response body.
/// Unknown fields are kept in `extra` so newer robots still parse, and a field
/// of an unexpected type falls back to its default instead of failing the body.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub api_version: String,
    #[serde(default, deserialize_with = "lenient")]
    pub fw_version: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub system_version: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub protocol_api_version: Option<Vec<u32>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub robot_model: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub robot_serial: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `GET /server/update/health` response body
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHealthResponse {
    #[serde(default, deserialize_with = "lenient")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient")]
    pub api_server_version: String,
    #[serde(default, deserialize_with = "lenient")]
    pub update_server_version: String,
    #[serde(default, deserialize_with = "lenient")]
    pub smoothie_version: String,
    #[serde(default, deserialize_with = "lenient")]
    pub system_version: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Deserialize a payload field, falling back to its default when the value
/// has an unexpected type
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Failure captured from the most recent attempt against a health endpoint.
/// `status` is `None` when the request failed at the transport level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthErrorResponse {
    pub status: Option<u16>,
    pub body: Value,
}

impl HealthErrorResponse {
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            status: None,
            body: Value::String(message.into()),
        }
    }

    pub fn not_ok(status: u16, body: Value) -> Self {
        Self {
            status: Some(status),
            body,
        }
    }

    /// Status this failure downgrades an endpoint to
    pub fn health_status(&self) -> HealthStatus {
        match self.status {
            Some(_) => HealthStatus::NotOk,
            None => HealthStatus::Unreachable,
        }
    }
}

/// Uniform outcome of one poll cycle against one address
#[derive(Debug, Clone, PartialEq)]
pub struct HealthPollerResult {
    pub ip: String,
    pub port: u16,
    pub health: PollOutcome<HealthResponse>,
    pub server_health: PollOutcome<ServerHealthResponse>,
}

/// A service advertisement reported by the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Advertised instance name (display hint only)
    pub name: String,
    pub ip: String,
    pub port: u16,
    /// Loopback or link-local address
    pub local: bool,
    /// False when the advertisement was withdrawn
    pub advertising: bool,
    pub robot_model: Option<String>,
}

/// One `(ip, port)` network path to a device and everything known about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub health_status: Option<HealthStatus>,
    #[serde(default)]
    pub server_health_status: Option<HealthStatus>,
    #[serde(default)]
    pub health: Option<HealthResponse>,
    #[serde(default)]
    pub server_health: Option<ServerHealthResponse>,
    #[serde(default)]
    pub health_error: Option<HealthErrorResponse>,
    #[serde(default)]
    pub server_health_error: Option<HealthErrorResponse>,
    #[serde(default)]
    pub advertised_name: Option<String>,
    #[serde(default)]
    pub advertised_model: Option<String>,
}

impl Address {
    /// A candidate address: known, never advertised, never polled
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            seen: false,
            health_status: None,
            server_health_status: None,
            health: None,
            server_health: None,
            health_error: None,
            server_health_error: None,
            advertised_name: None,
            advertised_model: None,
        }
    }

    pub fn key(&self) -> AddressKey {
        (self.ip.clone(), self.port)
    }

    /// Robot name from the last successful payloads, preferring `/health`
    pub fn robot_name(&self) -> Option<&str> {
        let from_health = self.health.as_ref().map(|h| h.name.as_str());
        let from_server = self.server_health.as_ref().map(|h| h.name.as_str());

        from_health
            .filter(|name| !name.is_empty())
            .or_else(|| from_server.filter(|name| !name.is_empty()))
    }

    pub fn is_local(&self) -> bool {
        is_local_ip(&self.ip)
    }

    /// URL of `path` on this address, bracketing IPv6 literals
    pub fn url(&self, path: &str) -> String {
        if self.ip.contains(':') {
            format!("http://[{}]:{}{}", self.ip, self.port, path)
        } else {
            format!("http://{}:{}{}", self.ip, self.port, path)
        }
    }
}

/// A reconciled device identity spanning one or more addresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Robot {
    pub name: String,
    #[serde(default)]
    pub health: Option<HealthResponse>,
    #[serde(default)]
    pub server_health: Option<ServerHealthResponse>,
    #[serde(default)]
    pub addresses: Vec<Address>,
}

/// A serial device visible to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub path: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
}

/// A user-supplied address to poll even if it is never advertised
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualAddress {
    pub ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Seed applied when discovery starts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    #[serde(default)]
    pub robots: Vec<Robot>,
    #[serde(default)]
    pub manual_addresses: Vec<ManualAddress>,
}

/// True for loopback and link-local addresses. Hostnames are never local.
pub fn is_local_ip(ip: &str) -> bool {
    // IPv6 literals may carry a zone id, e.g. "fe80::1%eth0"
    let bare = ip.split('%').next().unwrap_or(ip);

    match bare.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback() || v4.is_link_local(),
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || (v6.segments()[0] & 0xffc0) == 0xfe80,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mistyped_fields_fall_back_to_defaults() {
        let health: HealthResponse = serde_json::from_str(
            r#"{"name": "flex-1", "api_version": 7, "protocol_api_version": ["2", "15"], "robot_model": "OT-3 Standard"}"#,
        )
        .unwrap();
        assert_eq!(health.name, "flex-1");
        assert_eq!(health.api_version, "");
        assert_eq!(health.protocol_api_version, None);
        assert_eq!(health.robot_model.as_deref(), Some("OT-3 Standard"));

        let server: ServerHealthResponse =
            serde_json::from_str(r#"{"name": "flex-1", "capabilities": {"x": true}, "futureField": 1}"#)
                .unwrap();
        assert_eq!(server.name, "flex-1");
        assert_eq!(server.capabilities, None);
        assert_eq!(server.extra.get("futureField"), Some(&Value::from(1)));
    }

    #[test]
    fn test_health_status_wire_names() {
        assert_eq!(serde_json::to_string(&HealthStatus::NotOk).unwrap(), "\"notOk\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Unreachable).unwrap(), "\"unreachable\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Ok).unwrap(), "\"ok\"");
    }

    #[test]
    fn test_health_response_keeps_unknown_fields() {
        let json = r#"{
            "name": "flex-1",
            "api_version": "7.0.0",
            "fw_version": "v1.2",
            "protocol_api_version": [2, 15],
            "board_revision": "2.1"
        }"#;

        let health: HealthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(health.name, "flex-1");
        assert_eq!(health.protocol_api_version, Some(vec![2, 15]));
        assert_eq!(health.system_version, None);
        assert_eq!(health.extra.get("board_revision"), Some(&Value::from("2.1")));
    }

    #[test]
    fn test_server_health_uses_camel_case() {
        let json = r#"{
            "name": "flex-1",
            "apiServerVersion": "7.0.0",
            "updateServerVersion": "7.0.0",
            "smoothieVersion": "unimplemented",
            "systemVersion": "1.0",
            "capabilities": {"buildrootUpdate": "/server/update/begin"}
        }"#;

        let health: ServerHealthResponse = serde_json::from_str(json).unwrap();
        assert_eq!(health.api_server_version, "7.0.0");
        assert_eq!(
            health.capabilities.unwrap().get("buildrootUpdate").map(String::as_str),
            Some("/server/update/begin")
        );
    }

    #[test]
    fn test_robot_name_prefers_health() {
        let mut address = Address::new("10.0.0.5", 31950);
        assert_eq!(address.robot_name(), None);

        address.server_health = Some(ServerHealthResponse {
            name: "from-server".to_string(),
            ..Default::default()
        });
        assert_eq!(address.robot_name(), Some("from-server"));

        address.health = Some(HealthResponse {
            name: "from-health".to_string(),
            ..Default::default()
        });
        assert_eq!(address.robot_name(), Some("from-health"));

        address.health = Some(HealthResponse::default());
        assert_eq!(address.robot_name(), Some("from-server"), "empty names are ignored");
    }

    #[test]
    fn test_url_brackets_ipv6() {
        assert_eq!(Address::new("10.0.0.5", 31950).url("/health"), "http://10.0.0.5:31950/health");
        assert_eq!(Address::new("fd00::1", 31950).url("/health"), "http://[fd00::1]:31950/health");
    }

    #[test]
    fn test_is_local_ip() {
        assert!(is_local_ip("127.0.0.1"));
        assert!(is_local_ip("169.254.12.3"));
        assert!(is_local_ip("::1"));
        assert!(is_local_ip("fe80::1%eth0"));
        assert!(!is_local_ip("10.0.0.5"));
        assert!(!is_local_ip("fd00::1"));
        assert!(!is_local_ip("opentrons.local"));
    }

    #[test]
    fn test_manual_address_default_port() {
        let manual: ManualAddress = serde_json::from_str(r#"{"ip": "10.0.0.5"}"#).unwrap();
        assert_eq!(manual.port, DEFAULT_PORT);
    }
}
