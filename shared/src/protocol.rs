/// mDNS service type robots advertise their HTTP API under
pub const ROBOT_SERVICE_TYPE: &str = "_http._tcp.local.";

/// Port the robot HTTP API listens on
pub const DEFAULT_PORT: u16 = 31950;

/// TXT record key carrying the robot model hint
pub const TXT_ROBOT_MODEL: &str = "robotModel";

/// General health endpoint
pub const HEALTH_PATH: &str = "/health";

/// Update server health endpoint
pub const SERVER_HEALTH_PATH: &str = "/server/update/health";
