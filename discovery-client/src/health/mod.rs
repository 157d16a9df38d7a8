pub mod poller;
pub mod probe;

pub use poller::HealthPoller;
