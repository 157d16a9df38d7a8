pub mod selectors;
pub mod state;

pub use selectors::Snapshot;
pub use state::{Action, State};
