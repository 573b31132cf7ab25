pub mod manager;
pub mod snapshot;

pub use manager::{ClientConfig, ConnectionManager, ConnectionState, Subscription};
pub use snapshot::DashboardSnapshot;
