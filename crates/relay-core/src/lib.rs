pub mod backoff;
pub mod config;
pub mod errors;
pub mod protocol;

pub use backoff::ReconnectPolicy;
pub use config::GatewayConfig;
pub use errors::GatewayError;
pub use protocol::{AgentStatus, Decision, Envelope, Prediction, SystemMetrics, SystemUpdate};
