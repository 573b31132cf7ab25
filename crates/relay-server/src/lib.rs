pub mod pairing;
pub mod proxy;
pub mod server;
pub mod supervisor;

pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use supervisor::{BackendSupervisor, SupervisorConfig};
