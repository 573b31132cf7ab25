/// Gateway configuration.
///
/// The listen port comes from `PORT` (default 5000); the decision-engine
/// backend is addressed by `BACKEND_HOST`/`BACKEND_PORT` (default
/// 127.0.0.1:8000).
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub port: u16,
    pub backend_host: String,
    pub backend_port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            backend_host: "127.0.0.1".into(),
            backend_port: 8000,
        }
    }
}

impl GatewayConfig {
    /// Build configuration from the process environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_port("PORT", defaults.port),
            backend_host: std::env::var("BACKEND_HOST").unwrap_or(defaults.backend_host),
            backend_port: env_port("BACKEND_PORT", defaults.backend_port),
        }
    }

    /// Base URL for proxied REST calls, e.g. `http://127.0.0.1:8000`.
    pub fn backend_http_base(&self) -> String {
        format!("http://{}:{}", self.backend_host, self.backend_port)
    }

    /// WebSocket URL of the backend's `/ws` endpoint.
    pub fn backend_ws_url(&self) -> String {
        format!("ws://{}:{}/ws", self.backend_host, self.backend_port)
    }
}

fn env_port(var: &str, default: u16) -> u16 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.backend_host, "127.0.0.1");
        assert_eq!(config.backend_port, 8000);
    }

    #[test]
    fn backend_urls() {
        let config = GatewayConfig::default();
        assert_eq!(config.backend_http_base(), "http://127.0.0.1:8000");
        assert_eq!(config.backend_ws_url(), "ws://127.0.0.1:8000/ws");
    }

    #[test]
    fn env_port_falls_back_on_garbage() {
        // Unset and unparseable both fall back to the default.
        assert_eq!(env_port("RELAY_TEST_UNSET_PORT", 5000), 5000);
        std::env::set_var("RELAY_TEST_BAD_PORT", "not-a-port");
        assert_eq!(env_port("RELAY_TEST_BAD_PORT", 5000), 5000);
        std::env::remove_var("RELAY_TEST_BAD_PORT");
    }
}
