/// Error taxonomy for gateway and client operations.
///
/// Backend-unreachable and malformed-response surface to REST callers as a
/// generic 5xx payload; malformed inbound messages are logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),
    #[error("backend returned a non-JSON response")]
    MalformedBackendResponse,
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

impl GatewayError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::BackendUnreachable(_) => "backend_unreachable",
            Self::MalformedBackendResponse => "malformed_backend_response",
            Self::MalformedMessage(_) => "malformed_message",
        }
    }

    /// Generic payload relayed to REST callers. Never exposes backend detail.
    pub fn client_payload(&self) -> serde_json::Value {
        let message = match self {
            Self::BackendUnreachable(_) => "Backend request failed",
            Self::MalformedBackendResponse => "Invalid response from backend",
            Self::MalformedMessage(_) => "Malformed message",
        };
        serde_json::json!({ "message": message })
    }
}
