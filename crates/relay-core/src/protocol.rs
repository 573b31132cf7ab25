use serde::{Deserialize, Serialize};

/// Wire envelope carried over the `/ws` channel, tagged by `type`.
///
/// `system_update` is the only recognized tag; well-formed envelopes with any
/// other tag parse to [`Envelope::Unknown`] and are inert. Malformed JSON is
/// rejected at the boundary before any observer sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    SystemUpdate(SystemUpdate),
    #[serde(other)]
    Unknown,
}

/// Periodic broadcast from the decision engine. Every field besides
/// `timestamp` is optional and applied independently (partial updates).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemUpdate {
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<AgentStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_decision: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predictions: Option<Vec<Prediction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SystemMetrics>,
}

/// Live status of one backend agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: String,
    pub name: String,
    pub status: String,
    pub active_tasks: u32,
    pub recent_activity: String,
    pub uptime: String,
    pub decisions_per_hour: u32,
    pub accuracy: f64,
}

/// An autonomous decision taken (or escalated) by the decision agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub timestamp: String,
    pub agent_name: String,
    pub decision_type: String,
    pub description: String,
    pub cost: f64,
    pub roi: f64,
    pub autonomy_level: u8,
    pub approved: bool,
    pub auto_approved: bool,
}

/// A predicted failure or capacity event from the monitoring agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: String,
    pub confidence: f64,
    pub time_to_failure: String,
    pub estimated_impact: f64,
    pub scheduled_action: String,
}

/// System-wide counters maintained by the orchestrator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub autonomous_actions: u64,
    pub total_decisions: u64,
    pub prevention_savings: f64,
    pub prediction_accuracy: f64,
    pub active_incidents: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autonomous_percentage: Option<f64>,
}
