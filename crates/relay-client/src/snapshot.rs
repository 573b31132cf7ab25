use relay_core::protocol::{AgentStatus, Decision, Prediction, SystemMetrics, SystemUpdate};

/// Most recent decisions retained, newest first.
const DECISION_LOG_CAP: usize = 10;

/// Last known dashboard state, assembled from `system_update` envelopes.
///
/// Each envelope field is applied independently: an update carrying only
/// `metrics` leaves agents, decisions and predictions untouched.
#[derive(Clone, Debug, Default)]
pub struct DashboardSnapshot {
    pub agents: Vec<AgentStatus>,
    pub recent_decisions: Vec<Decision>,
    pub predictions: Vec<Prediction>,
    pub metrics: Option<SystemMetrics>,
    pub last_update: Option<String>,
}

impl DashboardSnapshot {
    pub fn apply(&mut self, update: &SystemUpdate) {
        self.last_update = Some(update.timestamp.clone());

        if let Some(agents) = &update.agents {
            self.agents = agents.clone();
        }
        if let Some(decision) = &update.recent_decision {
            // The backend re-broadcasts its latest decision every tick.
            let already_logged = self
                .recent_decisions
                .first()
                .is_some_and(|d| d.id == decision.id);
            if !already_logged {
                self.recent_decisions.insert(0, decision.clone());
                self.recent_decisions.truncate(DECISION_LOG_CAP);
            }
        }
        if let Some(predictions) = &update.predictions {
            self.predictions = predictions.clone();
        }
        if let Some(metrics) = &update.metrics {
            self.metrics = Some(metrics.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(id: &str) -> Decision {
        Decision {
            id: id.into(),
            timestamp: "12:00:00".into(),
            agent_name: "Decision Agent".into(),
            decision_type: "Preventive Maintenance Scheduled".into(),
            description: "Replace disk".into(),
            cost: 450.0,
            roi: 18.0,
            autonomy_level: 2,
            approved: true,
            auto_approved: true,
        }
    }

    fn update_with_decision(id: &str) -> SystemUpdate {
        SystemUpdate {
            timestamp: "12:00:01".into(),
            recent_decision: Some(decision(id)),
            ..Default::default()
        }
    }

    #[test]
    fn partial_update_leaves_other_fields() {
        let mut snapshot = DashboardSnapshot::default();
        snapshot.apply(&update_with_decision("dec-1"));

        let metrics_only = SystemUpdate {
            timestamp: "12:00:03".into(),
            metrics: Some(SystemMetrics {
                active_incidents: 2,
                ..Default::default()
            }),
            ..Default::default()
        };
        snapshot.apply(&metrics_only);

        assert_eq!(snapshot.recent_decisions.len(), 1);
        assert_eq!(snapshot.metrics.as_ref().unwrap().active_incidents, 2);
        assert_eq!(snapshot.last_update.as_deref(), Some("12:00:03"));
    }

    #[test]
    fn rebroadcast_decision_not_duplicated() {
        let mut snapshot = DashboardSnapshot::default();
        snapshot.apply(&update_with_decision("dec-1"));
        snapshot.apply(&update_with_decision("dec-1"));
        assert_eq!(snapshot.recent_decisions.len(), 1);

        snapshot.apply(&update_with_decision("dec-2"));
        assert_eq!(snapshot.recent_decisions.len(), 2);
        assert_eq!(snapshot.recent_decisions[0].id, "dec-2");
    }

    #[test]
    fn decision_log_capped() {
        let mut snapshot = DashboardSnapshot::default();
        for n in 0..25 {
            snapshot.apply(&update_with_decision(&format!("dec-{n}")));
        }
        assert_eq!(snapshot.recent_decisions.len(), DECISION_LOG_CAP);
        assert_eq!(snapshot.recent_decisions[0].id, "dec-24");
    }
}
