// libs/appointplan-cell/src/services/notify.rs
use std::sync::Arc;

use chrono_tz::Tz;
use tracing::{debug, warn};

use shared_config::AppConfig;

use crate::models::{AppointplanError, DealId, PlannedAppointment};
use crate::services::batch::{execute_batch, BatchCommand, BatchTransport};

/// Tells the requesting user and the configured default user how a run ended.
#[derive(Clone)]
pub struct RunNotifier {
    transport: Arc<dyn BatchTransport>,
    config: Arc<AppConfig>,
}

impl RunNotifier {
    pub fn new(transport: Arc<dyn BatchTransport>, config: Arc<AppConfig>) -> Self {
        Self { transport, config }
    }

    /// Default user first, then the requester; duplicates collapse.
    pub fn recipients(&self, requested_by: Option<u64>) -> Vec<u64> {
        let mut users: Vec<u64> = Vec::with_capacity(2);
        for user in self.config.default_notify_user_id.into_iter().chain(requested_by) {
            if !users.contains(&user) {
                users.push(user);
            }
        }
        users
    }

    /// Best-effort: a failed notification never changes the run's result.
    pub async fn notify(
        &self,
        deal_id: DealId,
        requested_by: Option<u64>,
        outcome: &Result<Vec<PlannedAppointment>, AppointplanError>,
    ) {
        let users = self.recipients(requested_by);
        if users.is_empty() {
            debug!("No one to notify about deal {}", deal_id);
            return;
        }

        let message = outcome_message(self.config.timezone, deal_id, outcome);
        let commands: Vec<(String, BatchCommand)> = users
            .iter()
            .map(|user| {
                (
                    format!("notify_{}", user),
                    BatchCommand::new("im.notify.personal.add")
                        .param("USER_ID", *user)
                        .param("MESSAGE", message.clone()),
                )
            })
            .collect();

        match execute_batch(self.transport.as_ref(), &commands, self.config.batch_limit, false).await {
            Ok(reply) if reply.result_error.is_empty() => {
                debug!("Notified {} users about deal {}", users.len(), deal_id);
            }
            Ok(reply) => {
                for (name, detail) in &reply.result_error {
                    warn!("Notification {} for deal {} failed: {}", name, deal_id, detail);
                }
            }
            Err(e) => warn!("Could not notify users about deal {}: {}", deal_id, e.source),
        }
    }
}

fn outcome_message(
    tz: Tz,
    deal_id: DealId,
    outcome: &Result<Vec<PlannedAppointment>, AppointplanError>,
) -> String {
    match outcome {
        Ok(planned) => {
            let mut lines = vec![format!(
                "Deal {}: {} appointments planned",
                deal_id,
                planned.len()
            )];
            lines.extend(planned.iter().map(|a| {
                let view = a.to_view(tz);
                format!("{} at {}", view.type_code, view.start)
            }));
            lines.join("\n")
        }
        Err(e) => format!("Deal {}: planning failed: {}", deal_id, e),
    }
}
