// libs/appointplan-cell/src/services/commit.rs
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use shared_config::AppConfig;

use crate::models::{to_rfc3339, AppointplanError, DealId, PlannedAppointment, RemoteId};
use crate::services::batch::{execute_batch, BatchCommand, BatchReply, BatchTransport};
use crate::services::mappings::{id_of, StoreMappings};

/// Writes a run's accepted appointments as one unit.
///
/// Creates go out in a single halting batch; if any create fails, every item
/// already created by this run is deleted again before the error surfaces.
#[derive(Clone)]
pub struct CommitCoordinator {
    transport: Arc<dyn BatchTransport>,
    config: Arc<AppConfig>,
    mappings: Arc<StoreMappings>,
}

impl CommitCoordinator {
    pub fn new(
        transport: Arc<dyn BatchTransport>,
        config: Arc<AppConfig>,
        mappings: Arc<StoreMappings>,
    ) -> Self {
        Self {
            transport,
            config,
            mappings,
        }
    }

    fn create_command(&self, deal_id: DealId, appointment: &PlannedAppointment) -> BatchCommand {
        let fields = &self.config.fields;
        let tz = self.config.timezone;

        let mut item = Map::new();
        item.insert(fields.appointment_specialist.clone(), appointment.specialist_id.into());
        item.insert(fields.appointment_start.clone(), to_rfc3339(tz, appointment.interval.start).into());
        item.insert(fields.appointment_end.clone(), to_rfc3339(tz, appointment.interval.end).into());
        item.insert(fields.appointment_parent_deal.clone(), deal_id.into());
        item.insert(fields.appointment_patient.clone(), appointment.patient_id.into());
        item.insert(
            fields.appointment_code.clone(),
            self.mappings.code_id_for(&appointment.type_code).into(),
        );
        item.insert(
            fields.appointment_status.clone(),
            self.config.planned_status_id.clone().into(),
        );

        BatchCommand::new("crm.item.add")
            .param("entityTypeId", self.config.appointment_entity_type_id)
            .param("fields", Value::Object(item))
    }

    /// Create every appointment or none of them.
    ///
    /// On success the returned appointments carry their remote ids, in the
    /// order they were given.
    pub async fn commit(
        &self,
        deal_id: DealId,
        mut appointments: Vec<PlannedAppointment>,
    ) -> Result<Vec<PlannedAppointment>, AppointplanError> {
        if appointments.is_empty() {
            return Ok(appointments);
        }

        let commands: Vec<(String, BatchCommand)> = appointments
            .iter()
            .enumerate()
            .map(|(i, appointment)| (format!("create_{}", i), self.create_command(deal_id, appointment)))
            .collect();

        let (reply, transport_error) =
            match execute_batch(self.transport.as_ref(), &commands, self.config.batch_limit, true).await {
                Ok(reply) => (reply, None),
                Err(e) => (e.completed, Some(e.source)),
            };

        let mut created: Vec<RemoteId> = Vec::with_capacity(commands.len());
        let mut failure: Option<String> = transport_error.map(|e| e.to_string());

        for ((name, _), appointment) in commands.iter().zip(appointments.iter_mut()) {
            match created_id(&reply, name) {
                Some(id) => {
                    appointment.remote_id = Some(id);
                    created.push(id);
                }
                None => {
                    if failure.is_none() {
                        failure = Some(match reply.result_error.get(name) {
                            Some(detail) => format!("{} failed: {}", name, detail),
                            None => format!("{} returned no id", name),
                        });
                    }
                }
            }
        }

        let Some(reason) = failure else {
            info!("Committed {} appointments for deal {}", created.len(), deal_id);
            return Ok(appointments);
        };

        error!(
            "Commit for deal {} failed after {} of {} creates: {}",
            deal_id,
            created.len(),
            appointments.len(),
            reason
        );

        let report = self.rollback(&created).await;

        Err(AppointplanError::Commit {
            reason,
            rolled_back: report.deleted,
            rollback_failed: !report.is_complete(),
        })
    }

    /// Delete `ids` best-effort. Deletes from chunks that went through are
    /// counted even when a later chunk fails at the transport level.
    pub async fn rollback(&self, ids: &[RemoteId]) -> RollbackReport {
        let mut report = RollbackReport {
            requested: ids.len(),
            deleted: 0,
        };
        if ids.is_empty() {
            return report;
        }
        warn!("Rolling back {} created appointments", ids.len());

        let commands: Vec<(String, BatchCommand)> = ids
            .iter()
            .map(|id| {
                (
                    format!("delete_{}", id),
                    BatchCommand::new("crm.item.delete")
                        .param("entityTypeId", self.config.appointment_entity_type_id)
                        .param("id", *id),
                )
            })
            .collect();

        let reply = match execute_batch(self.transport.as_ref(), &commands, self.config.batch_limit, false).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Rollback interrupted: {}", e.source);
                e.completed
            }
        };

        for (name, _) in &commands {
            if let Some(detail) = reply.result_error.get(name) {
                error!("Rollback {} failed: {}", name, detail);
            } else if reply.result.contains_key(name) {
                report.deleted += 1;
            }
        }
        debug!("Rollback deleted {} of {} appointments", report.deleted, report.requested);
        report
    }
}

/// How much of a rollback the store accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollbackReport {
    pub requested: usize,
    pub deleted: usize,
}

impl RollbackReport {
    pub fn is_complete(&self) -> bool {
        self.deleted == self.requested
    }
}

/// `crm.item.add` replies with `{"item": {"id": ..}}`.
fn created_id(reply: &BatchReply, name: &str) -> Option<RemoteId> {
    let result = reply.result.get(name)?;
    result
        .get("item")
        .and_then(|item| item.get("id"))
        .or_else(|| result.get("id"))
        .and_then(id_of)
}
