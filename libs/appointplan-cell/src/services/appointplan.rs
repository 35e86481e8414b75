// libs/appointplan-cell/src/services/appointplan.rs
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::models::{AppointplanError, PlanRequest, PlanSpec, PlannedAppointment};
use crate::services::commit::CommitCoordinator;
use crate::services::context::fill_context;
use crate::services::fetcher::{BitrixFetcher, Fetcher};
use crate::services::notify::RunNotifier;
use crate::services::planner::Planner;
use crate::services::request::parse_plan_request;
use crate::services::validator::{ConstraintValidator, SchedulingPolicy};
use crate::state::AppointplanState;

/// One request in, a committed plan or a run-scoped error out.
pub struct AppointplanService {
    state: Arc<AppointplanState>,
}

impl AppointplanService {
    pub fn new(state: Arc<AppointplanState>) -> Self {
        Self { state }
    }

    pub fn parse(&self, request: &PlanRequest) -> Result<PlanSpec, AppointplanError> {
        parse_plan_request(request, self.state.config.timezone, Utc::now())
    }

    pub async fn run(&self, request: PlanRequest) -> Result<Vec<PlannedAppointment>, AppointplanError> {
        let spec = self.parse(&request)?;
        self.run_spec(spec, Uuid::new_v4()).await
    }

    pub async fn run_spec(
        &self,
        spec: PlanSpec,
        run_id: Uuid,
    ) -> Result<Vec<PlannedAppointment>, AppointplanError> {
        let fetcher = BitrixFetcher::new(
            self.state.transport.clone(),
            self.state.config.clone(),
            self.state.mappings.clone(),
        );
        self.run_spec_with(&fetcher, spec, run_id).await
    }

    /// Run the plan, then tell the requester how it went.
    #[instrument(skip_all, fields(run_id = %run_id, deal_id = spec.deal_id))]
    pub async fn run_spec_with<F>(
        &self,
        fetcher: &F,
        spec: PlanSpec,
        run_id: Uuid,
    ) -> Result<Vec<PlannedAppointment>, AppointplanError>
    where
        F: Fetcher + ?Sized,
    {
        let deal_id = spec.deal_id;
        let requested_by = spec.user_id;

        let outcome = self.plan_and_commit(fetcher, spec).await;

        RunNotifier::new(self.state.transport.clone(), self.state.config.clone())
            .notify(deal_id, requested_by, &outcome)
            .await;
        outcome
    }

    /// Fetch, plan, then commit. Nothing is written unless planning succeeds.
    async fn plan_and_commit<F>(
        &self,
        fetcher: &F,
        spec: PlanSpec,
    ) -> Result<Vec<PlannedAppointment>, AppointplanError>
    where
        F: Fetcher + ?Sized,
    {
        info!(
            "Planning {} stages for deal {} (requested by {:?})",
            spec.stages.len(),
            spec.deal_id,
            spec.user_id
        );

        let context = fill_context(fetcher, &spec).await?;

        let validator = ConstraintValidator::new(SchedulingPolicy::from_config(&self.state.config));
        let mut planner = Planner::from_context(context, validator);
        let planned = planner.plan(&spec.stages)?;
        info!("Planned {} appointments for deal {}", planned.len(), spec.deal_id);

        let coordinator = CommitCoordinator::new(
            self.state.transport.clone(),
            self.state.config.clone(),
            self.state.mappings.clone(),
        );
        let deal_id = spec.deal_id;

        // The create/rollback sequence must finish even if the caller goes away.
        let committed = tokio::spawn(async move { coordinator.commit(deal_id, planned).await })
            .await
            .map_err(|e| {
                error!("Commit task for deal {} aborted: {}", deal_id, e);
                AppointplanError::Commit {
                    reason: format!("commit task aborted: {}", e),
                    rolled_back: 0,
                    rollback_failed: true,
                }
            })??;

        info!("Run for deal {} committed {} appointments", deal_id, committed.len());
        Ok(committed)
    }
}
