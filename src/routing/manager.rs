// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Plan creation and the `Advance` driver.
//!
//! `PlanManager` is the only entry point the HTTP layer and the background
//! driver use. Creation validates and screens before anything is persisted;
//! `advance` delegates to the funding watcher or the hop scheduler based on
//! the stored state and treats a lost check-and-set as a no-op.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::compliance::{ComplianceGate, Verdict};
use super::error::{EngineError, EngineResult};
use super::funding::FundingWatcher;
use super::plan::{compute_fee, PlanState, TransferPlan};
use super::resolver::{DomainResolver, FeeExemption};
use super::scheduler::HopScheduler;
use super::status::{PlanStatus, StatusNotifier};
use super::RoutingContext;
use crate::blockchain::{format_amount, parse_amount, Address, NATIVE_DECIMALS};
use crate::config::RoutingConfig;
use crate::storage::{AuditEvent, AuditEventType, StoreError};

pub struct PlanManager {
    ctx: RoutingContext,
    compliance: Arc<ComplianceGate>,
    resolver: Arc<dyn DomainResolver>,
    exemption: Arc<dyn FeeExemption>,
    funding: FundingWatcher,
    scheduler: HopScheduler,
    notifier: StatusNotifier,
}

impl PlanManager {
    pub fn new(
        ctx: RoutingContext,
        compliance: Arc<ComplianceGate>,
        resolver: Arc<dyn DomainResolver>,
        exemption: Arc<dyn FeeExemption>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            funding: FundingWatcher::new(ctx.clone()),
            scheduler: HopScheduler::new(ctx.clone(), shutdown),
            notifier: StatusNotifier::new(ctx.store.clone()),
            ctx,
            compliance,
            resolver,
            exemption,
        }
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.ctx.config
    }

    pub fn notifier(&self) -> &StatusNotifier {
        &self.notifier
    }

    /// Validate, screen and persist a new plan awaiting funding.
    ///
    /// Nothing is persisted unless every check passes; a blocked
    /// destination returns [`EngineError::ComplianceRejected`].
    pub async fn create_plan(
        &self,
        sender: &str,
        destination_input: &str,
        amount: &str,
    ) -> EngineResult<TransferPlan> {
        let config = &self.ctx.config;

        let sender = Address::parse(sender)
            .map_err(|e| EngineError::Validation(format!("Invalid sender address: {e}")))?;

        let amount = parse_amount(amount, NATIVE_DECIMALS)
            .map_err(|e| EngineError::Validation(format!("Invalid amount: {e}")))?;
        if amount == 0 {
            return Err(EngineError::Validation("Amount must be positive".into()));
        }
        if amount < config.min_transfer_amount {
            return Err(EngineError::Validation(format!(
                "Amount below minimum of {}",
                format_amount(config.min_transfer_amount, NATIVE_DECIMALS)
            )));
        }

        let destination = self.resolve_destination(destination_input).await?;

        if self.compliance.check(destination.as_str()).await == Verdict::Block {
            tracing::warn!("Destination rejected by compliance screening");
            self.ctx.audit.record(
                AuditEvent::new(AuditEventType::ComplianceRejected).failed("sanctions screening"),
            );
            return Err(EngineError::ComplianceRejected);
        }

        let (min_hops, max_hops) = config.hop_bounds();
        let hop_count = self.ctx.entropy.hop_count(min_hops, max_hops);

        let exempt = self.fee_exempt(sender.as_str()).await.unwrap_or(false);
        let fee = if exempt {
            0
        } else {
            compute_fee(amount, config.fee_bps)
                .ok_or_else(|| EngineError::Validation("Amount too large".into()))?
        };
        if fee >= amount {
            return Err(EngineError::Validation(
                "Amount does not cover the relay fee".into(),
            ));
        }

        let now = Utc::now();
        let funding_expires_at = chrono::Duration::from_std(config.funding_window)
            .ok()
            .and_then(|window| now.checked_add_signed(window))
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "Funding window of {}s is out of range",
                    config.funding_window.as_secs()
                ))
            })?;

        let plan_id = uuid::Uuid::new_v4().to_string();
        let deposit = self.ctx.keys.issue(&plan_id, 0)?;

        let created = TransferPlan {
            plan_id: plan_id.clone(),
            sender: sender.into_string(),
            destination_input: destination_input.trim().to_string(),
            destination: destination.into_string(),
            amount,
            fee,
            fee_applied: !exempt,
            hop_count,
            deposit_address: deposit.address,
            state: PlanState::Created,
            current_hop_index: 0,
            created_at: now,
            funding_expires_at,
            funded_amount: None,
            completion_signature: None,
            error: None,
            updated_at: now,
            revision: 0,
        };
        let plan = self.persist_new_plan(&created)?;

        tracing::info!(
            plan_id = %plan.plan_id,
            hop_count,
            fee_applied = plan.fee_applied,
            state = %plan.state,
            "Plan created"
        );
        self.ctx.audit.record(
            AuditEvent::new(AuditEventType::PlanCreated)
                .with_plan(&plan.plan_id)
                .with_details(serde_json::json!({
                    "hop_count": hop_count,
                    "fee_applied": plan.fee_applied,
                })),
        );
        self.notifier.publish(PlanStatus::from(&plan));
        Ok(plan)
    }

    /// Move a plan one step along its lifecycle. Idempotent.
    pub async fn advance(&self, plan_id: &str) -> EngineResult<PlanStatus> {
        let plan = self
            .ctx
            .store
            .get_plan(plan_id)?
            .ok_or_else(|| EngineError::NotFound(plan_id.to_string()))?;

        let result = match plan.state {
            PlanState::AwaitingFunding => self.funding.check_funding(&plan).await.map(drop),
            PlanState::Funded | PlanState::Routing => {
                self.scheduler.execute_next_hop(&plan).await.map(drop)
            }
            PlanState::Created
            | PlanState::Complete
            | PlanState::Expired
            | PlanState::Failed => Ok(()),
        };

        match result {
            Ok(()) => {}
            Err(EngineError::Storage(StoreError::Conflict(_))) => {
                tracing::debug!(plan_id, "Concurrent advance, skipping");
            }
            Err(e) => return Err(e),
        }

        let status = self.notifier.status(plan_id)?;
        if status.state != plan.state || status.current_hop_index != plan.current_hop_index {
            self.notifier.publish(status.clone());
        }
        Ok(status)
    }

    pub fn status(&self, plan_id: &str) -> EngineResult<PlanStatus> {
        self.notifier.status(plan_id)
    }

    /// Whether `address` is exempt from the relay fee. `None` when the
    /// lookup fails; callers that charge fees treat that as not exempt.
    pub async fn fee_exempt(&self, address: &str) -> Option<bool> {
        match self.exemption.is_exempt(address).await {
            Ok(exempt) => Some(exempt),
            Err(e) => {
                tracing::warn!(error = %e, address, "Fee exemption lookup failed");
                None
            }
        }
    }

    /// Ids of plans that still need driving.
    pub fn active_plan_ids(&self) -> EngineResult<Vec<String>> {
        Ok(self.ctx.store.active_plan_ids()?)
    }

    /// Store a freshly built plan as `AwaitingFunding`. On failure the
    /// deposit account is retired so no key outlives its plan.
    fn persist_new_plan(&self, created: &TransferPlan) -> EngineResult<TransferPlan> {
        let result = created
            .transition(PlanState::AwaitingFunding, created.created_at)
            .map_err(EngineError::from)
            .and_then(|plan| self.ctx.store.insert_plan(&plan).map_err(EngineError::from));

        if result.is_err() {
            if let Err(e) = self.ctx.keys.retire(&created.deposit_address) {
                tracing::warn!(
                    plan_id = %created.plan_id,
                    error = %e,
                    "Failed to retire deposit key of unsaved plan"
                );
            }
        }
        result
    }

    /// Raw address, or an alias looked up through the resolver.
    async fn resolve_destination(&self, input: &str) -> EngineResult<Address> {
        let input = input.trim();
        if input.is_empty() {
            return Err(EngineError::Validation("Destination is required".into()));
        }

        let raw = if input.starts_with("0x") || input.starts_with("0X") {
            input.to_string()
        } else if input.contains('.') {
            self.resolver
                .resolve(input)
                .await
                .map_err(|e| EngineError::Validation(format!("Cannot resolve {input}: {e}")))?
                .ok_or_else(|| EngineError::Validation(format!("Unknown destination alias {input}")))?
        } else {
            return Err(EngineError::Validation(
                "Destination must be an address or alias".into(),
            ));
        };

        Address::parse(&raw)
            .map_err(|e| EngineError::Validation(format!("Invalid destination address: {e}")))
    }
}
