// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Hop-by-hop execution of funded plans.
//!
//! Each call to [`HopScheduler::execute_next_hop`] works on exactly one hop,
//! `plan.current_hop_index`. The hop's [`RoutingStep`] is the idempotency
//! key: it is created once, claimed with a check-and-set before anything is
//! signed, and carries the signed transfer so a retry re-broadcasts the same
//! transaction instead of signing a new one.
//!
//! ## Disposition of a failed pass
//!
//! | Error | Outcome |
//! |-------|---------|
//! | transient (confirmation timeout) | retry on a later Advance |
//! | `RetriesExhausted` | retry on a later Advance |
//! | any of the above past `max_hop_attempts` | plan `Failed` |
//! | any other fatal ledger error | plan `Failed` |

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::error::{EngineError, EngineResult};
use super::keys::KeyError;
use super::plan::{PlanState, TransferPlan};
use super::step::{AttemptOutcome, RoutingStep, StepAttempt, StepStatus};
use super::RoutingContext;
use crate::blockchain::{LedgerError, SignedTransfer, TransferRequest, TransferValue};
use crate::storage::{AuditEvent, AuditEventType, StoreError};

/// What one scheduler pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HopOutcome {
    /// The hop confirmed and the plan moved on (or completed).
    Confirmed {
        hop_index: u8,
        signature: String,
        completed: bool,
    },
    /// The hop failed transiently and will be retried by a later Advance.
    Retrying {
        hop_index: u8,
        attempts: u32,
        error: String,
    },
    /// The hop failed fatally; the plan is now `Failed`.
    Failed { hop_index: u8, error: String },
    /// Another worker owns the hop, or the pass was cancelled.
    InProgress,
    /// The plan is not in a routable state.
    Skipped,
}

pub struct HopScheduler {
    ctx: RoutingContext,
    shutdown: CancellationToken,
}

impl HopScheduler {
    pub fn new(ctx: RoutingContext, shutdown: CancellationToken) -> Self {
        Self { ctx, shutdown }
    }

    /// Drive the plan's current hop one pass forward.
    pub async fn execute_next_hop(&self, plan: &TransferPlan) -> EngineResult<HopOutcome> {
        let plan = match plan.state {
            PlanState::Funded => {
                let routing = plan.transition(PlanState::Routing, Utc::now())?;
                let stored = self.ctx.store.update_plan(&routing)?;
                tracing::info!(plan_id = %plan.plan_id, state = %stored.state, "Routing started");
                stored
            }
            PlanState::Routing => plan.clone(),
            _ => return Ok(HopOutcome::Skipped),
        };

        let hop = plan.current_hop_index;
        if hop >= plan.hop_count {
            return Ok(HopOutcome::Skipped);
        }

        let step = self.prepare_step(&plan, hop)?;
        match step.status {
            StepStatus::Confirmed => return self.finish_hop(&plan, &step),
            StepStatus::Failed => {
                let error = step
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "hop failed".to_string());
                return self.fail_plan(&plan, hop, error);
            }
            StepStatus::Pending | StepStatus::Submitted => {}
        }

        let lease = chrono::Duration::from_std(self.ctx.config.step_lease)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        if step.is_claimed(Utc::now(), lease) {
            tracing::debug!(plan_id = %plan.plan_id, hop, "Hop already claimed");
            return Ok(HopOutcome::InProgress);
        }

        let Some(mut step) = self.claim(step)? else {
            return Ok(HopOutcome::InProgress);
        };

        if step.transfer.is_none() && step.fee_transfer.is_none() {
            let delay = Duration::from_millis(step.jitter_ms.unwrap_or(0));
            if !delay.is_zero() {
                tracing::debug!(
                    plan_id = %plan.plan_id,
                    hop,
                    jitter_ms = delay.as_millis() as u64,
                    "Waiting before submission"
                );
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        self.release(step)?;
                        return Ok(HopOutcome::InProgress);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let mut ledger_attempts = 0;
        let result = self.submit(&plan, &mut step, &mut ledger_attempts).await;

        match result {
            Ok(block) => {
                step.status = StepStatus::Confirmed;
                step.confirmed_block = Some(block);
                step.attempts += ledger_attempts;
                step.claimed_at = None;
                step.last_error = None;
                step.updated_at = Utc::now();
                let step = match self.ctx.store.update_step(&step) {
                    Ok(stored) => stored,
                    Err(StoreError::Conflict(_)) => return Ok(HopOutcome::InProgress),
                    Err(e) => return Err(e.into()),
                };
                self.record_attempt(&step, ledger_attempts, AttemptOutcome::Confirmed, None);
                self.finish_hop(&plan, &step)
            }
            Err(EngineError::Storage(StoreError::Conflict(_))) => Ok(HopOutcome::InProgress),
            Err(EngineError::TransientLedger(e)) | Err(EngineError::FatalLedger(e)) => {
                self.handle_failure(&plan, step, ledger_attempts, e)
            }
            Err(other) => {
                if let Err(e) = self.release(step) {
                    tracing::warn!(plan_id = %plan.plan_id, hop, error = %e, "Failed to release hop claim");
                }
                Err(other)
            }
        }
    }

    /// Load the hop's step, creating it (and the next hop's account) once.
    fn prepare_step(&self, plan: &TransferPlan, hop: u8) -> EngineResult<RoutingStep> {
        if let Some(step) = self.ctx.store.get_step(&plan.plan_id, hop)? {
            return Ok(step);
        }

        let source = self
            .ctx
            .keys
            .account(&plan.plan_id, hop)?
            .ok_or_else(|| KeyError::UnknownAccount(format!("{}/{hop}", plan.plan_id)))?
            .address;
        let destination = if plan.is_final_hop(hop) {
            plan.destination.clone()
        } else {
            self.ctx.keys.issue(&plan.plan_id, hop + 1)?.address
        };

        let mut step = RoutingStep::new(&plan.plan_id, hop, source, destination);
        step.jitter_ms = Some(
            self.ctx
                .entropy
                .jitter(self.ctx.config.jitter_min_ms, self.ctx.config.jitter_max_ms)
                .as_millis() as u64,
        );

        match self.ctx.store.insert_step(&step) {
            Ok(stored) => Ok(stored),
            Err(StoreError::Conflict(_)) => self
                .ctx
                .store
                .get_step(&plan.plan_id, hop)?
                .ok_or_else(|| StoreError::Conflict(format!("{}/{hop}", plan.plan_id)).into()),
            Err(e) => Err(e.into()),
        }
    }

    /// Take ownership of a step. `None` if another worker got there first.
    fn claim(&self, step: RoutingStep) -> EngineResult<Option<RoutingStep>> {
        let now = Utc::now();
        let mut claimed = step;
        claimed.status = StepStatus::Submitted;
        claimed.claimed_at = Some(now);
        claimed.updated_at = now;

        match self.ctx.store.update_step(&claimed) {
            Ok(stored) => Ok(Some(stored)),
            Err(StoreError::Conflict(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn release(&self, mut step: RoutingStep) -> EngineResult<()> {
        step.claimed_at = None;
        if step.transfer.is_none() && step.fee_transfer.is_none() {
            step.status = StepStatus::Pending;
        }
        step.updated_at = Utc::now();
        match self.ctx.store.update_step(&step) {
            Ok(_) | Err(StoreError::Conflict(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Sign (once), persist, broadcast and confirm this hop's transfers.
    ///
    /// On the final hop the fee goes to the collector first with nonce 0 and
    /// the sweep follows with nonce 1. Every other hop sweeps with nonce 0.
    async fn submit(
        &self,
        plan: &TransferPlan,
        step: &mut RoutingStep,
        ledger_attempts: &mut u32,
    ) -> EngineResult<u64> {
        let final_hop = plan.is_final_hop(step.hop_index);
        let charge_fee = final_hop && plan.fee > 0;

        if charge_fee && !step.fee_confirmed {
            let fee_transfer = match &step.fee_transfer {
                Some(signed) => signed.clone(),
                None => {
                    let request = TransferRequest {
                        to: self.ctx.config.fee_collector.to_string(),
                        value: TransferValue::Exact(plan.fee),
                        nonce: 0,
                    };
                    let signed = self.sign(&step.source, &request).await?;
                    step.fee_transfer = Some(signed.clone());
                    self.persist(step)?;
                    signed
                }
            };
            self.broadcast_and_confirm(&fee_transfer, ledger_attempts)
                .await?;
            step.fee_confirmed = true;
            self.persist(step)?;
        }

        let transfer = match &step.transfer {
            Some(signed) => signed.clone(),
            None => {
                let request = TransferRequest {
                    to: step.destination.clone(),
                    value: TransferValue::Sweep,
                    nonce: u64::from(charge_fee),
                };
                let signed = self.sign(&step.source, &request).await?;
                step.amount = Some(signed.value);
                step.transfer = Some(signed.clone());
                self.persist(step)?;
                signed
            }
        };
        self.broadcast_and_confirm(&transfer, ledger_attempts).await
    }

    /// Sign with a capability held only for the duration of the call.
    async fn sign(
        &self,
        source: &str,
        request: &TransferRequest,
    ) -> EngineResult<SignedTransfer> {
        let capability = self.ctx.keys.checkout(source)?;
        Ok(self.ctx.rpc.sign_transfer(&capability, request).await?)
    }

    async fn broadcast_and_confirm(
        &self,
        transfer: &SignedTransfer,
        ledger_attempts: &mut u32,
    ) -> EngineResult<u64> {
        let sent = self.ctx.rpc.broadcast(transfer).await;
        *ledger_attempts += sent.attempts;
        sent.into_result()?;
        Ok(self.ctx.rpc.await_confirmation(&transfer.signature).await?)
    }

    fn persist(&self, step: &mut RoutingStep) -> EngineResult<()> {
        step.updated_at = Utc::now();
        *step = self.ctx.store.update_step(step)?;
        Ok(())
    }

    fn handle_failure(
        &self,
        plan: &TransferPlan,
        mut step: RoutingStep,
        ledger_attempts: u32,
        error: LedgerError,
    ) -> EngineResult<HopOutcome> {
        let hop = step.hop_index;
        let retryable =
            error.is_transient() || matches!(error, LedgerError::RetriesExhausted { .. });

        step.attempts += ledger_attempts.max(1);
        step.last_error = Some(error.to_string());
        step.claimed_at = None;
        step.updated_at = Utc::now();

        if retryable && step.attempts < self.ctx.config.max_hop_attempts {
            if step.transfer.is_none() && step.fee_transfer.is_none() {
                step.status = StepStatus::Pending;
            }
            let step = match self.ctx.store.update_step(&step) {
                Ok(stored) => stored,
                Err(StoreError::Conflict(_)) => return Ok(HopOutcome::InProgress),
                Err(e) => return Err(e.into()),
            };
            self.record_attempt(
                &step,
                ledger_attempts,
                AttemptOutcome::Transient,
                Some(error.to_string()),
            );

            tracing::warn!(
                plan_id = %plan.plan_id,
                hop,
                attempt = step.attempts,
                error = %error,
                "Hop failed, will retry"
            );
            self.ctx.audit.record(
                AuditEvent::new(AuditEventType::HopRetry)
                    .with_plan(&plan.plan_id)
                    .with_hop(hop)
                    .failed(error.to_string()),
            );
            return Ok(HopOutcome::Retrying {
                hop_index: hop,
                attempts: step.attempts,
                error: error.to_string(),
            });
        }

        step.status = StepStatus::Failed;
        let step = match self.ctx.store.update_step(&step) {
            Ok(stored) => stored,
            Err(StoreError::Conflict(_)) => return Ok(HopOutcome::InProgress),
            Err(e) => return Err(e.into()),
        };
        self.record_attempt(
            &step,
            ledger_attempts,
            AttemptOutcome::Fatal,
            Some(error.to_string()),
        );
        self.fail_plan(plan, hop, error.to_string())
    }

    fn fail_plan(&self, plan: &TransferPlan, hop: u8, error: String) -> EngineResult<HopOutcome> {
        let mut failed = plan.transition(PlanState::Failed, Utc::now())?;
        failed.error = Some(format!("Hop {hop} failed: {error}"));
        self.ctx.store.update_plan(&failed)?;

        tracing::error!(plan_id = %plan.plan_id, hop, error = %error, "Plan failed");
        self.ctx.audit.record(
            AuditEvent::new(AuditEventType::PlanFailed)
                .with_plan(&plan.plan_id)
                .with_hop(hop)
                .failed(error.clone()),
        );
        Ok(HopOutcome::Failed {
            hop_index: hop,
            error,
        })
    }

    /// Retire the source key and move the plan past a confirmed hop.
    fn finish_hop(&self, plan: &TransferPlan, step: &RoutingStep) -> EngineResult<HopOutcome> {
        let hop = step.hop_index;
        let signature = step.signature().unwrap_or_default().to_string();

        match self.ctx.keys.mark_forwarded(&step.source) {
            Ok(_) | Err(KeyError::Retired(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.ctx.keys.retire(&step.source)?;

        let completed = plan.is_final_hop(hop);
        let next = if completed {
            let mut complete = plan.transition(PlanState::Complete, Utc::now())?;
            complete.current_hop_index = plan.hop_count;
            complete.completion_signature = Some(signature.clone());
            complete
        } else {
            self.ctx.keys.mark_funded(&step.destination)?;
            let mut advanced = plan.clone();
            advanced.current_hop_index = hop + 1;
            advanced.updated_at = Utc::now();
            advanced
        };

        match self.ctx.store.update_plan(&next) {
            Ok(_) => {}
            Err(StoreError::Conflict(_)) => return Ok(HopOutcome::InProgress),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            plan_id = %plan.plan_id,
            hop,
            attempt = step.attempts,
            signature = %signature,
            "Hop confirmed"
        );
        self.ctx.audit.record(
            AuditEvent::new(AuditEventType::HopConfirmed)
                .with_plan(&plan.plan_id)
                .with_hop(hop),
        );
        if completed {
            tracing::info!(plan_id = %plan.plan_id, state = %PlanState::Complete, "Plan complete");
            self.ctx.audit.record(
                AuditEvent::new(AuditEventType::PlanCompleted).with_plan(&plan.plan_id),
            );
        }

        Ok(HopOutcome::Confirmed {
            hop_index: hop,
            signature,
            completed,
        })
    }

    fn record_attempt(
        &self,
        step: &RoutingStep,
        ledger_attempts: u32,
        outcome: AttemptOutcome,
        error: Option<String>,
    ) {
        let attempt = StepAttempt::record(step, ledger_attempts, outcome, error);
        if let Err(e) = self.ctx.store.append_attempt(&attempt) {
            tracing::warn!(plan_id = %step.plan_id, hop = step.hop_index, error = %e, "Failed to record hop attempt");
        }
    }
}
