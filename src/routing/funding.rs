// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Deposit detection for plans awaiting funding.

use chrono::{DateTime, Utc};

use super::error::{EngineError, EngineResult};
use super::plan::{funding_threshold, PlanState, TransferPlan};
use super::RoutingContext;
use crate::storage::{AuditEvent, AuditEventType};

/// Result of one funding check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingOutcome {
    /// Deposit met the threshold; the plan is now `Funded`.
    Funded(TransferPlan),
    /// Window closed; the plan is now `Expired`.
    Expired(TransferPlan),
    /// Still waiting. `received` is `None` when the ledger could not be read.
    Pending { received: Option<u128> },
    /// Plan is not awaiting funding.
    NotApplicable,
}

pub struct FundingWatcher {
    ctx: RoutingContext,
}

impl FundingWatcher {
    pub fn new(ctx: RoutingContext) -> Self {
        Self { ctx }
    }

    pub async fn check_funding(&self, plan: &TransferPlan) -> EngineResult<FundingOutcome> {
        self.check_funding_at(plan, Utc::now()).await
    }

    /// Funding check against an explicit clock.
    ///
    /// Expiry is strict: once the window has closed the plan expires even
    /// if the deposit has since arrived.
    pub(crate) async fn check_funding_at(
        &self,
        plan: &TransferPlan,
        now: DateTime<Utc>,
    ) -> EngineResult<FundingOutcome> {
        if plan.state != PlanState::AwaitingFunding {
            return Ok(FundingOutcome::NotApplicable);
        }

        let received = self.ctx.rpc.received_total(&plan.deposit_address).await;
        let threshold = funding_threshold(plan.amount, self.ctx.config.funding_tolerance_bps);

        if plan.is_funding_expired(now) {
            let reason = match &received {
                Ok(r) if *r > 0 && *r < threshold => EngineError::InsufficientFunds,
                _ => EngineError::FundingTimeout,
            }
            .code();
            let mut next = plan.transition(PlanState::Expired, now)?;
            next.error = Some(reason.to_string());
            let stored = self.ctx.store.update_plan(&next)?;

            tracing::info!(plan_id = %plan.plan_id, reason, "Plan expired unfunded");
            self.ctx.audit.record(
                AuditEvent::new(AuditEventType::PlanExpired)
                    .with_plan(&plan.plan_id)
                    .failed(reason),
            );
            return Ok(FundingOutcome::Expired(stored));
        }

        let received = match received {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(plan_id = %plan.plan_id, error = %e, "Funding check failed");
                return Ok(FundingOutcome::Pending { received: None });
            }
        };

        if received < threshold {
            tracing::debug!(plan_id = %plan.plan_id, received, threshold, "Awaiting deposit");
            return Ok(FundingOutcome::Pending {
                received: Some(received),
            });
        }

        let mut next = plan.transition(PlanState::Funded, now)?;
        next.funded_amount = Some(received);
        let stored = self.ctx.store.update_plan(&next)?;
        self.ctx.keys.mark_funded(&plan.deposit_address)?;

        tracing::info!(plan_id = %plan.plan_id, state = %stored.state, "Plan funded");
        self.ctx.audit.record(
            AuditEvent::new(AuditEventType::PlanFunded)
                .with_plan(&plan.plan_id)
                .with_details(serde_json::json!({ "received": received.to_string() })),
        );
        Ok(FundingOutcome::Funded(stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::LedgerError;
    use crate::routing::keys::AccountState;
    use crate::storage::StoreError;
    use crate::test_support::{eth, TestEngine, DESTINATION, SENDER};
    use chrono::Duration;

    async fn awaiting(engine: &TestEngine, amount: &str) -> TransferPlan {
        engine
            .manager
            .create_plan(SENDER, DESTINATION, amount)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn full_deposit_funds_the_plan() {
        let engine = TestEngine::new();
        let watcher = FundingWatcher::new(engine.ctx.clone());
        let plan = awaiting(&engine, "2.0").await;

        engine.ledger.credit(&plan.deposit_address, eth("2.0"));
        let outcome = watcher.check_funding(&plan).await.unwrap();

        let FundingOutcome::Funded(funded) = outcome else {
            panic!("expected Funded, got {outcome:?}");
        };
        assert_eq!(funded.state, PlanState::Funded);
        assert_eq!(funded.funded_amount, Some(eth("2.0")));

        let account = engine.ctx.keys.account(&plan.plan_id, 0).unwrap().unwrap();
        assert_eq!(account.state, AccountState::Funded);
    }

    #[tokio::test]
    async fn deposit_within_tolerance_counts() {
        let engine = TestEngine::new();
        let watcher = FundingWatcher::new(engine.ctx.clone());
        let plan = awaiting(&engine, "2.0").await;

        // 50 bps of 2.0 is 0.01
        engine.ledger.credit(&plan.deposit_address, eth("1.99"));
        assert!(matches!(
            watcher.check_funding(&plan).await.unwrap(),
            FundingOutcome::Funded(_)
        ));
    }

    #[tokio::test]
    async fn empty_deposit_never_funds_even_with_full_tolerance() {
        let mut config = crate::test_support::routing_config();
        config.funding_tolerance_bps = 20_000;
        let engine = TestEngine::with_config(config);
        let watcher = FundingWatcher::new(engine.ctx.clone());
        let plan = awaiting(&engine, "2.0").await;

        assert_eq!(
            watcher.check_funding(&plan).await.unwrap(),
            FundingOutcome::Pending { received: Some(0) }
        );
    }

    #[tokio::test]
    async fn partial_deposit_keeps_waiting() {
        let engine = TestEngine::new();
        let watcher = FundingWatcher::new(engine.ctx.clone());
        let plan = awaiting(&engine, "2.0").await;

        engine.ledger.credit(&plan.deposit_address, eth("1.5"));
        assert_eq!(
            watcher.check_funding(&plan).await.unwrap(),
            FundingOutcome::Pending {
                received: Some(eth("1.5"))
            }
        );
    }

    #[tokio::test]
    async fn unfunded_plan_expires_and_never_funds() {
        let engine = TestEngine::new();
        let watcher = FundingWatcher::new(engine.ctx.clone());
        let plan = awaiting(&engine, "2.0").await;
        let after_window = plan.funding_expires_at + Duration::seconds(1);

        let outcome = watcher.check_funding_at(&plan, after_window).await.unwrap();
        let FundingOutcome::Expired(expired) = outcome else {
            panic!("expected Expired, got {outcome:?}");
        };
        assert_eq!(expired.error.as_deref(), Some(EngineError::FundingTimeout.code()));

        // Late deposit changes nothing.
        engine.ledger.credit(&plan.deposit_address, eth("2.0"));
        assert_eq!(
            watcher.check_funding(&expired).await.unwrap(),
            FundingOutcome::NotApplicable
        );

        // A stale copy cannot resurrect the plan either.
        let stale = watcher.check_funding(&plan).await;
        assert!(matches!(
            stale,
            Err(EngineError::Storage(StoreError::Conflict(_)))
        ));
        let stored = engine.ctx.store.get_plan(&plan.plan_id).unwrap().unwrap();
        assert_eq!(stored.state, PlanState::Expired);
        assert!(stored.funded_amount.is_none());
    }

    #[tokio::test]
    async fn expiry_is_strict_even_with_late_funds() {
        let engine = TestEngine::new();
        let watcher = FundingWatcher::new(engine.ctx.clone());
        let plan = awaiting(&engine, "2.0").await;

        engine.ledger.credit(&plan.deposit_address, eth("2.0"));
        let outcome = watcher
            .check_funding_at(&plan, plan.funding_expires_at + Duration::seconds(1))
            .await
            .unwrap();
        assert!(matches!(outcome, FundingOutcome::Expired(_)));
    }

    #[tokio::test]
    async fn partial_deposit_at_expiry_reports_insufficient_funds() {
        let engine = TestEngine::new();
        let watcher = FundingWatcher::new(engine.ctx.clone());
        let plan = awaiting(&engine, "2.0").await;

        engine.ledger.credit(&plan.deposit_address, eth("0.5"));
        let outcome = watcher
            .check_funding_at(&plan, plan.funding_expires_at + Duration::seconds(1))
            .await
            .unwrap();
        let FundingOutcome::Expired(expired) = outcome else {
            panic!("expected Expired, got {outcome:?}");
        };
        assert_eq!(expired.error.as_deref(), Some(EngineError::InsufficientFunds.code()));
    }

    #[tokio::test]
    async fn ledger_outage_before_expiry_leaves_plan_untouched() {
        let engine = TestEngine::new();
        let watcher = FundingWatcher::new(engine.ctx.clone());
        let plan = awaiting(&engine, "2.0").await;

        engine
            .ledger
            .fail_reads(Some(LedgerError::Network("connection refused".into())));
        assert_eq!(
            watcher.check_funding(&plan).await.unwrap(),
            FundingOutcome::Pending { received: None }
        );
        let stored = engine.ctx.store.get_plan(&plan.plan_id).unwrap().unwrap();
        assert_eq!(stored.state, PlanState::AwaitingFunding);
    }

    #[tokio::test]
    async fn ledger_outage_at_expiry_still_expires() {
        let engine = TestEngine::new();
        let watcher = FundingWatcher::new(engine.ctx.clone());
        let plan = awaiting(&engine, "2.0").await;

        engine
            .ledger
            .fail_reads(Some(LedgerError::Server("502".into())));
        let outcome = watcher
            .check_funding_at(&plan, plan.funding_expires_at + Duration::seconds(1))
            .await
            .unwrap();
        let FundingOutcome::Expired(expired) = outcome else {
            panic!("expected Expired, got {outcome:?}");
        };
        assert_eq!(expired.error.as_deref(), Some(EngineError::FundingTimeout.code()));
    }
}
