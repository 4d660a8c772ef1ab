// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Read-only projection of plan state for external callers.
//!
//! Snapshots never include intermediate hop addresses.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use utoipa::ToSchema;

use super::error::{EngineError, EngineResult};
use super::plan::{PlanState, TransferPlan};
use crate::blockchain::{format_amount, NATIVE_DECIMALS};
use crate::storage::PlanStore;

/// Buffered snapshots per subscriber before the oldest are dropped.
const CHANNEL_CAPACITY: usize = 256;

/// Plan snapshot returned by the status and step endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatus {
    pub plan_id: String,
    pub state: PlanState,
    /// Next hop to execute (equals `hopCount` once complete).
    pub current_hop_index: u8,
    pub hop_count: u8,
    pub progress_percent: u8,
    pub deposit_address: String,
    pub destination: String,
    /// Requested amount, formatted.
    pub amount: String,
    pub fee: String,
    pub fee_applied: bool,
    pub net_amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funded_amount: Option<String>,
    pub funding_expires_at: DateTime<Utc>,
    pub funding_expires_at_unix_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&TransferPlan> for PlanStatus {
    fn from(plan: &TransferPlan) -> Self {
        let progress_percent = match plan.state {
            PlanState::Complete => 100,
            _ if plan.hop_count == 0 => 0,
            _ => (u32::from(plan.current_hop_index) * 100 / u32::from(plan.hop_count)) as u8,
        };
        Self {
            plan_id: plan.plan_id.clone(),
            state: plan.state,
            current_hop_index: plan.current_hop_index,
            hop_count: plan.hop_count,
            progress_percent,
            deposit_address: plan.deposit_address.clone(),
            destination: plan.destination.clone(),
            amount: format_amount(plan.amount, NATIVE_DECIMALS),
            fee: format_amount(plan.fee, NATIVE_DECIMALS),
            fee_applied: plan.fee_applied,
            net_amount: format_amount(plan.net_amount(), NATIVE_DECIMALS),
            funded_amount: plan
                .funded_amount
                .map(|v| format_amount(v, NATIVE_DECIMALS)),
            funding_expires_at: plan.funding_expires_at,
            funding_expires_at_unix_ms: plan.funding_expires_at.timestamp_millis(),
            completion_signature: plan.completion_signature.clone(),
            error: plan.error.clone(),
            created_at: plan.created_at,
            updated_at: plan.updated_at,
        }
    }
}

/// Serves plan snapshots and pushes them to subscribers on change.
pub struct StatusNotifier {
    store: Arc<PlanStore>,
    updates: broadcast::Sender<PlanStatus>,
}

impl StatusNotifier {
    pub fn new(store: Arc<PlanStore>) -> Self {
        let (updates, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { store, updates }
    }

    pub fn status(&self, plan_id: &str) -> EngineResult<PlanStatus> {
        self.store
            .get_plan(plan_id)?
            .map(|plan| PlanStatus::from(&plan))
            .ok_or_else(|| EngineError::NotFound(plan_id.to_string()))
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PlanStatus> {
        self.updates.subscribe()
    }

    pub fn publish(&self, status: PlanStatus) {
        // No subscribers is fine.
        let _ = self.updates.send(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::plan::tests::sample_plan;
    use crate::test_support::TestDirs;

    #[test]
    fn snapshot_formats_amounts_and_progress() {
        let mut plan = sample_plan(PlanState::Routing);
        plan.current_hop_index = 3;
        plan.hop_count = 12;

        let status = PlanStatus::from(&plan);
        assert_eq!(status.amount, "2");
        assert_eq!(status.fee, "0.02");
        assert_eq!(status.net_amount, "1.98");
        assert_eq!(status.progress_percent, 25);
        assert_eq!(
            status.funding_expires_at_unix_ms,
            plan.funding_expires_at.timestamp_millis()
        );
    }

    #[test]
    fn complete_plans_report_full_progress() {
        let mut plan = sample_plan(PlanState::Complete);
        plan.current_hop_index = plan.hop_count;
        assert_eq!(PlanStatus::from(&plan).progress_percent, 100);
    }

    #[test]
    fn serializes_camel_case_without_empty_fields() {
        let status = PlanStatus::from(&sample_plan(PlanState::AwaitingFunding));
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["state"], "awaiting_funding");
        assert_eq!(json["hopCount"], 7);
        assert!(json.get("currentHopIndex").is_some());
        assert!(json.get("completionSignature").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn unknown_plan_is_not_found() {
        let dirs = TestDirs::new();
        let notifier = StatusNotifier::new(dirs.store.clone());
        assert!(matches!(
            notifier.status("missing"),
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn subscribers_receive_published_snapshots() {
        let dirs = TestDirs::new();
        let notifier = StatusNotifier::new(dirs.store.clone());
        let mut rx = notifier.subscribe();

        let status = PlanStatus::from(&sample_plan(PlanState::Funded));
        notifier.publish(status.clone());
        assert_eq!(rx.recv().await.unwrap(), status);
    }
}
