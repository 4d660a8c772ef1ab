// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the transfer endpoints. Field names are
//! camelCase on the wire; amounts are decimal strings in the native unit.
//!
//! Plan snapshots returned by the status and step endpoints are
//! [`crate::routing::PlanStatus`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{format_amount, NATIVE_DECIMALS};
use crate::routing::TransferPlan;

// =============================================================================
// Requests
// =============================================================================

/// Body of `POST /transfer/plan`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanRequest {
    /// Raw address or a registered alias (e.g. `alice.pay`).
    pub destination: String,
    /// Amount in the native unit, e.g. `"2.0"`.
    pub amount: String,
    /// Address the deposit will come from.
    #[serde(alias = "sender")]
    pub sender_address: String,
}

/// Body of `POST /transfer/step`. Accepts `planId` or `id`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepRequest {
    #[serde(alias = "id")]
    pub plan_id: String,
}

// =============================================================================
// Responses
// =============================================================================

/// Fee components of a plan.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    pub amount: String,
    pub fee: String,
    pub fee_applied: bool,
    /// Fee rate in basis points.
    pub fee_bps: u32,
    /// What the destination receives before network costs.
    pub net_amount: String,
}

/// Response of `POST /transfer/plan`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlanResponse {
    pub plan_id: String,
    /// Where the sender must deposit `amount`.
    pub deposit_address: String,
    pub resolved_address: String,
    pub fees: FeeBreakdown,
    pub hop_count: u8,
    pub funding_expires_at: DateTime<Utc>,
    pub funding_expires_at_unix_ms: i64,
    pub estimated_time_ms: u64,
}

impl CreatePlanResponse {
    pub fn new(plan: &TransferPlan, fee_bps: u32, estimated_time_ms: u64) -> Self {
        Self {
            plan_id: plan.plan_id.clone(),
            deposit_address: plan.deposit_address.clone(),
            resolved_address: plan.destination.clone(),
            fees: FeeBreakdown {
                amount: format_amount(plan.amount, NATIVE_DECIMALS),
                fee: format_amount(plan.fee, NATIVE_DECIMALS),
                fee_applied: plan.fee_applied,
                fee_bps: if plan.fee_applied { fee_bps } else { 0 },
                net_amount: format_amount(plan.net_amount(), NATIVE_DECIMALS),
            },
            hop_count: plan.hop_count,
            funding_expires_at: plan.funding_expires_at,
            funding_expires_at_unix_ms: plan.funding_expires_at.timestamp_millis(),
            estimated_time_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::plan::tests::sample_plan;
    use crate::routing::PlanState;

    #[test]
    fn step_request_accepts_either_id_field() {
        let a: StepRequest = serde_json::from_str(r#"{"planId":"p1"}"#).unwrap();
        let b: StepRequest = serde_json::from_str(r#"{"id":"p1"}"#).unwrap();
        assert_eq!(a.plan_id, "p1");
        assert_eq!(b.plan_id, "p1");
    }

    #[test]
    fn create_response_carries_fee_breakdown() {
        let plan = sample_plan(PlanState::AwaitingFunding);
        let response = CreatePlanResponse::new(&plan, 100, 30_000);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["fees"]["fee"], "0.02");
        assert_eq!(json["fees"]["netAmount"], "1.98");
        assert_eq!(json["fees"]["feeBps"], 100);
        assert_eq!(json["hopCount"], 7);
        assert_eq!(json["estimatedTimeMs"], 30_000);
    }
}
