// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transfer plans and their state machine.
//!
//! ```text
//! Created -> AwaitingFunding -> Funded -> Routing -> Complete
//!                  |                          |
//!                  v                          v
//!               Expired                     Failed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::amount_serde;

/// Lifecycle state of a transfer plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    Created,
    AwaitingFunding,
    Funded,
    Routing,
    Complete,
    Expired,
    Failed,
}

impl PlanState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanState::Complete | PlanState::Expired | PlanState::Failed
        )
    }

    /// Whether `self -> next` is an edge of the plan graph.
    pub fn can_transition_to(self, next: PlanState) -> bool {
        use PlanState::*;
        matches!(
            (self, next),
            (Created, AwaitingFunding)
                | (AwaitingFunding, Funded)
                | (AwaitingFunding, Expired)
                | (Funded, Routing)
                | (Routing, Complete)
                | (Routing, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlanState::Created => "created",
            PlanState::AwaitingFunding => "awaiting_funding",
            PlanState::Funded => "funded",
            PlanState::Routing => "routing",
            PlanState::Complete => "complete",
            PlanState::Expired => "expired",
            PlanState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PlanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("Invalid plan transition from {from} to {to}")]
    InvalidTransition { from: PlanState, to: PlanState },
}

/// A requested private transfer and its full lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPlan {
    pub plan_id: String,
    pub sender: String,
    /// Destination as entered by the caller (address or alias).
    pub destination_input: String,
    /// Resolved destination address.
    pub destination: String,
    #[serde(with = "amount_serde")]
    pub amount: u128,
    #[serde(with = "amount_serde")]
    pub fee: u128,
    pub fee_applied: bool,
    /// Fixed at creation.
    pub hop_count: u8,
    /// Address of the hop-0 ephemeral account.
    pub deposit_address: String,
    pub state: PlanState,
    /// Index of the next hop to execute. Never decreases.
    pub current_hop_index: u8,
    pub created_at: DateTime<Utc>,
    pub funding_expires_at: DateTime<Utc>,
    #[serde(default, with = "amount_serde::option")]
    pub funded_amount: Option<u128>,
    pub completion_signature: Option<String>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Store revision this copy was read at.
    #[serde(default)]
    pub revision: u64,
}

impl TransferPlan {
    /// Amount the destination receives before network costs.
    pub fn net_amount(&self) -> u128 {
        self.amount.saturating_sub(self.fee)
    }

    pub fn is_final_hop(&self, hop_index: u8) -> bool {
        hop_index.saturating_add(1) == self.hop_count
    }

    pub fn is_funding_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.funding_expires_at
    }

    /// Copy of this plan moved to `next`, if the graph allows it.
    pub fn transition(&self, next: PlanState, now: DateTime<Utc>) -> Result<Self, PlanError> {
        if !self.state.can_transition_to(next) {
            return Err(PlanError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        let mut plan = self.clone();
        plan.state = next;
        plan.updated_at = now;
        Ok(plan)
    }
}

/// Fee in base units: `amount * fee_bps / 10_000`, rounded half up.
pub fn compute_fee(amount: u128, fee_bps: u32) -> Option<u128> {
    let scaled = amount.checked_mul(u128::from(fee_bps))?;
    Some(scaled.checked_add(5_000)? / 10_000)
}

/// Smallest received total that counts as funded for `amount`. Never zero,
/// so an empty deposit account is never funded.
pub fn funding_threshold(amount: u128, tolerance_bps: u32) -> u128 {
    let slack = amount / 10_000 * u128::from(tolerance_bps)
        + amount % 10_000 * u128::from(tolerance_bps) / 10_000;
    amount.saturating_sub(slack).max(1)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn sample_plan(state: PlanState) -> TransferPlan {
        let now = Utc::now();
        TransferPlan {
            plan_id: uuid::Uuid::new_v4().to_string(),
            sender: "0x1111111111111111111111111111111111111111".to_string(),
            destination_input: "0x2222222222222222222222222222222222222222".to_string(),
            destination: "0x2222222222222222222222222222222222222222".to_string(),
            amount: 2_000_000_000_000_000_000,
            fee: 20_000_000_000_000_000,
            fee_applied: true,
            hop_count: 7,
            deposit_address: "0x3333333333333333333333333333333333333333".to_string(),
            state,
            current_hop_index: 0,
            created_at: now,
            funding_expires_at: now + Duration::minutes(10),
            funded_amount: None,
            completion_signature: None,
            error: None,
            updated_at: now,
            revision: 0,
        }
    }

    #[test]
    fn graph_allows_only_forward_edges() {
        use PlanState::*;
        let all = [Created, AwaitingFunding, Funded, Routing, Complete, Expired, Failed];
        let allowed = [
            (Created, AwaitingFunding),
            (AwaitingFunding, Funded),
            (AwaitingFunding, Expired),
            (Funded, Routing),
            (Routing, Complete),
            (Routing, Failed),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use PlanState::*;
        for state in [Complete, Expired, Failed] {
            assert!(state.is_terminal());
            for next in [Created, AwaitingFunding, Funded, Routing, Complete, Expired, Failed] {
                assert!(!state.can_transition_to(next));
            }
        }
    }

    #[test]
    fn transition_rejects_non_matching_precondition() {
        let plan = sample_plan(PlanState::AwaitingFunding);
        let err = plan
            .transition(PlanState::Routing, Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::InvalidTransition {
                from: PlanState::AwaitingFunding,
                to: PlanState::Routing
            }
        );

        let funded = plan.transition(PlanState::Funded, Utc::now()).unwrap();
        assert_eq!(funded.state, PlanState::Funded);
        assert_eq!(funded.revision, plan.revision);
    }

    #[test]
    fn fee_is_one_percent_rounded() {
        // 2.0 native units
        let amount = 2_000_000_000_000_000_000u128;
        assert_eq!(compute_fee(amount, 100), Some(20_000_000_000_000_000));
        assert_eq!(compute_fee(149, 100), Some(1));
        assert_eq!(compute_fee(150, 100), Some(2));
        assert_eq!(compute_fee(49, 100), Some(0));
        assert_eq!(compute_fee(amount, 0), Some(0));
        assert_eq!(compute_fee(u128::MAX, 100), None);
    }

    #[test]
    fn net_amount_subtracts_fee() {
        let plan = sample_plan(PlanState::AwaitingFunding);
        assert_eq!(plan.net_amount(), 1_980_000_000_000_000_000);
    }

    #[test]
    fn funding_threshold_applies_tolerance() {
        assert_eq!(funding_threshold(10_000, 50), 9_950);
        assert_eq!(funding_threshold(10_000, 0), 10_000);
        assert_eq!(
            funding_threshold(2_000_000_000_000_000_000, 50),
            1_990_000_000_000_000_000
        );
        assert_eq!(funding_threshold(10_000, 10_000), 1);
        assert_eq!(funding_threshold(10_000, 20_000), 1);
    }

    #[test]
    fn final_hop_detection() {
        let plan = sample_plan(PlanState::Routing);
        assert!(!plan.is_final_hop(0));
        assert!(!plan.is_final_hop(5));
        assert!(plan.is_final_hop(6));
    }
}
