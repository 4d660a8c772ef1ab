// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-hop execution records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::blockchain::{amount_serde, SignedTransfer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

/// Current execution record of one hop, keyed by `(plan_id, hop_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingStep {
    pub plan_id: String,
    pub hop_index: u8,
    pub source: String,
    pub destination: String,
    /// Forwarded value, known once the sweep is signed.
    #[serde(default, with = "amount_serde::option")]
    pub amount: Option<u128>,
    /// Ledger attempts spent on this hop across all passes.
    pub attempts: u32,
    pub status: StepStatus,
    /// Fee transfer sent ahead of the final hop's sweep.
    pub fee_transfer: Option<SignedTransfer>,
    #[serde(default)]
    pub fee_confirmed: bool,
    /// Signed forwarding transfer, persisted before broadcast.
    pub transfer: Option<SignedTransfer>,
    pub jitter_ms: Option<u64>,
    pub last_error: Option<String>,
    /// Set while a worker owns this step.
    pub claimed_at: Option<DateTime<Utc>>,
    pub confirmed_block: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl RoutingStep {
    pub fn new(plan_id: &str, hop_index: u8, source: String, destination: String) -> Self {
        let now = Utc::now();
        Self {
            plan_id: plan_id.to_string(),
            hop_index,
            source,
            destination,
            amount: None,
            attempts: 0,
            status: StepStatus::Pending,
            fee_transfer: None,
            fee_confirmed: false,
            transfer: None,
            jitter_ms: None,
            last_error: None,
            claimed_at: None,
            confirmed_block: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Signature of the forwarding transaction, if signed.
    pub fn signature(&self) -> Option<&str> {
        self.transfer.as_ref().map(|t| t.signature.as_str())
    }

    /// Whether another worker currently holds a live claim.
    pub fn is_claimed(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        match self.claimed_at {
            Some(at) => now - at < lease,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Confirmed,
    Transient,
    Fatal,
}

/// Append-only audit entry for one execution pass over a hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAttempt {
    pub plan_id: String,
    pub hop_index: u8,
    /// Cumulative attempt counter of the step after this pass.
    pub attempt: u32,
    /// Ledger attempts spent in this pass.
    pub ledger_attempts: u32,
    pub outcome: AttemptOutcome,
    pub signature: Option<String>,
    pub jitter_ms: Option<u64>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl StepAttempt {
    pub fn record(
        step: &RoutingStep,
        ledger_attempts: u32,
        outcome: AttemptOutcome,
        error: Option<String>,
    ) -> Self {
        Self {
            plan_id: step.plan_id.clone(),
            hop_index: step.hop_index,
            attempt: step.attempts,
            ledger_attempts,
            outcome,
            signature: step.signature().map(str::to_string),
            jitter_ms: step.jitter_ms,
            error,
            recorded_at: Utc::now(),
        }
    }
}
