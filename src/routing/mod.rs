// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ephemeral routing engine.
//!
//! A plan moves a deposit through a chain of single-use accounts:
//!
//! ```text
//! sender -> hop 0 -> hop 1 -> ... -> hop N-1 -> destination
//!                                        \-> fee collector
//! ```
//!
//! [`manager::PlanManager`] owns the plan state machine and delegates to
//! [`funding::FundingWatcher`] and [`scheduler::HopScheduler`]. Plans
//! progress independently; per-plan ordering comes from check-and-set
//! writes in the [`crate::storage::PlanStore`], not from locks.

use std::sync::Arc;

use crate::blockchain::RpcClient;
use crate::config::RoutingConfig;
use crate::storage::{AuditLog, PlanStore};

pub mod compliance;
pub mod entropy;
pub mod error;
pub mod funding;
pub mod keys;
pub mod manager;
pub mod plan;
pub mod resolver;
pub mod scheduler;
pub mod status;
pub mod step;

pub use compliance::{ComplianceGate, Verdict};
pub use entropy::Entropy;
pub use error::{EngineError, EngineResult};
pub use keys::KeyLifecycleManager;
pub use manager::PlanManager;
pub use plan::{PlanState, TransferPlan};
pub use status::{PlanStatus, StatusNotifier};

/// Handles shared by the funding watcher, the hop scheduler and the manager.
#[derive(Clone)]
pub struct RoutingContext {
    pub config: Arc<RoutingConfig>,
    pub store: Arc<PlanStore>,
    pub keys: Arc<KeyLifecycleManager>,
    pub rpc: Arc<RpcClient>,
    pub audit: AuditLog,
    pub entropy: Entropy,
}
