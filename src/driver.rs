// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Plan Driver
//!
//! Background task that keeps plans moving when no client is calling
//! `POST /transfer/step`.
//!
//! ## Strategy
//!
//! Every `poll_interval` (default 5 s) the driver:
//! 1. Lists all non-terminal plans.
//! 2. Spawns one `advance` per plan into a `JoinSet`, so plans progress
//!    concurrently and a slow hop never holds up the others.
//! 3. Waits for the sweep to finish before sleeping again.
//!
//! An external `/transfer/step` racing the driver on the same plan is
//! absorbed by the plan store's check-and-set writes.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`. The same token cancels
//! in-flight jitter waits in the scheduler, so a sweep in progress winds
//! down promptly.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::routing::PlanManager;

/// Default interval between sweeps.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct PlanDriver {
    manager: Arc<PlanManager>,
    poll_interval: Duration,
}

impl PlanDriver {
    pub fn new(manager: Arc<PlanManager>, poll_interval: Duration) -> Self {
        Self {
            manager,
            poll_interval,
        }
    }

    /// Run sweeps until the cancellation token is triggered.
    ///
    /// ```rust,ignore
    /// tokio::spawn(driver.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Plan driver starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Plan driver shutting down");
                return;
            }

            self.sweep().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Plan driver shutting down");
                    return;
                }
            }
        }
    }

    /// Advance every active plan once. Returns the number of plans visited.
    pub async fn sweep(&self) -> usize {
        let plan_ids = match self.manager.active_plan_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Plan driver: failed to list active plans");
                return 0;
            }
        };
        if plan_ids.is_empty() {
            return 0;
        }
        debug!(count = plan_ids.len(), "Plan driver: advancing plans");

        let count = plan_ids.len();
        let mut tasks = JoinSet::new();
        for plan_id in plan_ids {
            let manager = self.manager.clone();
            tasks.spawn(async move {
                let result = manager.advance(&plan_id).await;
                (plan_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((plan_id, Ok(status))) => {
                    debug!(plan_id = %plan_id, state = %status.state, hop = status.current_hop_index, "Plan driver: advanced");
                }
                Ok((plan_id, Err(e))) => {
                    warn!(plan_id = %plan_id, error = %e, "Plan driver: advance failed");
                }
                Err(e) => {
                    warn!(error = %e, "Plan driver: advance task panicked");
                }
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::PlanState;
    use crate::test_support::TestEngine;

    #[tokio::test]
    async fn sweeps_drive_all_plans_to_completion() {
        let engine = TestEngine::new();
        let first = engine.funded_plan("1.0").await;
        let second = engine.funded_plan("3.0").await;
        let driver = PlanDriver::new(engine.manager.clone(), Duration::from_millis(1));

        let mut sweeps = 0;
        while driver.sweep().await > 0 {
            sweeps += 1;
            assert!(sweeps <= 20, "plans did not finish");
        }

        for plan_id in [first, second] {
            let status = engine.manager.status(&plan_id).unwrap();
            assert_eq!(status.state, PlanState::Complete);
        }
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let engine = TestEngine::new();
        let driver = PlanDriver::new(engine.manager.clone(), Duration::from_secs(3600));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(driver.run(shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
