// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Engine-level error taxonomy surfaced to callers.

use crate::blockchain::LedgerError;
use crate::routing::keys::KeyError;
use crate::routing::plan::PlanError;
use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed destination or amount. Never retried.
    #[error("{0}")]
    Validation(String),

    /// Destination blocked by screening (or screening unavailable).
    #[error("Destination rejected by compliance screening")]
    ComplianceRejected,

    #[error("Funding window elapsed without a deposit")]
    FundingTimeout,

    #[error("Deposit below the requested amount")]
    InsufficientFunds,

    #[error("Ledger temporarily unavailable: {0}")]
    TransientLedger(LedgerError),

    #[error("Ledger error: {0}")]
    FatalLedger(LedgerError),

    #[error("Plan not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("State error: {0}")]
    Plan(#[from] PlanError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    /// Stable name of the error class, recorded as a plan's error summary.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "ValidationError",
            EngineError::ComplianceRejected => "ComplianceRejected",
            EngineError::FundingTimeout => "FundingTimeout",
            EngineError::InsufficientFunds => "InsufficientFunds",
            EngineError::TransientLedger(_) => "TransientLedgerError",
            EngineError::FatalLedger(_) => "FatalLedgerError",
            EngineError::NotFound(_) => "NotFound",
            EngineError::Storage(_)
            | EngineError::Key(_)
            | EngineError::Plan(_)
            | EngineError::Configuration(_) => "InternalError",
        }
    }
}

impl From<LedgerError> for EngineError {
    fn from(err: LedgerError) -> Self {
        if err.is_transient() {
            EngineError::TransientLedger(err)
        } else {
            EngineError::FatalLedger(err)
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_split_by_class() {
        let transient: EngineError = LedgerError::RateLimited("429".into()).into();
        assert!(matches!(transient, EngineError::TransientLedger(_)));

        let fatal: EngineError = LedgerError::MalformedTransaction("rlp".into()).into();
        assert!(matches!(fatal, EngineError::FatalLedger(_)));
    }

    #[test]
    fn funding_failures_have_stable_codes() {
        assert_eq!(EngineError::FundingTimeout.code(), "FundingTimeout");
        assert_eq!(EngineError::InsufficientFunds.code(), "InsufficientFunds");
        assert_eq!(EngineError::Configuration("x".into()).code(), "InternalError");
    }
}
