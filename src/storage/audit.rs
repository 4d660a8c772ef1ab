// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for plan and key lifecycle events.
//!
//! Events are appended to a daily JSONL file. Audit failures are logged
//! and never abort the operation being audited.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EncryptedStorage, StorageError, StorageResult};

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Plan events
    PlanCreated,
    PlanFunded,
    PlanExpired,
    PlanCompleted,
    PlanFailed,
    ComplianceRejected,

    // Hop events
    HopConfirmed,
    HopRetry,

    // Key events
    KeyIssued,
    KeyRetired,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub plan_id: Option<String>,
    pub hop_index: Option<u8>,
    pub details: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            plan_id: None,
            hop_index: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_plan(mut self, plan_id: impl Into<String>) -> Self {
        self.plan_id = Some(plan_id.into());
        self
    }

    pub fn with_hop(mut self, hop_index: u8) -> Self {
        self.hop_index = Some(hop_index);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Append-only audit log.
#[derive(Clone)]
pub struct AuditLog {
    storage: Arc<EncryptedStorage>,
}

impl AuditLog {
    pub fn new(storage: Arc<EncryptedStorage>) -> Self {
        Self { storage }
    }

    /// Append an event to its day's log file.
    pub fn log(&self, event: &AuditEvent) -> StorageResult<()> {
        let date = event.timestamp.format("%Y-%m-%d").to_string();
        let path = self.storage.paths().audit_events_file(&date);
        let line = serde_json::to_string(event)?;
        self.storage.append_line(&path, &line)
    }

    /// Append an event, logging instead of returning failures.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(&event) {
            tracing::warn!(
                event_type = ?event.event_type,
                plan_id = ?event.plan_id,
                error = %e,
                "Failed to write audit event"
            );
        }
    }

    /// Read audit events for a specific date.
    pub fn read_events(&self, date: &str) -> StorageResult<Vec<AuditEvent>> {
        let path = self.storage.paths().audit_events_file(date);
        let content = self.storage.read_raw(&path)?;

        let content_str = String::from_utf8(content).map_err(|e| {
            StorageError::SerializationError(format!("Invalid UTF-8 in audit log: {e}"))
        })?;

        content_str
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(StorageError::from))
            .collect()
    }

    /// Events for one plan on a given date.
    pub fn events_for_plan(&self, plan_id: &str, date: &str) -> StorageResult<Vec<AuditEvent>> {
        Ok(self
            .read_events(date)?
            .into_iter()
            .filter(|e| e.plan_id.as_deref() == Some(plan_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::encrypted_fs::tests::test_storage;

    #[test]
    fn failed_event() {
        let event = AuditEvent::new(AuditEventType::PlanFailed)
            .with_plan("plan-1")
            .with_hop(4)
            .failed("malformed transaction");

        assert!(!event.success);
        assert_eq!(event.hop_index, Some(4));
        assert_eq!(event.error.as_deref(), Some("malformed transaction"));
    }

    #[test]
    fn log_and_read_events() {
        let (_temp, storage) = test_storage();
        let audit = AuditLog::new(Arc::new(storage));

        audit.record(AuditEvent::new(AuditEventType::PlanCreated).with_plan("p1"));
        audit.record(
            AuditEvent::new(AuditEventType::KeyIssued)
                .with_plan("p1")
                .with_hop(0),
        );
        audit.record(AuditEvent::new(AuditEventType::PlanCreated).with_plan("p2"));

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let events = audit.read_events(&today).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, AuditEventType::PlanCreated);
        assert_eq!(events[1].event_type, AuditEventType::KeyIssued);

        let p1 = audit.events_for_plan("p1", &today).unwrap();
        assert_eq!(p1.len(), 2);
    }
}
