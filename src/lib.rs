// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ephemeral Relay - Multi-hop Payment Routing Engine
//!
//! Routes a deposit through a randomized chain of single-use accounts
//! before it reaches the destination, deducting a relay fee on the final
//! hop. Each intermediate key signs once and is destroyed.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `blockchain` - Ledger client, signing and the retrying RPC wrapper
//! - `driver` - Background task that advances active plans
//! - `routing` - Plan state machine, funding, hop scheduling, keys, compliance
//! - `storage` - Plan store (redb), key custody and audit log

pub mod api;
pub mod blockchain;
pub mod config;
pub mod driver;
pub mod error;
pub mod models;
pub mod routing;
pub mod state;
pub mod storage;

#[cfg(test)]
mod test_support;
