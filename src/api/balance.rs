// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger balance lookup.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    blockchain::{format_amount, Address, NativeBalance, NATIVE_DECIMALS},
    error::ApiError,
    state::AppState,
};

/// Query parameters for balance request.
#[derive(Debug, Deserialize, IntoParams)]
pub struct BalanceQuery {
    /// Address to query.
    pub wallet: String,
}

/// Balance response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    /// Native balance
    #[serde(flatten)]
    pub balance: NativeBalance,
    /// Whether plans sent from this address skip the relay fee.
    /// Null when the exemption lookup failed.
    pub fee_exempt: Option<bool>,
}

/// Get the native balance of an address and its fee exemption status.
#[utoipa::path(
    get,
    path = "/balance",
    tag = "Balance",
    params(BalanceQuery),
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse),
        (status = 400, description = "Invalid address"),
        (status = 503, description = "Ledger unavailable")
    )
)]
pub async fn get_balance(
    State(state): State<AppState>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let wallet = Address::parse(&query.wallet)
        .map_err(|e| ApiError::bad_request(format!("Invalid wallet address: {e}")))?;

    let raw = state.rpc.balance(wallet.as_str()).await.map_err(|e| {
        tracing::warn!(error = %e, "Balance lookup failed");
        ApiError::service_unavailable(format!("Failed to query balance: {e}"))
    })?;

    let fee_exempt = state.manager.fee_exempt(wallet.as_str()).await;

    Ok(Json(BalanceResponse {
        balance: NativeBalance {
            wallet: wallet.into_string(),
            balance_raw: raw.to_string(),
            balance_formatted: format_amount(raw, NATIVE_DECIMALS),
        },
        fee_exempt,
    }))
}
