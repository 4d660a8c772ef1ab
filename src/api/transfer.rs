// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Transfer plan endpoints.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    error::ApiError,
    models::{CreatePlanRequest, CreatePlanResponse, StepRequest},
    routing::PlanStatus,
    state::AppState,
};

/// Query parameters for the status lookup.
#[derive(Debug, Deserialize, IntoParams)]
pub struct StatusQuery {
    /// Plan ID returned by `POST /transfer/plan`.
    pub id: String,
}

/// Create a routing plan.
///
/// Screens the destination, computes the fee and hop count and issues the
/// deposit account. The plan waits for funding until `fundingExpiresAt`.
#[utoipa::path(
    post,
    path = "/transfer/plan",
    tag = "Transfer",
    request_body = CreatePlanRequest,
    responses(
        (status = 200, description = "Plan created", body = CreatePlanResponse),
        (status = 400, description = "Invalid destination, amount or sender"),
        (status = 403, description = "Destination rejected by compliance screening")
    )
)]
pub async fn create_plan(
    State(state): State<AppState>,
    Json(request): Json<CreatePlanRequest>,
) -> Result<Json<CreatePlanResponse>, ApiError> {
    let plan = state
        .manager
        .create_plan(&request.sender_address, &request.destination, &request.amount)
        .await?;

    let config = state.manager.config();
    Ok(Json(CreatePlanResponse::new(
        &plan,
        config.fee_bps,
        config.estimated_time_ms(plan.hop_count),
    )))
}

/// Drive one step of a plan.
///
/// Checks funding or executes the next hop. Safe to call repeatedly; a
/// step already in flight is not repeated.
#[utoipa::path(
    post,
    path = "/transfer/step",
    tag = "Transfer",
    request_body = StepRequest,
    responses(
        (status = 200, description = "Updated plan status", body = PlanStatus),
        (status = 404, description = "Plan not found"),
        (status = 503, description = "Ledger unavailable")
    )
)]
pub async fn step(
    State(state): State<AppState>,
    Json(request): Json<StepRequest>,
) -> Result<Json<PlanStatus>, ApiError> {
    let status = state.manager.advance(&request.plan_id).await?;
    Ok(Json(status))
}

/// Current status of a plan.
#[utoipa::path(
    get,
    path = "/transfer/status",
    tag = "Transfer",
    params(StatusQuery),
    responses(
        (status = 200, description = "Plan status", body = PlanStatus),
        (status = 404, description = "Plan not found")
    )
)]
pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<PlanStatus>, ApiError> {
    Ok(Json(state.manager.status(&query.id)?))
}
