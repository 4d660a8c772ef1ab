// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::HeaderName,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    blockchain::NativeBalance,
    models::{CreatePlanRequest, CreatePlanResponse, FeeBreakdown, StepRequest},
    routing::{PlanState, PlanStatus},
    state::AppState,
};

pub mod balance;
pub mod health;
pub mod transfer;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let routes = Router::new()
        .route("/transfer/plan", post(transfer::create_plan))
        .route("/transfer/step", post(transfer::step))
        .route("/transfer/status", get(transfer::status))
        .route("/balance", get(balance::get_balance))
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    Router::new()
        .merge(routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        transfer::create_plan,
        transfer::step,
        transfer::status,
        balance::get_balance,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            CreatePlanRequest,
            CreatePlanResponse,
            FeeBreakdown,
            StepRequest,
            PlanStatus,
            PlanState,
            NativeBalance,
            balance::BalanceResponse,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Transfer", description = "Multi-hop transfer plans"),
        (name = "Balance", description = "Ledger balance lookup"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;
