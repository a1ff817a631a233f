// [apps/control-plane/src/handlers/analytics.rs]
use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::NaiveDate;
use serde::Deserialize;
use switchyard_core::aggregate::{AggregateScope, DailyAggregate, MonthlyAggregate, SwitchBreakdown};
use switchyard_core::errors::CoreError;
use switchyard_core::ids::{DeviceId, RoomId};
use switchyard_core::user::{well_known, ResourceScope};

use crate::auth::{AuthService, SessionContext};
use crate::error::ApiError;
use crate::state::AppState;

/// Authorizes `ANALYTICS_VIEW` against the concrete resource an aggregate
/// scope names — a device or a room restrict a "restrict-to-assigned"
/// viewer the same way `DEVICE_VIEW` does; `Global` is building-wide and
/// only gated by possession of the capability itself.
fn authorize_scope(auth: &AuthService, session: &SessionContext, scope: AggregateScope, scope_id: &str) -> Result<(), CoreError> {
    match scope {
        AggregateScope::Device => auth.authorize(session, well_known::ANALYTICS_VIEW, ResourceScope::Device(&DeviceId::from(scope_id))),
        AggregateScope::Room => auth.authorize(session, well_known::ANALYTICS_VIEW, ResourceScope::Room(&RoomId::from(scope_id))),
        AggregateScope::Global => auth.authorize(session, well_known::ANALYTICS_VIEW, ResourceScope::None),
    }
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub scope: AggregateScope,
    pub scope_id: String,
    pub date: NaiveDate,
}

/// `GET /analytics/summary` (spec §6.1) — a single finalized local day.
pub async fn summary(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<Option<DailyAggregate>>, ApiError> {
    authorize_scope(&state.auth, &session, query.scope, &query.scope_id)?;
    let aggregate = state.aggregation_engine.get_daily(query.scope, &query.scope_id, query.date).await?;
    Ok(Json(aggregate))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub scope: AggregateScope,
    pub scope_id: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// `GET /analytics/range` (spec §6.1) — daily rollups across `[from, to]`.
pub async fn range(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<DailyAggregate>>, ApiError> {
    authorize_scope(&state.auth, &session, query.scope, &query.scope_id)?;
    let days = state.aggregation_engine.get_range(query.scope, &query.scope_id, query.from, query.to).await?;
    Ok(Json(days))
}

#[derive(Debug, Deserialize)]
pub struct MonthlyQuery {
    pub scope: AggregateScope,
    pub scope_id: String,
    pub year: i32,
    pub month: u32,
}

/// `GET /analytics/monthly` (spec §6.1).
pub async fn monthly(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Query(query): Query<MonthlyQuery>,
) -> Result<Json<Option<MonthlyAggregate>>, ApiError> {
    authorize_scope(&state.auth, &session, query.scope, &query.scope_id)?;
    let aggregate = state.aggregation_engine.get_monthly(query.scope, &query.scope_id, query.year, query.month).await?;
    Ok(Json(aggregate))
}

#[derive(Debug, Deserialize)]
pub struct DeviceBreakdownQuery {
    pub device_id: DeviceId,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// `GET /analytics/device-breakdown` — per-switch energy/on-time within a
/// range (spec §6.1).
pub async fn device_breakdown(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Query(query): Query<DeviceBreakdownQuery>,
) -> Result<Json<Vec<SwitchBreakdown>>, ApiError> {
    state.auth.authorize(&session, well_known::ANALYTICS_VIEW, ResourceScope::Device(&query.device_id))?;
    let breakdown = state.aggregation_engine.get_device_breakdown(&query.device_id, query.from, query.to).await?;
    Ok(Json(breakdown))
}
