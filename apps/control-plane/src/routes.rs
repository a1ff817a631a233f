// [apps/control-plane/src/routes.rs]
//! Router assembly, grounded on the teacher's `create_sovereign_router`:
//! a CORS shield wraps the whole tree, a readiness gate (`health_guard`)
//! wraps everything past `/health`, and an identity gate (`auth_guard`)
//! wraps every route that needs a resolved session. `/auth/session` and
//! `/realtime` sit outside `auth_guard` — the former issues the token the
//! latter two consume, and `/realtime` authenticates over the wire instead
//! (spec §6.2).

use std::time::Duration;

use axum::http::{header, Method};
use axum::routing::{get, patch, post};
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::handlers::{analytics, auth, devices, health, intents, realtime, roles, schedules, tariffs};
use crate::middleware::{auth_guard, health_guard};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    let authenticated = Router::new()
        .route("/devices", get(devices::list_devices).post(devices::register_device))
        .route("/devices/:device_id", get(devices::get_device))
        .route("/devices/:device_id/switches/:switch_id/intent", post(intents::submit_single_intent))
        .route("/intents/bulk", post(intents::submit_bulk_intent))
        .route("/analytics/summary", get(analytics::summary))
        .route("/analytics/range", get(analytics::range))
        .route("/analytics/monthly", get(analytics::monthly))
        .route("/analytics/device-breakdown", get(analytics::device_breakdown))
        .route("/tariffs", post(tariffs::create_tariff))
        .route("/roles/:role/capabilities", post(roles::set_role_capabilities))
        .route("/users/:user_id/role", post(roles::reassign_user_role))
        .route("/schedules", get(schedules::list_my_schedules).post(schedules::create_schedule))
        .route("/schedules/:schedule_id", get(schedules::get_schedule).delete(schedules::delete_schedule))
        .route("/schedules/:schedule_id/enabled", patch(schedules::set_schedule_enabled))
        .layer(middleware::from_fn_with_state(state.clone(), auth_guard));

    let api = Router::new()
        .route("/auth/session", post(auth::create_session))
        .route("/realtime", get(realtime::upgrade))
        .merge(authenticated)
        .layer(middleware::from_fn_with_state(state.clone(), health_guard));

    Router::new()
        .route("/health", get(health::health))
        .nest("/api/v1", api)
        .layer(cors)
        .with_state(state)
}
