//! HTTP surface.
//!
//! ```text
//! /
//! ├── /health                              - liveness
//! ├── /auth/{signup,login,logout,me}       - auth provider passthrough
//! ├── /estimate                            - public price estimator
//! ├── /stats                               - public platform figures
//! ├── /track/{tracking_number}             - public tracking page
//! ├── /shipments/*                         - signed-in user operations
//! └── /admin/*                             - allow-listed admin operations
//! ```
//!
//! The caller is identified from `Authorization: Bearer <token>` on every
//! request and handed to the service as a [`RequestContext`]. Bodies and path
//! segments go through [`JsonBody`] and [`PathParam`] so that rejections use
//! the same `{"error": ...}` shape as every other failure.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::auth::{AdminAllowList, AuthError, AuthProvider, Identity, RequestContext, Session};
use crate::error::ShipmentError;
use crate::models::{Shipment, ShipmentForm, ShipmentStatus};
use crate::pricing::{Estimate, EstimateRequest};
use crate::service::{Quote, ShipmentService, TrackingView};
use crate::stats::{PlatformStats, ShipmentStats};
use crate::store::{StoreError, Subscription};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ShipmentService>,
    pub auth: Arc<dyn AuthProvider>,
    pub admins: Arc<AdminAllowList>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth_router())
        .route("/estimate", post(estimate))
        .route("/stats", get(platform_stats))
        .route("/track/{tracking_number}", get(track))
        .merge(shipments_router())
        .nest("/admin", admin_router())
        .with_state(state)
}

fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
}

fn shipments_router() -> Router<AppState> {
    Router::new()
        .route("/shipments", get(my_shipments).post(create_shipment))
        .route("/shipments/quote", post(quote))
        .route("/shipments/stats", get(my_stats))
        .route("/shipments/live", get(my_shipments_live))
}

fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/shipments", get(all_shipments))
        .route("/shipments/live", get(all_shipments_live))
        .route("/shipments/{id}/status", put(update_status))
        .route("/shipments/{id}/verify-payment", post(verify_payment))
        .route("/payments/pending", get(pending_payments))
}

impl ShipmentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingField { .. } | Self::InvalidField { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::MalformedRequest { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            Self::NotFound | Self::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Auth(AuthError::Backend(_)) => StatusCode::BAD_GATEWAY,
            Self::Auth(_) => StatusCode::BAD_REQUEST,
            Self::Store(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ShipmentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// `axum::Json` with rejections reported as [`ShipmentError`].
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ShipmentError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(request, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ShipmentError::MalformedRequest {
                status: rejection.status().as_u16(),
                message: rejection.body_text(),
            }),
        }
    }
}

/// `axum::extract::Path` with rejections reported as [`ShipmentError`].
pub struct PathParam<T>(pub T);

impl<S, T> FromRequestParts<S> for PathParam<T>
where
    Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = ShipmentError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Path::<T>::from_request_parts(parts, state).await {
            Ok(Path(value)) => Ok(Self(value)),
            Err(rejection) => Err(ShipmentError::MalformedRequest {
                status: rejection.status().as_u16(),
                message: rejection.body_text(),
            }),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = ShipmentError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers) else {
            return Ok(RequestContext::anonymous());
        };
        let identity = state.auth.identify(token).await?;
        Ok(RequestContext::resolve(identity, &state.admins))
    }
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Me {
    identity: Identity,
    is_admin: bool,
}

async fn signup(
    State(state): State<AppState>,
    JsonBody(credentials): JsonBody<Credentials>,
) -> Result<(StatusCode, Json<Session>), ShipmentError> {
    let session = state
        .auth
        .signup(&credentials.email, &credentials.password)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn login(
    State(state): State<AppState>,
    JsonBody(credentials): JsonBody<Credentials>,
) -> Result<Json<Session>, ShipmentError> {
    let session = state
        .auth
        .login(&credentials.email, &credentials.password)
        .await?;
    Ok(Json(session))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ShipmentError> {
    if let Some(token) = bearer_token(&headers) {
        state.auth.logout(token).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn me(ctx: RequestContext) -> Result<Json<Me>, ShipmentError> {
    let identity = ctx.require_user()?.clone();
    Ok(Json(Me {
        identity,
        is_admin: ctx.is_admin(),
    }))
}

async fn estimate(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<EstimateRequest>,
) -> Json<Estimate> {
    Json(state.service.estimate(&request))
}

async fn platform_stats(State(state): State<AppState>) -> Result<Json<PlatformStats>, ShipmentError> {
    Ok(Json(state.service.platform_stats().await?))
}

async fn track(
    State(state): State<AppState>,
    PathParam(tracking_number): PathParam<String>,
) -> Result<Json<TrackingView>, ShipmentError> {
    Ok(Json(state.service.track(&tracking_number).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateShipmentRequest {
    #[serde(flatten)]
    form: ShipmentForm,
    #[serde(default)]
    transaction_id: String,
}

async fn quote(
    State(state): State<AppState>,
    ctx: RequestContext,
    JsonBody(form): JsonBody<ShipmentForm>,
) -> Result<Json<Quote>, ShipmentError> {
    Ok(Json(state.service.quote(&ctx, &form)?))
}

async fn create_shipment(
    State(state): State<AppState>,
    ctx: RequestContext,
    JsonBody(request): JsonBody<CreateShipmentRequest>,
) -> Result<(StatusCode, Json<Shipment>), ShipmentError> {
    let shipment = state
        .service
        .create_shipment(&ctx, &request.form, &request.transaction_id)
        .await?;
    Ok((StatusCode::CREATED, Json(shipment)))
}

async fn my_shipments(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<Shipment>>, ShipmentError> {
    Ok(Json(state.service.my_shipments(&ctx).await?))
}

async fn my_stats(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<ShipmentStats>, ShipmentError> {
    Ok(Json(state.service.my_stats(&ctx, Utc::now()).await?))
}

async fn my_shipments_live(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ShipmentError> {
    let subscription = state.service.subscribe_mine(&ctx).await?;
    Ok(live_events(subscription))
}

async fn all_shipments(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<Shipment>>, ShipmentError> {
    Ok(Json(state.service.all_shipments(&ctx).await?))
}

async fn all_shipments_live(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ShipmentError> {
    let subscription = state.service.subscribe_all(&ctx).await?;
    Ok(live_events(subscription))
}

async fn pending_payments(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<Shipment>>, ShipmentError> {
    Ok(Json(state.service.pending_payments(&ctx).await?))
}

#[derive(Debug, Deserialize)]
struct StatusChange {
    status: ShipmentStatus,
}

async fn update_status(
    State(state): State<AppState>,
    ctx: RequestContext,
    PathParam(id): PathParam<String>,
    JsonBody(change): JsonBody<StatusChange>,
) -> Result<Json<Shipment>, ShipmentError> {
    Ok(Json(state.service.update_status(&ctx, &id, change.status).await?))
}

async fn verify_payment(
    State(state): State<AppState>,
    ctx: RequestContext,
    PathParam(id): PathParam<String>,
) -> Result<Json<Shipment>, ShipmentError> {
    Ok(Json(state.service.verify_payment(&ctx, &id).await?))
}

/// One `snapshot` event per change. The subscription is dropped, and so
/// cancelled, when the client goes away.
fn live_events(subscription: Subscription) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let events = subscription
        .into_stream()
        .map(|snapshot| Event::default().event("snapshot").json_data(snapshot));
    Sse::new(events).keep_alive(KeepAlive::default())
}
