use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::Json,
};

use crate::api::{ApiResult, AppState, Principal};
use crate::subscription::{PaymentConfirmation, SubscriptionView};

pub async fn create_subscription(
    State(state): State<AppState>,
    caller: Principal,
    payload: Result<Json<PaymentConfirmation>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubscriptionView>)> {
    let Json(payment) = payload?;
    let view = state.subscriptions.confirm_payment(caller.as_str(), payment).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    caller: Principal,
) -> ApiResult<Json<Vec<SubscriptionView>>> {
    Ok(Json(state.subscriptions.list(caller.as_str()).await?))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    caller: Principal,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<SubscriptionView>> {
    let Path(tx_hash) = path?;
    Ok(Json(state.subscriptions.get(caller.as_str(), &tx_hash).await?))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    caller: Principal,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<SubscriptionView>> {
    let Path(tx_hash) = path?;
    Ok(Json(state.subscriptions.cancel(caller.as_str(), &tx_hash).await?))
}
