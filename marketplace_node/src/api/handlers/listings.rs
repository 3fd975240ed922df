//! Listing endpoints: developer CRUD, pinning, publishing and the public
//! catalogue.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;

use crate::api::{ApiResult, AppState, Principal};
use crate::listing::{Listing, ListingDraft, ListingEdit, ListingId, PublishPayload};

#[derive(Debug, Deserialize)]
pub struct ConfirmPublishRequest {
    pub transaction_hash: String,
}

pub async fn create_listing(
    State(state): State<AppState>,
    caller: Principal,
    payload: Result<Json<ListingDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Listing>)> {
    let Json(draft) = payload?;
    let listing = state.lifecycle.create_listing(caller.as_str(), draft).await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

pub async fn list_listings(State(state): State<AppState>, caller: Principal) -> ApiResult<Json<Vec<Listing>>> {
    Ok(Json(state.lifecycle.list_owned(caller.as_str()).await?))
}

pub async fn get_listing(
    State(state): State<AppState>,
    caller: Principal,
    path: Result<Path<ListingId>, PathRejection>,
) -> ApiResult<Json<Listing>> {
    let Path(id) = path?;
    Ok(Json(state.lifecycle.get_owned(caller.as_str(), id).await?))
}

pub async fn edit_listing(
    State(state): State<AppState>,
    caller: Principal,
    path: Result<Path<ListingId>, PathRejection>,
    payload: Result<Json<ListingEdit>, JsonRejection>,
) -> ApiResult<Json<Listing>> {
    let Path(id) = path?;
    let Json(edit) = payload?;
    Ok(Json(state.lifecycle.edit_listing(caller.as_str(), id, edit).await?))
}

pub async fn request_pin(
    State(state): State<AppState>,
    caller: Principal,
    path: Result<Path<ListingId>, PathRejection>,
) -> ApiResult<Json<Listing>> {
    let Path(id) = path?;
    Ok(Json(state.lifecycle.request_pin(caller.as_str(), id).await?))
}

pub async fn publish_payload(
    State(state): State<AppState>,
    caller: Principal,
    path: Result<Path<ListingId>, PathRejection>,
) -> ApiResult<Json<PublishPayload>> {
    let Path(id) = path?;
    Ok(Json(state.lifecycle.publish_payload(caller.as_str(), id).await?))
}

pub async fn confirm_publish(
    State(state): State<AppState>,
    caller: Principal,
    path: Result<Path<ListingId>, PathRejection>,
    payload: Result<Json<ConfirmPublishRequest>, JsonRejection>,
) -> ApiResult<Json<Listing>> {
    let Path(id) = path?;
    let Json(req) = payload?;
    let listing = state
        .lifecycle
        .confirm_publish(caller.as_str(), id, &req.transaction_hash)
        .await?;
    Ok(Json(listing))
}

pub async fn list_published(State(state): State<AppState>) -> ApiResult<Json<Vec<Listing>>> {
    Ok(Json(state.lifecycle.list_published().await?))
}

pub async fn get_published(
    State(state): State<AppState>,
    path: Result<Path<ListingId>, PathRejection>,
) -> ApiResult<Json<Listing>> {
    let Path(id) = path?;
    Ok(Json(state.lifecycle.get_published(id).await?))
}
