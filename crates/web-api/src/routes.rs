use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use domain::{AccountSummary, ProfileUpdate, RoomId, RoomSummary, ServerError, ServerErrorCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    auth::{assign_request_id, Anonymous, Authenticated, TOKEN_COOKIE},
    error::{ApiError, ServerResultExt},
    extract::{ApiJson, ApiQuery},
    state::AppState,
};

#[derive(Debug, Deserialize)]
struct SmsCodeQuery {
    phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginQuery {
    logintype: String,
}

#[derive(Debug, Deserialize)]
struct SmsLoginPayload {
    phone_number: String,
    sms_code: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    user_info: AccountSummary,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ListRoomsQuery {
    #[serde(default)]
    can_pk: bool,
}

#[derive(Debug, Deserialize)]
struct CreateRoomPayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CloseRoomPayload {
    room_id: String,
}

#[derive(Debug, Deserialize)]
struct PkPayload {
    target_room_id: String,
}

#[derive(Debug, Serialize)]
struct RoomsResponse {
    rooms: Vec<RoomSummary>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/v1", api_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(assign_request_id)),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/send_sms_code", post(send_sms_code))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/profile", get(get_profile).put(update_profile))
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/{room_id}", get(get_room))
        .route("/rooms/{room_id}/pk", post(request_pk))
        .route("/rooms/{room_id}/end_pk", post(end_pk))
        .route("/close_room", post(close_room))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn send_sms_code(
    State(state): State<AppState>,
    Anonymous(ctx): Anonymous,
    ApiQuery(query): ApiQuery<SmsCodeQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .account_service
        .send_verification_code(query.phone_number.as_deref().unwrap_or_default())
        .await
        .or_api(&ctx)?;
    Ok(Json(json!({ "request_id": ctx.request_id })))
}

async fn login(
    State(state): State<AppState>,
    Anonymous(ctx): Anonymous,
    ApiQuery(query): ApiQuery<LoginQuery>,
    ApiJson(payload): ApiJson<SmsLoginPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if query.logintype != "smscode" {
        return Err(ApiError::bad_request(
            format!("unsupported login type {}", query.logintype),
            ctx.request_id,
        ));
    }

    let outcome = state
        .account_service
        .login(&payload.phone_number, &payload.sms_code)
        .await
        .or_api(&ctx)?;

    let cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly",
        TOKEN_COOKIE,
        outcome.token.as_str(),
        state.session_ttl_secs
    );
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse {
            user_info: outcome.account,
            token: outcome.token.as_str().to_owned(),
        }),
    ))
}

async fn logout(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Result<impl IntoResponse, ApiError> {
    let existed = state
        .account_service
        .logout(&auth.account_id)
        .await
        .or_api(&auth.context)?;
    if !existed {
        return Err(ApiError::from_server(
            ServerError::from_code(ServerErrorCode::NotLoggedIn),
            &auth.context.request_id,
        ));
    }

    let cookie = format!("{}=; Path=/; Max-Age=0; HttpOnly", TOKEN_COOKIE);
    Ok(([(header::SET_COOKIE, cookie)], StatusCode::NO_CONTENT))
}

async fn get_profile(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Result<Json<AccountSummary>, ApiError> {
    let account = state
        .account_service
        .get_account(&auth.account_id)
        .await
        .or_api(&auth.context)?;
    Ok(Json(account.summary()))
}

async fn update_profile(
    State(state): State<AppState>,
    auth: Authenticated,
    ApiJson(payload): ApiJson<ProfileUpdate>,
) -> Result<Json<AccountSummary>, ApiError> {
    let account = state
        .account_service
        .update_profile(&auth.account_id, &auth.account_id, payload)
        .await
        .or_api(&auth.context)?;
    Ok(Json(account.summary()))
}

async fn list_rooms(
    State(state): State<AppState>,
    auth: Authenticated,
    ApiQuery(query): ApiQuery<ListRoomsQuery>,
) -> Result<Json<RoomsResponse>, ApiError> {
    let rooms = if query.can_pk {
        state.room_service.list_pk_candidates(&auth.account_id).await
    } else {
        state.room_service.list_rooms().await
    }
    .or_api(&auth.context)?;
    Ok(Json(RoomsResponse { rooms }))
}

async fn create_room(
    State(state): State<AppState>,
    auth: Authenticated,
    ApiJson(payload): ApiJson<CreateRoomPayload>,
) -> Result<(StatusCode, Json<RoomSummary>), ApiError> {
    let room = state
        .room_service
        .create_room(&auth.account_id, &payload.name)
        .await
        .or_api(&auth.context)?;
    info!(request_id = %auth.context.request_id, room_id = %room.id, "room created via api");
    Ok((StatusCode::CREATED, Json(room)))
}

async fn get_room(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSummary>, ApiError> {
    let room = state
        .room_service
        .get_room(&RoomId::new(room_id))
        .await
        .or_api(&auth.context)?;
    Ok(Json(room))
}

async fn request_pk(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(room_id): Path<String>,
    ApiJson(payload): ApiJson<PkPayload>,
) -> Result<Json<RoomSummary>, ApiError> {
    let room = state
        .room_service
        .request_pk(
            &auth.account_id,
            &RoomId::new(room_id),
            &RoomId::new(payload.target_room_id),
        )
        .await
        .or_api(&auth.context)?;
    Ok(Json(room))
}

async fn end_pk(
    State(state): State<AppState>,
    auth: Authenticated,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSummary>, ApiError> {
    let room = state
        .room_service
        .end_pk(&auth.account_id, &RoomId::new(room_id))
        .await
        .or_api(&auth.context)?;
    Ok(Json(room))
}

async fn close_room(
    State(state): State<AppState>,
    auth: Authenticated,
    ApiJson(payload): ApiJson<CloseRoomPayload>,
) -> Result<Json<RoomSummary>, ApiError> {
    let room = state
        .room_service
        .close_room(&auth.account_id, &RoomId::new(payload.room_id))
        .await
        .or_api(&auth.context)?;
    Ok(Json(room))
}
