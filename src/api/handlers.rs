//! HTTP request handlers

use super::sse::sse_stream;
use super::types::{
    ChatRequestListResponse, ChatRequestView, CreateChatRequest, CreateProfileRequest,
    ErrorResponse, ExportStateResponse, HandleQuery, ModerateRequest, ModerateResponse,
    ProfileResponse, RequestActionResponse, SendImageRequest, SendMessageRequest,
    SendMessageResponse, SessionResponse, StartExportRequest, StartExportResponse,
    SuccessResponse,
};
use super::AppState;
use crate::db::{Database, DbError, Message, RequestStatus, Session};
use crate::export::token::{format_export_token, format_image_token, generate_request_id};
use crate::export::{fold_export_state, ChatItem, ControlAction, ExportKind, ExportSnapshot, Timeline};
use crate::lifecycle::{chat_request, RequestAction, RequestError, StrikeOutcome};
use crate::runtime::{SessionEvent, SseEvent};
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;

/// Header carrying the caller's handle
pub const HANDLE_HEADER: &str = "x-disappearo-handle";

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Profiles
        .route("/api/profiles", post(create_profile))
        .route("/api/profiles/:handle", get(get_profile))
        // Chat requests
        .route(
            "/api/requests",
            get(list_chat_requests).post(create_chat_request),
        )
        .route("/api/requests/:id/accept", post(accept_chat_request))
        .route("/api/requests/:id/decline", post(decline_chat_request))
        .route("/api/requests/:id/cancel", post(cancel_chat_request))
        // Sessions
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/stream", get(stream_session))
        .route(
            "/api/sessions/:id/messages",
            get(list_messages).post(send_message),
        )
        .route(
            "/api/sessions/:id/messages/:message_id",
            delete(retract_message),
        )
        .route("/api/sessions/:id/images", post(send_image))
        .route("/api/sessions/:id/end", post(end_session))
        // Exports
        .route(
            "/api/sessions/:id/exports",
            get(get_export_state).post(start_export),
        )
        .route(
            "/api/sessions/:id/exports/:kind/:request_id/approve",
            post(approve_export),
        )
        .route(
            "/api/sessions/:id/exports/:kind/:request_id/cancel",
            post(cancel_export),
        )
        .route(
            "/api/sessions/:id/exports/:kind/:request_id/download",
            get(download_export),
        )
        // Moderation
        .route("/api/moderate", post(moderate))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Profiles
// ============================================================

async fn create_profile(
    State(state): State<AppState>,
    Json(req): Json<CreateProfileRequest>,
) -> Result<Json<ProfileResponse>, AppError> {
    let user_id = req.user_id.trim();
    if user_id.is_empty() {
        return Err(AppError::BadRequest("user_id is required".to_string()));
    }
    let profile = state.runtime.db().get_or_create_profile(user_id)?;
    Ok(Json(ProfileResponse::new(&profile, Utc::now())))
}

async fn get_profile(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<Json<ProfileResponse>, AppError> {
    let profile = state.runtime.db().get_profile(&handle)?;
    Ok(Json(ProfileResponse::new(&profile, Utc::now())))
}

// ============================================================
// Chat Requests
// ============================================================

async fn create_chat_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateChatRequest>,
) -> Result<Json<ChatRequestView>, AppError> {
    let from = caller(&headers, None)?;
    let db = state.runtime.db();
    let now = Utc::now();

    if db.get_profile(&from)?.is_banned(now) {
        return Err(AppError::Forbidden(
            "You are temporarily banned from starting chats".to_string(),
        ));
    }

    let to = req.to.trim();
    if to == from {
        return Err(AppError::BadRequest(
            "Cannot send a chat request to yourself".to_string(),
        ));
    }
    match db.get_profile(to) {
        Ok(_) => {}
        Err(DbError::ProfileNotFound(_)) => {
            return Err(AppError::NotFound(format!("Unknown handle: {to}")));
        }
        Err(e) => return Err(e.into()),
    }

    let request = db.create_chat_request(&from, to)?;
    tracing::info!(request_id = %request.id, from = %from, to = %to, "Chat request sent");
    Ok(Json(ChatRequestView::new(&request, now)))
}

async fn list_chat_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ChatRequestListResponse>, AppError> {
    let handle = caller(&headers, None)?;
    let db = state.runtime.db();
    let now = Utc::now();

    let incoming = db.list_incoming_requests(&handle, now)?;
    let outgoing = db.list_outgoing_requests(&handle)?;

    Ok(Json(ChatRequestListResponse {
        incoming: incoming
            .iter()
            .map(|r| ChatRequestView::new(r, now))
            .collect(),
        outgoing: outgoing
            .iter()
            .map(|r| ChatRequestView::new(r, now))
            .collect(),
    }))
}

async fn accept_chat_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RequestActionResponse>, AppError> {
    respond_to_request(&state, &id, &headers, RequestAction::Accept)
}

async fn decline_chat_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RequestActionResponse>, AppError> {
    respond_to_request(&state, &id, &headers, RequestAction::Decline)
}

async fn cancel_chat_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RequestActionResponse>, AppError> {
    respond_to_request(&state, &id, &headers, RequestAction::Cancel)
}

fn respond_to_request(
    state: &AppState,
    id: &str,
    headers: &HeaderMap,
    action: RequestAction,
) -> Result<Json<RequestActionResponse>, AppError> {
    let actor = caller(headers, None)?;
    let db = state.runtime.db();
    let now = Utc::now();

    let mut request = db.get_chat_request(id)?;
    let status = chat_request::transition(&request, &actor, action, now)?;
    db.update_request_status(id, status)?;
    request.status = status;

    let session = if status == RequestStatus::Accepted {
        Some(db.create_session(
            &request.id,
            &request.from_handle,
            &request.to_handle,
            state.session_ttl,
        )?)
    } else {
        None
    };

    tracing::info!(request_id = %id, actor = %actor, status = %status, "Chat request updated");
    Ok(Json(RequestActionResponse {
        request: ChatRequestView::new(&request, now),
        session,
    }))
}

// ============================================================
// Sessions
// ============================================================

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, AppError> {
    let handle = caller(&headers, None)?;
    let db = state.runtime.db();
    let session = participant_session(db, &id, &handle)?;
    let messages = db.get_messages(&id)?;

    Ok(Json(SessionResponse {
        exports: export_snapshots(&messages),
        session,
        messages,
    }))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<Message>>, AppError> {
    let handle = caller(&headers, None)?;
    let db = state.runtime.db();
    participant_session(db, &id, &handle)?;
    Ok(Json(db.get_messages(&id)?))
}

async fn stream_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HandleQuery>,
) -> Result<impl IntoResponse, AppError> {
    let handle = caller(&headers, query.handle)?;
    let db = state.runtime.db();
    let session = participant_session(db, &id, &handle)?;

    // Subscribe before reading so nothing falls between the two
    let broadcast_rx = state
        .runtime
        .subscribe(&id)
        .await
        .map_err(AppError::Internal)?;

    let messages = db.get_messages(&id)?;
    let init_event = SseEvent::Init {
        exports: export_snapshots(&messages),
        session,
        messages,
    };

    Ok(sse_stream(init_event, broadcast_rx, handle))
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, AppError> {
    let sender = caller(&headers, None)?;
    if req.text.trim().is_empty() {
        return Err(AppError::BadRequest("Message text is empty".to_string()));
    }
    submit_moderated(&state, &id, &sender, req.id, req.text).await
}

async fn send_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SendImageRequest>,
) -> Result<Json<SendMessageResponse>, AppError> {
    let sender = caller(&headers, None)?;
    if req.url.trim().is_empty() {
        return Err(AppError::BadRequest("Image url is required".to_string()));
    }
    let text = format_image_token(&req.url, &req.file_id, &req.filename);
    submit_moderated(&state, &id, &sender, req.id, text).await
}

/// Sender-only removal of an ordinary chat or image message
async fn retract_message(
    State(state): State<AppState>,
    Path((id, message_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, AppError> {
    let handle = caller(&headers, None)?;
    let db = state.runtime.db();
    participant_session(db, &id, &handle)?;

    let message = db
        .get_message(&id, &message_id)?
        .ok_or_else(|| AppError::NotFound(format!("Message not found: {message_id}")))?;
    if message.sender != handle {
        return Err(AppError::Forbidden(
            "Only the sender can retract a message".to_string(),
        ));
    }
    if ChatItem::parse(&message.text).export_control().is_some() {
        return Err(AppError::BadRequest(
            "Export control messages cannot be retracted".to_string(),
        ));
    }

    if db.delete_message(&id, &message_id)? {
        state
            .runtime
            .send_event(&id, SessionEvent::MessageDeleted { id: message_id })
            .await
            .map_err(AppError::Internal)?;
    }
    Ok(Json(SuccessResponse { success: true }))
}

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SuccessResponse>, AppError> {
    let handle = caller(&headers, None)?;
    let db = state.runtime.db();
    participant_session(db, &id, &handle)?;

    db.delete_session(&id)?;
    state.runtime.end_session(&id).await;
    tracing::info!(session_id = %id, ended_by = %handle, "Session ended");

    Ok(Json(SuccessResponse { success: true }))
}

// ============================================================
// Exports
// ============================================================

async fn start_export(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<StartExportRequest>,
) -> Result<Json<StartExportResponse>, AppError> {
    let sender = caller(&headers, None)?;
    let kind: ExportKind = req.kind.parse().map_err(AppError::BadRequest)?;

    let request_id = generate_request_id();
    let text = format_export_token(kind, ControlAction::Request, &request_id);
    let message = submit_control(&state, &id, &sender, &text).await?;

    tracing::info!(session_id = %id, kind = %kind, request_id = %request_id, "Export requested");
    Ok(Json(StartExportResponse {
        request_id,
        message,
    }))
}

async fn approve_export(
    State(state): State<AppState>,
    Path((id, kind, request_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Json<SendMessageResponse>, AppError> {
    control_action(&state, &id, &headers, &kind, &request_id, ControlAction::Approve).await
}

async fn cancel_export(
    State(state): State<AppState>,
    Path((id, kind, request_id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Json<SendMessageResponse>, AppError> {
    control_action(&state, &id, &headers, &kind, &request_id, ControlAction::Cancel).await
}

async fn control_action(
    state: &AppState,
    session_id: &str,
    headers: &HeaderMap,
    kind: &str,
    request_id: &str,
    action: ControlAction,
) -> Result<Json<SendMessageResponse>, AppError> {
    let sender = caller(headers, None)?;
    let kind: ExportKind = kind.parse().map_err(AppError::BadRequest)?;

    let text = format_export_token(kind, action, request_id);
    if ChatItem::parse(&text).export_control().is_none() {
        return Err(AppError::BadRequest(format!(
            "Invalid export request id: {request_id}"
        )));
    }

    let message = submit_control(state, session_id, &sender, &text).await?;
    Ok(Json(SendMessageResponse {
        accepted: true,
        message: Some(message),
        strikes: None,
        banned: false,
    }))
}

async fn get_export_state(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ExportStateResponse>, AppError> {
    let handle = caller(&headers, None)?;
    let db = state.runtime.db();
    participant_session(db, &id, &handle)?;
    let messages = db.get_messages(&id)?;
    Ok(Json(ExportStateResponse {
        exports: export_snapshots(&messages),
    }))
}

async fn download_export(
    State(state): State<AppState>,
    Path((id, kind, request_id)): Path<(String, String, String)>,
    headers: HeaderMap,
    Query(query): Query<HandleQuery>,
) -> Result<Response, AppError> {
    let handle = caller(&headers, query.handle)?;
    let kind: ExportKind = kind.parse().map_err(AppError::BadRequest)?;
    let db = state.runtime.db();
    participant_session(db, &id, &handle)?;

    let export = db.get_export(&id, &kind.qualify(&request_id))?;
    if export.recipient != handle {
        return Err(AppError::Forbidden(
            "Only the requester can download this export".to_string(),
        ));
    }

    let disposition = format!("attachment; filename=\"{}\"", export.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, export.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        export.body,
    )
        .into_response())
}

// ============================================================
// Moderation
// ============================================================

async fn moderate(
    State(state): State<AppState>,
    Json(req): Json<ModerateRequest>,
) -> Json<ModerateResponse> {
    let verdict = match req {
        ModerateRequest::Text { content } => state.moderator.moderate_text(&content).await,
        ModerateRequest::Image { url } => state.moderator.moderate_image(&url).await,
    };
    Json(verdict.into())
}

async fn get_version() -> &'static str {
    concat!("disappearo ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Helpers
// ============================================================

/// The caller's handle, from the header or a `?handle=` fallback
fn caller(headers: &HeaderMap, query: Option<String>) -> Result<String, AppError> {
    headers
        .get(HANDLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query)
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Missing {HANDLE_HEADER} header")))
}

/// A live session the caller takes part in
///
/// Sessions past their expiry read as missing even before the sweeper
/// deletes them.
fn participant_session(db: &Database, session_id: &str, handle: &str) -> Result<Session, AppError> {
    let session = db.get_session(session_id)?;
    if session.is_expired(Utc::now()) {
        return Err(AppError::NotFound(format!("Session expired: {session_id}")));
    }
    if !session.has_participant(handle) {
        return Err(AppError::Forbidden(
            "Not a participant in this session".to_string(),
        ));
    }
    Ok(session)
}

/// Participant check plus active-ban check
fn authorize_sender(db: &Database, session_id: &str, sender: &str) -> Result<(), AppError> {
    participant_session(db, session_id, sender)?;
    if db.get_profile(sender)?.is_banned(Utc::now()) {
        return Err(AppError::Forbidden(
            "You are temporarily banned from sending messages".to_string(),
        ));
    }
    Ok(())
}

/// Store a message and hand it to the session runtime
///
/// An id the session already holds returns the stored copy, which must come
/// from the same sender.
async fn store_message(
    state: &AppState,
    session_id: &str,
    message_id: &str,
    sender: &str,
    text: &str,
) -> Result<Message, AppError> {
    let (message, inserted) = state
        .runtime
        .db()
        .add_message(message_id, session_id, sender, text)?;
    if !inserted {
        return stored_copy(message, sender);
    }
    state
        .runtime
        .send_event(session_id, SessionEvent::MessageCreated(message.clone()))
        .await
        .map_err(AppError::Internal)?;
    Ok(message)
}

fn stored_copy(message: Message, sender: &str) -> Result<Message, AppError> {
    if message.sender != sender {
        return Err(AppError::BadRequest(format!(
            "Message id already in use: {}",
            message.id
        )));
    }
    Ok(message)
}

async fn submit_moderated(
    state: &AppState,
    session_id: &str,
    sender: &str,
    client_id: Option<String>,
    text: String,
) -> Result<Json<SendMessageResponse>, AppError> {
    let db = state.runtime.db();
    authorize_sender(db, session_id, sender)?;

    let message_id = client_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // Retried send: hand the stored copy back
    if let Some(existing) = db.get_message(session_id, &message_id)? {
        return Ok(Json(SendMessageResponse {
            accepted: true,
            message: Some(stored_copy(existing, sender)?),
            strikes: None,
            banned: false,
        }));
    }

    let verdict = state.moderator.moderate_message(&text).await;
    if verdict.blocked {
        let (profile, outcome) = db.record_strike(sender)?;
        tracing::info!(
            session_id,
            sender,
            strikes = profile.strikes,
            source = ?verdict.source,
            "Message blocked by moderation"
        );
        return Ok(Json(SendMessageResponse {
            accepted: false,
            message: None,
            strikes: Some(profile.strikes),
            banned: matches!(outcome, StrikeOutcome::Banned { .. }),
        }));
    }

    let message = store_message(state, session_id, &message_id, sender, &text).await?;
    Ok(Json(SendMessageResponse {
        accepted: true,
        message: Some(message),
        strikes: None,
        banned: false,
    }))
}

async fn submit_control(
    state: &AppState,
    session_id: &str,
    sender: &str,
    text: &str,
) -> Result<Message, AppError> {
    authorize_sender(state.runtime.db(), session_id, sender)?;
    let message_id = uuid::Uuid::new_v4().to_string();
    store_message(state, session_id, &message_id, sender, text).await
}

fn export_snapshots(messages: &[Message]) -> Vec<ExportSnapshot> {
    let timeline = Timeline::from_messages(messages.iter().cloned());
    ExportKind::ALL
        .into_iter()
        .map(|kind| fold_export_state(&timeline, kind).snapshot(kind))
        .collect()
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Internal(String),
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::ProfileNotFound(_)
            | DbError::RequestNotFound(_)
            | DbError::SessionNotFound(_)
            | DbError::ExportNotFound(_) => AppError::NotFound(e.to_string()),
            DbError::Sqlite(_) | DbError::HandleExhausted => AppError::Internal(e.to_string()),
        }
    }
}

impl From<RequestError> for AppError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Expired | RequestError::NotPending(_) => {
                AppError::BadRequest(e.to_string())
            }
            RequestError::NotRecipient | RequestError::NotSender => {
                AppError::Forbidden(e.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
