//! API request and response types

use crate::db::{ChatRequest, Message, Profile, RequestStatus, Session};
use crate::export::ExportSnapshot;
use crate::lifecycle::chat_request::format_countdown;
use crate::moderation::{Scores, Verdict, VerdictSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to fetch or create the caller's profile
#[derive(Debug, Deserialize)]
pub struct CreateProfileRequest {
    pub user_id: String,
}

/// Public view of a profile
#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub handle: String,
    pub strikes: u32,
    pub banned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unban_at: Option<DateTime<Utc>>,
}

impl ProfileResponse {
    pub fn new(profile: &Profile, now: DateTime<Utc>) -> Self {
        let banned = profile.is_banned(now);
        Self {
            handle: profile.handle.clone(),
            strikes: profile.strikes,
            banned,
            unban_at: if banned { profile.unban_at() } else { None },
        }
    }
}

/// Request to open a chat with another handle
#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub to: String,
}

/// A chat request as seen at a point in time
#[derive(Debug, Serialize)]
pub struct ChatRequestView {
    pub id: String,
    pub from: String,
    pub to: String,
    pub status: RequestStatus,
    pub expires_at: DateTime<Utc>,
    /// Remaining time as `m:ss`
    pub countdown: String,
}

impl ChatRequestView {
    pub fn new(request: &ChatRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: request.id.clone(),
            from: request.from_handle.clone(),
            to: request.to_handle.clone(),
            status: request.effective_status(now),
            expires_at: request.expires_at,
            countdown: format_countdown(request.remaining(now)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatRequestListResponse {
    pub incoming: Vec<ChatRequestView>,
    pub outgoing: Vec<ChatRequestView>,
}

/// Response to accept/decline/cancel
#[derive(Debug, Serialize)]
pub struct RequestActionResponse {
    pub request: ChatRequestView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

/// Session with its current messages and export states
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: Session,
    pub messages: Vec<Message>,
    pub exports: Vec<ExportSnapshot>,
}

/// Request to send a text message
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Client-generated id; makes retries idempotent
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
}

/// Request to share an uploaded image
#[derive(Debug, Deserialize)]
pub struct SendImageRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub url: String,
    pub file_id: String,
    pub filename: String,
}

/// Outcome of a send; blocked messages are not stored
#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strikes: Option<u32>,
    pub banned: bool,
}

/// Request to start an export
#[derive(Debug, Deserialize)]
pub struct StartExportRequest {
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct StartExportResponse {
    pub request_id: String,
    pub message: Message,
}

#[derive(Debug, Serialize)]
pub struct ExportStateResponse {
    pub exports: Vec<ExportSnapshot>,
}

/// Body of the standalone moderation check
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModerateRequest {
    Text { content: String },
    Image { url: String },
}

#[derive(Debug, Serialize)]
pub struct ModerateResponse {
    pub ok: bool,
    pub score: Scores,
    pub source: VerdictSource,
}

impl From<Verdict> for ModerateResponse {
    fn from(verdict: Verdict) -> Self {
        Self {
            ok: !verdict.blocked,
            score: verdict.scores,
            source: verdict.source,
        }
    }
}

/// Query for endpoints opened directly by a browser
#[derive(Debug, Deserialize)]
pub struct HandleQuery {
    pub handle: Option<String>,
}

/// Generic success response
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
