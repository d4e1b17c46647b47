//! Transcript rendering for delivered exports

use super::state::Timeline;
use super::token::{has_reserved_prefix, ExportKind};
use crate::db::Message;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscriptError {
    #[error("Failed to serialize transcript: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// A rendered transcript ready to hand to its recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPayload {
    pub kind: ExportKind,
    pub file_name: String,
    pub content_type: &'static str,
    pub body: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonTranscript<'a> {
    session_id: &'a str,
    messages: Vec<JsonMessage<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonMessage<'a> {
    id: &'a str,
    sender: &'a str,
    text: &'a str,
    created_at: DateTime<Utc>,
}

/// Messages that belong in a transcript: plain chat only, in timeline order
pub fn exportable(timeline: &Timeline) -> impl Iterator<Item = &Message> {
    timeline
        .entries()
        .iter()
        .filter(|e| e.item.is_chat() && !has_reserved_prefix(&e.message.text))
        .map(|e| &e.message)
}

pub fn render_json(session_id: &str, timeline: &Timeline) -> Result<String, TranscriptError> {
    let transcript = JsonTranscript {
        session_id,
        messages: exportable(timeline)
            .map(|m| JsonMessage {
                id: &m.id,
                sender: &m.sender,
                text: &m.text,
                created_at: m.created_at,
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&transcript)?)
}

pub fn render_txt(
    app_name: &str,
    session_id: &str,
    exported_at: DateTime<Utc>,
    timeline: &Timeline,
) -> String {
    let mut out = format!(
        "{app_name} chat transcript\nSession: {session_id}\nExported: {}\n\n",
        local_timestamp(exported_at)
    );
    for message in exportable(timeline) {
        out.push_str(&format!(
            "{} - {}: {}\n",
            local_timestamp(message.created_at),
            message.sender,
            message.text
        ));
    }
    out
}

/// Render the transcript for `kind`
pub fn render(
    kind: ExportKind,
    app_name: &str,
    session_id: &str,
    request_id: &str,
    exported_at: DateTime<Utc>,
    timeline: &Timeline,
) -> Result<ExportPayload, TranscriptError> {
    let body = match kind {
        ExportKind::Json => render_json(session_id, timeline)?,
        ExportKind::Txt => render_txt(app_name, session_id, exported_at, timeline),
    };
    Ok(ExportPayload {
        kind,
        file_name: file_name(app_name, session_id, request_id, kind),
        content_type: kind.content_type(),
        body,
    })
}

fn file_name(app_name: &str, session_id: &str, request_id: &str, kind: ExportKind) -> String {
    let app: String = app_name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();
    format!("{app}-{session_id}-{request_id}.{}", kind.as_str())
}

fn local_timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}
