//! Control tokens carried in message bodies
//!
//! Every message body is parsed exactly once into a [`ChatItem`]; the fold
//! never looks at raw text.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const IMAGE_PREFIX: &str = "__image__|";

/// Export format a control token refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    Json,
    Txt,
}

impl ExportKind {
    pub const ALL: [ExportKind; 2] = [ExportKind::Json, ExportKind::Txt];

    pub fn as_str(self) -> &'static str {
        match self {
            ExportKind::Json => "json",
            ExportKind::Txt => "txt",
        }
    }

    pub fn prefix(self, action: ControlAction) -> &'static str {
        match (self, action) {
            (ExportKind::Json, ControlAction::Request) => "__export_request__|",
            (ExportKind::Json, ControlAction::Approve) => "__export_approve__|",
            (ExportKind::Json, ControlAction::Cancel) => "__export_cancel__|",
            (ExportKind::Txt, ControlAction::Request) => "__export_txt_request__|",
            (ExportKind::Txt, ControlAction::Approve) => "__export_txt_approve__|",
            (ExportKind::Txt, ControlAction::Cancel) => "__export_txt_cancel__|",
        }
    }

    /// Qualified request id used by the delivery guard, e.g. `json:k3x9`
    pub fn qualify(self, request_id: &str) -> String {
        format!("{}:{request_id}", self.as_str())
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportKind::Json => "application/json",
            ExportKind::Txt => "text/plain; charset=utf-8",
        }
    }
}

impl fmt::Display for ExportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(ExportKind::Json),
            "txt" => Ok(ExportKind::Txt),
            other => Err(format!("unknown export kind: {other}")),
        }
    }
}

/// What an export control token asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Request,
    Approve,
    Cancel,
}

impl ControlAction {
    pub const ALL: [ControlAction; 3] = [
        ControlAction::Request,
        ControlAction::Approve,
        ControlAction::Cancel,
    ];
}

/// Structured view of a message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatItem {
    /// Ordinary text, including malformed control tokens
    Chat,
    Image {
        url: String,
        file_id: String,
        filename: String,
    },
    ExportRequest {
        kind: ExportKind,
        request_id: String,
    },
    ExportApprove {
        kind: ExportKind,
        request_id: String,
    },
    ExportCancel {
        kind: ExportKind,
        request_id: String,
    },
}

impl ChatItem {
    /// Parse a message body
    pub fn parse(text: &str) -> Self {
        if let Some(rest) = text.strip_prefix(IMAGE_PREFIX) {
            return parse_image(rest);
        }

        for kind in ExportKind::ALL {
            for action in ControlAction::ALL {
                let Some(request_id) = text.strip_prefix(kind.prefix(action)) else {
                    continue;
                };
                if !is_valid_request_id(request_id) {
                    return ChatItem::Chat;
                }
                let request_id = request_id.to_string();
                return match action {
                    ControlAction::Request => ChatItem::ExportRequest { kind, request_id },
                    ControlAction::Approve => ChatItem::ExportApprove { kind, request_id },
                    ControlAction::Cancel => ChatItem::ExportCancel { kind, request_id },
                };
            }
        }

        ChatItem::Chat
    }

    /// The export control this item carries, if any
    pub fn export_control(&self) -> Option<(ExportKind, ControlAction, &str)> {
        match self {
            ChatItem::ExportRequest { kind, request_id } => {
                Some((*kind, ControlAction::Request, request_id))
            }
            ChatItem::ExportApprove { kind, request_id } => {
                Some((*kind, ControlAction::Approve, request_id))
            }
            ChatItem::ExportCancel { kind, request_id } => {
                Some((*kind, ControlAction::Cancel, request_id))
            }
            ChatItem::Chat | ChatItem::Image { .. } => None,
        }
    }

    pub fn is_chat(&self) -> bool {
        matches!(self, ChatItem::Chat)
    }
}

/// True if `text` starts with any reserved control prefix, well-formed or not
pub fn has_reserved_prefix(text: &str) -> bool {
    text.starts_with(IMAGE_PREFIX)
        || ExportKind::ALL.iter().any(|kind| {
            ControlAction::ALL
                .iter()
                .any(|action| text.starts_with(kind.prefix(*action)))
        })
}

/// Encode an export control token
pub fn format_export_token(kind: ExportKind, action: ControlAction, request_id: &str) -> String {
    format!("{}{request_id}", kind.prefix(action))
}

/// Encode an image attachment token
pub fn format_image_token(url: &str, file_id: &str, filename: &str) -> String {
    format!(
        "{IMAGE_PREFIX}{}|{file_id}|{}",
        urlencoding::encode(url),
        urlencoding::encode(filename)
    )
}

/// Generate a fresh export request id: 64 random bits in base 36
pub fn generate_request_id() -> String {
    let mut value: u64 = rand::thread_rng().gen();
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::with_capacity(13);
    while value > 0 {
        let digit = u32::try_from(value % 36).unwrap_or(0);
        digits.push(std::char::from_digit(digit, 36).unwrap_or('0'));
        value /= 36;
    }
    digits.iter().rev().collect()
}

fn is_valid_request_id(id: &str) -> bool {
    !id.is_empty() && !id.contains('|') && !id.chars().any(char::is_whitespace)
}

fn parse_image(rest: &str) -> ChatItem {
    let mut parts = rest.splitn(3, '|');
    let url = decode_lossy(parts.next().unwrap_or_default());
    let file_id = parts.next().unwrap_or_default().to_string();
    let filename = decode_lossy(parts.next().unwrap_or_default());
    ChatItem::Image {
        url,
        file_id,
        filename,
    }
}

fn decode_lossy(raw: &str) -> String {
    urlencoding::decode(raw).map_or_else(|_| raw.to_string(), std::borrow::Cow::into_owned)
}
