//! Chat request lifecycle
//!
//! A request is pending for five minutes. Only the recipient may accept or
//! decline it, only the sender may cancel it, and nothing moves once it has
//! left `pending` or run past its expiry.

use crate::db::{ChatRequest, RequestStatus};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// How long a chat request stays open
pub const REQUEST_TTL_SECS: i64 = 5 * 60;

pub fn expires_at(created_at: DateTime<Utc>) -> DateTime<Utc> {
    created_at + Duration::seconds(REQUEST_TTL_SECS)
}

/// Something a participant does to a pending request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    Accept,
    Decline,
    Cancel,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Chat request has expired")]
    Expired,
    #[error("Chat request is already {0}")]
    NotPending(RequestStatus),
    #[error("Only the recipient can respond to this request")]
    NotRecipient,
    #[error("Only the sender can cancel this request")]
    NotSender,
}

impl ChatRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Status as observed at `now`; stale pending requests read as expired
    pub fn effective_status(&self, now: DateTime<Utc>) -> RequestStatus {
        if self.status == RequestStatus::Pending && self.is_expired(now) {
            RequestStatus::Expired
        } else {
            self.status
        }
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

/// Decide the status a request moves to when `actor` performs `action`
pub fn transition(
    request: &ChatRequest,
    actor: &str,
    action: RequestAction,
    now: DateTime<Utc>,
) -> Result<RequestStatus, RequestError> {
    match request.effective_status(now) {
        RequestStatus::Pending => {}
        RequestStatus::Expired => return Err(RequestError::Expired),
        other => return Err(RequestError::NotPending(other)),
    }

    match action {
        RequestAction::Accept | RequestAction::Decline if actor != request.to_handle => {
            Err(RequestError::NotRecipient)
        }
        RequestAction::Cancel if actor != request.from_handle => Err(RequestError::NotSender),
        RequestAction::Accept => Ok(RequestStatus::Accepted),
        RequestAction::Decline => Ok(RequestStatus::Declined),
        RequestAction::Cancel => Ok(RequestStatus::Cancelled),
    }
}

/// Countdown text in `m:ss` form
pub fn format_countdown(remaining: Duration) -> String {
    let secs = remaining.num_seconds().max(0);
    format!("{}:{:02}", secs / 60, secs % 60)
}
