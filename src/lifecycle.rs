//! Chat request, session, strike and handle lifecycles

pub mod chat_request;
mod handle;
pub mod strikes;

pub use chat_request::{RequestAction, RequestError};
pub use handle::generate_handle;
pub use strikes::StrikeOutcome;

use crate::db::DbResult;
use crate::runtime::RuntimeManager;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// When a session created at `created_at` stops existing
pub fn session_expires_at(created_at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| created_at.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// What one expiry pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requests: usize,
    pub sessions: usize,
}

/// Expire stale chat requests and tear down sessions past their lifetime
///
/// Expired sessions lose their messages and exports, and their runtimes are
/// stopped so subscribers see `session_ended`.
pub async fn sweep_expired(runtime: &RuntimeManager, now: DateTime<Utc>) -> DbResult<SweepReport> {
    let db = runtime.db();
    let requests = db.expire_stale_requests(now)?;
    let sessions = db.expire_sessions(now)?;
    for session_id in &sessions {
        runtime.end_session(session_id).await;
        tracing::info!(session_id = %session_id, "Session expired");
    }
    Ok(SweepReport {
        requests,
        sessions: sessions.len(),
    })
}

/// Periodically run [`sweep_expired`] until shutdown
pub fn spawn_expiry_sweeper(
    runtime: Arc<RuntimeManager>,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match sweep_expired(&runtime, Utc::now()).await {
                        Ok(report) if report == SweepReport::default() => {}
                        Ok(report) => tracing::info!(
                            requests = report.requests,
                            sessions = report.sessions,
                            "Expiry sweep finished"
                        ),
                        Err(e) => tracing::warn!(error = %e, "Expiry sweep failed"),
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }
        tracing::info!("Expiry sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DbError};
    use crate::runtime::SseEvent;
    use chrono::TimeZone;

    #[test]
    fn test_session_expiry_time() {
        let created = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let expires = session_expires_at(created, Duration::from_secs(3600));
        assert_eq!((expires - created).num_seconds(), 3600);
        assert_eq!(
            session_expires_at(created, Duration::MAX),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[tokio::test]
    async fn test_sweep_ends_expired_session() {
        let db = Database::open_in_memory().unwrap();
        db.create_session("s1", "alice", "bob", Duration::from_secs(60))
            .unwrap();
        db.add_message("m1", "s1", "alice", "hello").unwrap();
        db.create_chat_request("alice", "carol").unwrap();

        let runtime = RuntimeManager::new(db.clone(), "Disappearo");
        let mut events = runtime.subscribe("s1").await.unwrap();

        let report = sweep_expired(&runtime, Utc::now()).await.unwrap();
        assert_eq!(report, SweepReport::default());

        let later = Utc::now() + chrono::Duration::minutes(10);
        let report = sweep_expired(&runtime, later).await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                requests: 1,
                sessions: 1
            }
        );
        assert!(matches!(db.get_session("s1"), Err(DbError::SessionNotFound(_))));
        assert!(db.get_messages("s1").unwrap().is_empty());

        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for session_ended")
                .expect("broadcast closed");
            if matches!(event, SseEvent::SessionEnded) {
                break;
            }
        }
    }
}
