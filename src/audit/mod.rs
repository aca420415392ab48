//! Persistent trail of security events, readable by admins.

pub mod repo;

use tracing::error;
use uuid::Uuid;

use crate::state::AppState;
use repo::{AuditEvent, AuditKind};

const MAX_SUBJECT_CHARS: usize = 128;

/// Stores an event. A failing audit store never fails the request; the
/// event is still visible in the server log.
pub async fn record(state: &AppState, kind: AuditKind, actor_id: Option<Uuid>, subject: Option<&str>) {
    let event = AuditEvent::new(kind, actor_id, subject.map(clean_subject));
    if let Err(e) = state.audit.insert(&event).await {
        error!(error = ?e, kind = ?kind, "audit event not stored");
    }
}

/// Subjects can carry client input (a rejected username), so they are
/// shortened and stripped of control characters.
fn clean_subject(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control())
        .take(MAX_SUBJECT_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_is_bounded_and_printable() {
        assert_eq!(clean_subject("bob\r\nINFO fake line"), "bobINFO fake line");
        assert_eq!(clean_subject(&"x".repeat(500)).chars().count(), MAX_SUBJECT_CHARS);
    }

    #[tokio::test]
    async fn record_appends_to_store() {
        let state = AppState::fake();
        let actor = Uuid::new_v4();
        record(&state, AuditKind::AccessDenied, Some(actor), Some("/api/v1/admin/users")).await;
        let events = state.audit.list(10, 0).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AuditKind::AccessDenied);
        assert_eq!(events[0].actor_id, Some(actor));
    }
}
