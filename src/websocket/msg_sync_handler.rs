use tracing::{debug, error};

use crate::models::{ErrorPayload, ServerMessage, Session, SyncResponseMessage};
use crate::services::SessionError;
use crate::websocket::connection::Connection;

fn read_failure(session_id: &str, e: SessionError) -> Result<(), ErrorPayload> {
    error!("Failed to read session {} for sync: {}", session_id, e);
    match e.to_payload() {
        Some(payload) => Err(payload),
        None => Ok(()),
    }
}

/// Handle a SYNC_REQUEST: unicast the current snapshot.
///
/// A member whose user is no longer in the session gets LEAVE instead.
/// Before joining, an unknown session reads as an empty one without
/// being created.
pub async fn handle_sync_request(conn: &mut Connection) -> Result<(), ErrorPayload> {
    let app = conn.app().clone();
    let session_id = conn.session_id().to_string();

    let snapshot = match conn.user().map(|user| user.id.clone()) {
        Some(user_id) => {
            let mut locked = app.sessions.lock(&session_id).await;
            let current = locked.snapshot().await;
            match current {
                Ok(Some(session)) if session.users.contains_key(&user_id) => session,
                Ok(_) => {
                    drop(locked);
                    conn.lost_membership().await;
                    return Ok(());
                }
                Err(e) => return read_failure(&session_id, e),
            }
        }
        None => match app.sessions.get_session(&session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => Session::new(&session_id, chrono::Utc::now()),
            Err(e) => return read_failure(&session_id, e),
        },
    };

    debug!("Sync for connection {}: {} members", conn.id(), snapshot.users.len());
    conn.send(ServerMessage::SyncResponse(SyncResponseMessage::from(&snapshot))).await;
    Ok(())
}
