use tracing::{error, info};

use crate::models::{ErrorKind, ErrorPayload, EventKind, JoinMessage, ServerMessage, SyncResponseMessage, UserMessage};
use crate::services::validation::validate_username;
use crate::services::SessionError;
use crate::websocket::connection::Connection;

/// Handle JoinMessage
///
/// The member is added, the room subscribed and USER_JOINED published
/// under the session lock, so the snapshot sent back is exactly the state
/// every later room event builds on.
pub async fn handle_join_message(conn: &mut Connection, join_msg: JoinMessage) -> Result<(), ErrorPayload> {
    if conn.user().is_some() {
        return Err(ErrorPayload::new(ErrorKind::InvalidPayload, "Already joined this session"));
    }
    validate_username(&join_msg.username)?;
    conn.check_rate(EventKind::Join)?;

    let app = conn.app().clone();
    let session_id = conn.session_id().to_string();
    let mut locked = app.sessions.lock(&session_id).await;

    let user = match locked.add_user(&join_msg.username).await {
        Ok(user) => user,
        Err(e) => {
            if let SessionError::Store(cause) = &e {
                error!("Failed to add {} to session {}: {}", join_msg.username, session_id, cause);
            }
            // Nothing was written, so the client may retry the same join
            return match e.to_payload() {
                Some(payload) => Err(payload),
                None => Ok(()),
            };
        }
    };
    let snapshot = match locked.snapshot().await {
        Ok(Some(session)) => SyncResponseMessage::from(&session),
        Ok(None) => {
            error!("Session {} vanished while {} was joining", session_id, user.username);
            return Ok(());
        }
        Err(e) => {
            error!("Failed to read session {} after join: {}", session_id, e);
            return Ok(());
        }
    };

    let receiver = app.rooms.subscribe(&session_id).await;
    app.rooms
        .publish(&session_id, Some(conn.id()), ServerMessage::UserJoined(UserMessage { user: user.clone() }))
        .await;
    drop(locked);

    info!("User {} joined session {} on connection {}", user.username, session_id, conn.id());

    conn.send(ServerMessage::Join(UserMessage { user: user.clone() })).await;
    conn.send(ServerMessage::SyncResponse(snapshot)).await;
    conn.bind(user, receiver);
    Ok(())
}
