//! Cursor, selection and typing indicators.
//!
//! These are ephemeral: they are never written to the session record and
//! go straight to the other members of the room.

use crate::models::{
    CursorMoveMessage, CursorMovedMessage, ErrorPayload, EventKind, SelectionChangeMessage, SelectionChangedMessage,
    ServerMessage, TypingChangedMessage, TypingStatusMessage, User,
};
use crate::services::validation::{validate_cursor, validate_selection};
use crate::websocket::connection::Connection;

pub async fn handle_cursor_move(conn: &mut Connection, user: User, msg: CursorMoveMessage) -> Result<(), ErrorPayload> {
    validate_cursor(&msg.position)?;
    conn.check_rate(EventKind::CursorMove)?;
    conn.publish(ServerMessage::CursorMove(CursorMovedMessage { position: msg.position, user })).await;
    Ok(())
}

pub async fn handle_selection_change(
    conn: &mut Connection,
    user: User,
    msg: SelectionChangeMessage,
) -> Result<(), ErrorPayload> {
    validate_selection(&msg.selection)?;
    conn.check_rate(EventKind::SelectionChange)?;
    conn.publish(ServerMessage::SelectionChange(SelectionChangedMessage { selection: msg.selection, user }))
        .await;
    Ok(())
}

pub async fn handle_typing_status(
    conn: &mut Connection,
    user: User,
    msg: TypingStatusMessage,
) -> Result<(), ErrorPayload> {
    conn.check_rate(EventKind::TypingStatus)?;
    conn.publish(ServerMessage::TypingStatus(TypingChangedMessage { is_typing: msg.is_typing, user })).await;
    Ok(())
}
