use tracing::error;

use crate::models::{
    ContentChangeMessage, ContentChangedMessage, ErrorPayload, EventKind, Language, LanguageChangeMessage,
    LanguageChangedMessage, ServerMessage, User,
};
use crate::services::validation::{parse_language, validate_content};
use crate::services::{LockedSession, SessionError};
use crate::websocket::connection::Connection;

enum Edit<'a> {
    Content(&'a str),
    Language(Language),
}

enum EditOutcome {
    /// Written, with the editor's refreshed record.
    Applied(User),
    NotAMember,
}

/// Write an edit on behalf of `user`, who must still be a member.
async fn apply_edit(locked: &mut LockedSession<'_>, user: &User, edit: Edit<'_>) -> Result<EditOutcome, SessionError> {
    if !locked.has_member(&user.id).await? {
        return Ok(EditOutcome::NotAMember);
    }
    let written = match edit {
        Edit::Content(content) => locked.update_content(Some(&user.id), content).await,
        Edit::Language(language) => locked.update_language(Some(&user.id), language).await,
    };
    match written {
        Ok(Some(editor)) => Ok(EditOutcome::Applied(editor)),
        Ok(None) | Err(SessionError::NotFound(_)) => Ok(EditOutcome::NotAMember),
        Err(e) => Err(e),
    }
}

/// A failed write changed nothing. Report it so the client can resend.
fn store_failure(conn: &Connection, what: &str, e: SessionError) -> Result<(), ErrorPayload> {
    error!("Failed to update {} of session {}: {}", what, conn.session_id(), e);
    match e.to_payload() {
        Some(payload) => Err(payload),
        None => Ok(()),
    }
}

/// Handle ContentChangeMessage
///
/// Last write wins. The broadcast goes out before the session lock is
/// released so peers see edits in store order.
pub async fn handle_content_change(
    conn: &mut Connection,
    user: User,
    msg: ContentChangeMessage,
) -> Result<(), ErrorPayload> {
    validate_content(&msg.content)?;
    conn.check_rate(EventKind::ContentChange)?;

    let app = conn.app().clone();
    let mut locked = app.sessions.lock(conn.session_id()).await;
    let content = msg.content;
    let outcome = apply_edit(&mut locked, &user, Edit::Content(&content)).await;

    match outcome {
        Ok(EditOutcome::Applied(editor)) => {
            conn.refresh_user(editor.clone());
            conn.publish(ServerMessage::ContentChange(ContentChangedMessage { content, user: editor })).await;
            Ok(())
        }
        Ok(EditOutcome::NotAMember) => {
            drop(locked);
            conn.lost_membership().await;
            Ok(())
        }
        Err(e) => store_failure(conn, "content", e),
    }
}

/// Handle LanguageChangeMessage
pub async fn handle_language_change(
    conn: &mut Connection,
    user: User,
    msg: LanguageChangeMessage,
) -> Result<(), ErrorPayload> {
    let language = parse_language(&msg.language)?;
    conn.check_rate(EventKind::LanguageChange)?;

    let app = conn.app().clone();
    let mut locked = app.sessions.lock(conn.session_id()).await;
    let outcome = apply_edit(&mut locked, &user, Edit::Language(language)).await;

    match outcome {
        Ok(EditOutcome::Applied(editor)) => {
            conn.refresh_user(editor.clone());
            conn.publish(ServerMessage::LanguageChange(LanguageChangedMessage { language, user: editor })).await;
            Ok(())
        }
        Ok(EditOutcome::NotAMember) => {
            drop(locked);
            conn.lost_membership().await;
            Ok(())
        }
        Err(e) => store_failure(conn, "language", e),
    }
}
