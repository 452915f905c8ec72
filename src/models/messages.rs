use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{Language, Session, User};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CursorPosition {
    pub top: f64,
    pub left: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRange {
    pub start: i64,
    pub end: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinMessage {
    pub username: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentChangeMessage {
    pub content: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LanguageChangeMessage {
    pub language: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorMoveMessage {
    pub position: CursorPosition,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectionChangeMessage {
    pub selection: SelectionRange,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatusMessage {
    pub is_typing: bool,
}

/// Everything a client may send.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    Join(JoinMessage),
    ContentChange(ContentChangeMessage),
    LanguageChange(LanguageChangeMessage),
    CursorMove(CursorMoveMessage),
    SelectionChange(SelectionChangeMessage),
    TypingStatus(TypingStatusMessage),
    SyncRequest,
}

impl ClientMessage {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientMessage::Join(_) => EventKind::Join,
            ClientMessage::ContentChange(_) => EventKind::ContentChange,
            ClientMessage::LanguageChange(_) => EventKind::LanguageChange,
            ClientMessage::CursorMove(_) => EventKind::CursorMove,
            ClientMessage::SelectionChange(_) => EventKind::SelectionChange,
            ClientMessage::TypingStatus(_) => EventKind::TypingStatus,
            ClientMessage::SyncRequest => EventKind::SyncRequest,
        }
    }

    /// Decode a text frame. Anything that does not match a known event
    /// shape is an `INVALID_PAYLOAD`.
    pub fn parse(text: &str) -> Result<Self, ErrorPayload> {
        serde_json::from_str(text).map_err(|e| {
            ErrorPayload::new(ErrorKind::InvalidPayload, format!("Malformed message: {}", e))
        })
    }
}

/// Client event types, used as rate-limit keys and in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Join,
    ContentChange,
    LanguageChange,
    CursorMove,
    SelectionChange,
    TypingStatus,
    SyncRequest,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Join => "join",
            EventKind::ContentChange => "content_change",
            EventKind::LanguageChange => "language_change",
            EventKind::CursorMove => "cursor_move",
            EventKind::SelectionChange => "selection_change",
            EventKind::TypingStatus => "typing_status",
            EventKind::SyncRequest => "sync_request",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub user: User,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaveMessage {
    pub user_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentChangedMessage {
    pub content: String,
    pub user: User,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LanguageChangedMessage {
    pub language: Language,
    pub user: User,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CursorMovedMessage {
    pub position: CursorPosition,
    pub user: User,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectionChangedMessage {
    pub selection: SelectionRange,
    pub user: User,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingChangedMessage {
    pub is_typing: bool,
    pub user: User,
}

/// Full session snapshot. The only message carrying the member list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponseMessage {
    pub content: String,
    pub language: Language,
    pub users: Vec<User>,
}

impl From<&Session> for SyncResponseMessage {
    fn from(session: &Session) -> Self {
        Self {
            content: session.content.clone(),
            language: session.language,
            users: session.members(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidSessionId,
    InvalidUsername,
    DuplicateUsername,
    SessionFull,
    ContentTooLarge,
    InvalidLanguage,
    InvalidCursorPosition,
    InvalidSelection,
    RateLimitExceeded,
    InvalidPayload,
    /// The session store could not complete the request. Retryable.
    ServiceUnavailable,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorPayload {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// Everything the server may send.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Join(UserMessage),
    Leave(LeaveMessage),
    ContentChange(ContentChangedMessage),
    LanguageChange(LanguageChangedMessage),
    CursorMove(CursorMovedMessage),
    SelectionChange(SelectionChangedMessage),
    TypingStatus(TypingChangedMessage),
    UserJoined(UserMessage),
    UserLeft(UserMessage),
    SyncResponse(SyncResponseMessage),
    Error(ErrorPayload),
}

impl From<ErrorPayload> for ServerMessage {
    fn from(err: ErrorPayload) -> Self {
        ServerMessage::Error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn parses_client_events() {
        let join = ClientMessage::parse(r#"{"event":"join","data":{"username":"alice"}}"#).unwrap();
        assert_eq!(join, ClientMessage::Join(JoinMessage { username: "alice".into() }));

        let typing =
            ClientMessage::parse(r#"{"event":"typing_status","data":{"isTyping":true}}"#).unwrap();
        assert_eq!(typing.kind(), EventKind::TypingStatus);

        let cursor = ClientMessage::parse(
            r#"{"event":"cursor_move","data":{"position":{"top":12.5,"left":3}}}"#,
        )
        .unwrap();
        assert_eq!(
            cursor,
            ClientMessage::CursorMove(CursorMoveMessage {
                position: CursorPosition { top: 12.5, left: 3.0 }
            })
        );

        assert_eq!(ClientMessage::parse(r#"{"event":"sync_request"}"#).unwrap(), ClientMessage::SyncRequest);
    }

    #[test]
    fn rejects_wrong_shapes_as_invalid_payload() {
        let cases = [
            "not json",
            r#"{"event":"join","data":{}}"#,
            r#"{"event":"join","data":{"username":42}}"#,
            r#"{"event":"typing_status","data":{"isTyping":"yes"}}"#,
            r#"{"event":"cursor_move","data":{"position":{"top":1}}}"#,
            r#"{"event":"undo","data":{}}"#,
        ];
        for case in cases {
            let err = ClientMessage::parse(case).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidPayload, "case: {case}");
        }
    }

    #[test]
    fn error_payload_uses_type_field() {
        let msg = ServerMessage::from(ErrorPayload::new(ErrorKind::SessionFull, "Session is full"));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"event": "error", "data": {"type": "SESSION_FULL", "message": "Session is full"}})
        );
    }

    #[test]
    fn broadcasts_carry_the_full_user() {
        let user = User::new("abc123", "alice", Utc::now());
        let msg = ServerMessage::ContentChange(ContentChangedMessage {
            content: "x=1".into(),
            user: user.clone(),
        });
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["event"], "content_change");
        assert_eq!(value["data"]["user"]["username"], "alice");
        assert_eq!(value["data"]["user"]["color"], user.color.as_str());
    }

    #[test]
    fn sync_response_mirrors_the_session() {
        let now = Utc::now();
        let mut session = Session::new("abc123", now);
        session.content = "X".into();
        session.language = Language::Python;
        let a = User::new("abc123", "a", now);
        let b = User::new("abc123", "b", now);
        session.users.insert(b.id.clone(), b.clone());
        session.users.insert(a.id.clone(), a.clone());

        let sync = SyncResponseMessage::from(&session);
        assert_eq!(sync.content, "X");
        assert_eq!(sync.language, Language::Python);
        assert_eq!(sync.users, vec![a, b]);
    }
}
