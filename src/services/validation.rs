//! Shape checks for everything a client sends.

use crate::models::{CursorPosition, ErrorKind, ErrorPayload, Language, SelectionRange};

pub const MAX_USERNAME_LENGTH: usize = 30;
pub const MAX_CONTENT_LENGTH: usize = 1_000_000;

/// Which characters a session id may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionIdPolicy {
    /// Letters and digits only.
    #[default]
    Alphanumeric,
    /// Letters, digits, `-` and `_`.
    AlphanumericWithSeparators,
}

impl SessionIdPolicy {
    pub fn from_flag(allow_separators: bool) -> Self {
        if allow_separators {
            SessionIdPolicy::AlphanumericWithSeparators
        } else {
            SessionIdPolicy::Alphanumeric
        }
    }

    fn allows(&self, c: char) -> bool {
        match self {
            SessionIdPolicy::Alphanumeric => c.is_ascii_alphanumeric(),
            SessionIdPolicy::AlphanumericWithSeparators => {
                c.is_ascii_alphanumeric() || c == '-' || c == '_'
            }
        }
    }
}

pub fn validate_session_id(session_id: Option<&str>, policy: SessionIdPolicy) -> Result<String, ErrorPayload> {
    let session_id = match session_id {
        Some(id) if !id.is_empty() => id,
        _ => {
            return Err(ErrorPayload::new(ErrorKind::InvalidSessionId, "Session ID is required"));
        }
    };

    if !session_id.chars().all(|c| policy.allows(c)) {
        let message = match policy {
            SessionIdPolicy::Alphanumeric => "Session ID must contain only letters and numbers",
            SessionIdPolicy::AlphanumericWithSeparators => {
                "Session ID can only contain alphanumeric characters, hyphens, and underscores"
            }
        };
        return Err(ErrorPayload::new(ErrorKind::InvalidSessionId, message));
    }

    Ok(session_id.to_string())
}

pub fn validate_username(username: &str) -> Result<(), ErrorPayload> {
    if username.is_empty() {
        return Err(ErrorPayload::new(ErrorKind::InvalidUsername, "Username cannot be empty"));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(ErrorPayload::new(
            ErrorKind::InvalidUsername,
            format!("Username cannot exceed {} characters", MAX_USERNAME_LENGTH),
        ));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ErrorPayload::new(
            ErrorKind::InvalidUsername,
            "Username can only contain alphanumeric characters and underscores",
        ));
    }
    Ok(())
}

pub fn validate_content(content: &str) -> Result<(), ErrorPayload> {
    // Byte length bounds the character count from above
    if content.len() > MAX_CONTENT_LENGTH && content.chars().count() > MAX_CONTENT_LENGTH {
        return Err(ErrorPayload::new(
            ErrorKind::ContentTooLarge,
            format!("Content cannot exceed {} characters", MAX_CONTENT_LENGTH),
        ));
    }
    Ok(())
}

pub fn parse_language(language: &str) -> Result<Language, ErrorPayload> {
    language
        .parse::<Language>()
        .map_err(|_| ErrorPayload::new(ErrorKind::InvalidLanguage, "Unsupported programming language"))
}

pub fn validate_cursor(position: &CursorPosition) -> Result<(), ErrorPayload> {
    let valid = |v: f64| v.is_finite() && v >= 0.0;
    if !valid(position.top) || !valid(position.left) {
        return Err(ErrorPayload::new(ErrorKind::InvalidCursorPosition, "Invalid cursor position"));
    }
    Ok(())
}

pub fn validate_selection(selection: &SelectionRange) -> Result<(), ErrorPayload> {
    if selection.start < 0 || selection.end < 0 {
        return Err(ErrorPayload::new(ErrorKind::InvalidSelection, "Selection bounds cannot be negative"));
    }
    if selection.start > selection.end {
        return Err(ErrorPayload::new(
            ErrorKind::InvalidSelection,
            "Selection start cannot be greater than end",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_defaults_to_alphanumeric_only() {
        let strict = SessionIdPolicy::default();
        assert_eq!(validate_session_id(Some("abc123"), strict), Ok("abc123".to_string()));
        for bad in [None, Some(""), Some("abc-123"), Some("abc_123"), Some("a b"), Some("ünï")] {
            let err = validate_session_id(bad, strict).unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidSessionId, "{bad:?}");
        }
    }

    #[test]
    fn relaxed_session_ids_accept_separators() {
        let relaxed = SessionIdPolicy::from_flag(true);
        assert!(validate_session_id(Some("team-a_42"), relaxed).is_ok());
        assert!(validate_session_id(Some("team.a"), relaxed).is_err());
    }

    #[test]
    fn usernames() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("a").is_ok());
        assert!(validate_username("Snake_Case_99").is_ok());
        assert!(validate_username(&"x".repeat(30)).is_ok());

        for bad in ["", "has space", "dash-ed", "émile"] {
            assert_eq!(validate_username(bad).unwrap_err().kind, ErrorKind::InvalidUsername, "{bad}");
        }
        assert_eq!(validate_username(&"x".repeat(31)).unwrap_err().kind, ErrorKind::InvalidUsername);
    }

    #[test]
    fn content_limit_counts_characters() {
        assert!(validate_content("").is_ok());
        assert!(validate_content(&"a".repeat(MAX_CONTENT_LENGTH)).is_ok());
        // Multi-byte characters: over the byte limit but within the character limit
        assert!(validate_content(&"é".repeat(MAX_CONTENT_LENGTH)).is_ok());
        let err = validate_content(&"a".repeat(MAX_CONTENT_LENGTH + 1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ContentTooLarge);
    }

    #[test]
    fn languages_come_from_the_allow_list() {
        assert_eq!(parse_language("python"), Ok(Language::Python));
        assert_eq!(parse_language("typescript"), Ok(Language::TypeScript));
        assert_eq!(parse_language("brainfuck").unwrap_err().kind, ErrorKind::InvalidLanguage);
    }

    #[test]
    fn cursor_and_selection_ranges() {
        assert!(validate_cursor(&CursorPosition { top: 0.0, left: 10.5 }).is_ok());
        assert_eq!(
            validate_cursor(&CursorPosition { top: -1.0, left: 0.0 }).unwrap_err().kind,
            ErrorKind::InvalidCursorPosition
        );
        assert!(validate_cursor(&CursorPosition { top: f64::NAN, left: 0.0 }).is_err());

        assert!(validate_selection(&SelectionRange { start: 3, end: 3 }).is_ok());
        assert!(validate_selection(&SelectionRange { start: 0, end: 9 }).is_ok());
        assert_eq!(
            validate_selection(&SelectionRange { start: 5, end: 2 }).unwrap_err().kind,
            ErrorKind::InvalidSelection
        );
        assert!(validate_selection(&SelectionRange { start: -1, end: 2 }).is_err());
    }
}
