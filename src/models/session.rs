use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::serde::ts_milliseconds;
use chrono::{DateTime, SubsecRound, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Palette user colors are drawn from at join time.
pub const USER_COLORS: [&str; 10] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4", "#FFEEAD",
    "#D4A5A5", "#9B59B6", "#3498DB", "#E67E22", "#1ABC9C",
];

pub fn random_color() -> String {
    USER_COLORS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_COLORS[0])
        .to_string()
}

/// Programming languages a session can be tagged with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    JavaScript,
    TypeScript,
    Python,
    Java,
    Cpp,
    CSharp,
    Ruby,
    Php,
    Go,
    Rust,
    Swift,
}

impl Language {
    pub const ALL: [Language; 11] = [
        Language::JavaScript,
        Language::TypeScript,
        Language::Python,
        Language::Java,
        Language::Cpp,
        Language::CSharp,
        Language::Ruby,
        Language::Php,
        Language::Go,
        Language::Rust,
        Language::Swift,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::CSharp => "csharp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Swift => "swift",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .iter()
            .find(|lang| lang.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownLanguage(s.to_string()))
    }
}

/// A participant of exactly one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub color: String,
    #[serde(with = "ts_milliseconds")]
    pub last_active: DateTime<Utc>,
    pub session_id: String,
}

impl User {
    pub fn new(session_id: &str, username: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            color: random_color(),
            last_active: now.trunc_subsecs(3),
            session_id: session_id.to_string(),
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        let now = now.trunc_subsecs(3);
        if now > self.last_active {
            self.last_active = now;
        }
    }
}

/// One collaborative document context.
///
/// `users` is keyed by user id and persists as a JSON object, so the
/// record stays a flat field map in the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub content: String,
    pub language: Language,
    pub users: HashMap<String, User>,
    #[serde(with = "ts_milliseconds")]
    pub last_active: DateTime<Utc>,
    #[serde(with = "ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: &str, now: DateTime<Utc>) -> Self {
        // Millisecond precision, as persisted
        let now = now.trunc_subsecs(3);
        Self {
            id: id.to_string(),
            content: String::new(),
            language: Language::default(),
            users: HashMap::new(),
            last_active: now,
            created_at: now,
        }
    }

    /// Refresh `last_active`, never moving it before `created_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_active = now.trunc_subsecs(3).max(self.created_at);
    }

    pub fn has_username(&self, username: &str) -> bool {
        self.users.values().any(|user| user.username == username)
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Members ordered by username for stable rendering.
    pub fn members(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }
}
