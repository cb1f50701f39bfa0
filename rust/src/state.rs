use std::collections::HashMap;

use crate::consent::ConsentRecord;
use crate::onboarding::OnboardingState;

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct AppState {
    pub rev: u64,
    pub auth: AuthState,
    pub onboarding: OnboardingState,
    pub rooms: Vec<ChatRoom>,
    pub catalog: CatalogState,
    pub settings: SettingsState,
    pub consent: Option<ConsentRecord>,
    pub notifications: NotificationState,
    pub busy: BusyState,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            auth: AuthState::LoggedOut,
            onboarding: OnboardingState::empty(),
            rooms: vec![],
            catalog: CatalogState::empty(),
            settings: SettingsState::empty(),
            consent: None,
            notifications: NotificationState::empty(),
            busy: BusyState::idle(),
            toast: None,
        }
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq)]
pub enum AuthState {
    LoggedOut,
    LoggedIn {
        token: String,
        user_id: String,
        name: String,
        avatar: Option<String>,
        email: String,
        onboarded: bool,
        validated_email: bool,
    },
}

impl AuthState {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, AuthState::LoggedIn { .. })
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            AuthState::LoggedIn { token, .. } => Some(token),
            AuthState::LoggedOut => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            AuthState::LoggedIn { user_id, .. } => Some(user_id),
            AuthState::LoggedOut => None,
        }
    }
}

/// One participant's identity plus their read-receipt cursor for a room.
///
/// The cursor is two independently-updatable signals (`last_message_seen_date`
/// and `last_message_seen_id`); see [`crate::rooms::is_read`] for how they
/// combine.
#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ChatRoomUser {
    pub id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub last_message_seen_date: Option<i64>,
    pub last_message_seen_id: Option<String>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ChatRoomMessage {
    pub id: String,
    pub sender: ChatRoomUser,
    pub body: String,
    pub created_at: i64,
    /// Local-only flag, true once the server acknowledged the message.
    /// Messages obtained from the backend or a push payload are always `sent`.
    pub sent: bool,
}

/// A chat conversation. `messages` is the insertion-ordered log; ids are
/// unique within a room and `last_message` always points at the log entry
/// with the greatest `created_at`.
#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ChatRoom {
    pub id: String,
    pub users: Vec<ChatRoomUser>,
    pub messages: Vec<ChatRoomMessage>,
    pub last_message: Option<ChatRoomMessage>,
    /// user_id -> currently-typing flag.
    pub writing: HashMap<String, bool>,
    pub pagination: PaginatedState,
}

impl ChatRoom {
    pub fn new(id: String) -> Self {
        Self {
            id,
            users: vec![],
            messages: vec![],
            last_message: None,
            writing: HashMap::new(),
            pagination: PaginatedState::initial(),
        }
    }
}

/// Per-room bookkeeping for incremental history fetches.
#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct PaginatedState {
    pub cursor: Option<String>,
    pub loading: bool,
    pub exhausted: bool,
}

impl PaginatedState {
    pub fn initial() -> Self {
        Self {
            cursor: None,
            loading: false,
            exhausted: false,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
}

/// Derived/static backend data (`cache` consent category).
#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct CatalogState {
    pub offers: Vec<CatalogItem>,
    pub interests: Vec<CatalogItem>,
}

impl CatalogState {
    pub fn empty() -> Self {
        Self {
            offers: vec![],
            interests: vec![],
        }
    }
}

/// Device preferences (`settings` consent category).
#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct SettingsState {
    pub locale: Option<String>,
    pub theme: Option<String>,
}

impl SettingsState {
    pub fn empty() -> Self {
        Self {
            locale: None,
            theme: None,
        }
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq)]
pub enum PushRegistration {
    /// No token requested yet, or request still in flight.
    Unknown,
    /// No token obtainable (unsupported platform / permission denied).
    /// Not an error: push is simply off for this session, no retry.
    Disabled,
    /// Token delivered to the backend.
    Registered,
    /// Backend rejected the token or the request failed.
    Failed,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct NotificationState {
    pub token: Option<String>,
    pub registration: PushRegistration,
}

impl NotificationState {
    pub fn empty() -> Self {
        Self {
            token: None,
            registration: PushRegistration::Unknown,
        }
    }
}

/// "In flight" flags for long-ish operations that the UI should reflect.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct BusyState {
    pub logging_in: bool,
    pub submitting_profile: bool,
    pub submitting_report: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            logging_in: false,
            submitting_profile: false,
            submitting_report: false,
        }
    }
}

/// Host platform, as reported by the embedding app. Consent validity rules
/// differ between web and the mobile platforms (see [`crate::consent`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl Platform {
    /// An unrecognized platform string maps to `Web`, the platform with the
    /// strictest consent gate, so a host typo never grants implicit consent.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" => Platform::Ios,
            "android" => Platform::Android,
            _ => Platform::Web,
        }
    }

    pub fn is_web(&self) -> bool {
        matches!(self, Platform::Web)
    }
}

#[cfg(test)]
mod tests {
    use super::Platform;

    #[test]
    fn unknown_platform_parses_as_web() {
        assert_eq!(Platform::parse("ios"), Platform::Ios);
        assert_eq!(Platform::parse(" Android "), Platform::Android);
        assert_eq!(Platform::parse("web"), Platform::Web);
        // Typos get the strictest persistence gate, not implicit consent.
        assert_eq!(Platform::parse("osx"), Platform::Web);
        assert_eq!(Platform::parse(""), Platform::Web);
    }
}

pub fn now_seconds() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
