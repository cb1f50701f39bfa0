use crate::actions::AppAction;
use crate::consent::ConsentRecord;
use crate::state::{
    AppState, AuthState, BusyState, CatalogItem, CatalogState, ChatRoom, ChatRoomMessage,
    NotificationState, SettingsState,
};

/// Slice-granular state change notification delivered to the UI layer.
/// Every variant carries the `rev` of the state it was derived from so the
/// receiver can detect missed updates and re-request a full snapshot.
#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
    AuthChanged {
        rev: u64,
        auth: AuthState,
    },
    OnboardingChanged {
        rev: u64,
        onboarding: crate::onboarding::OnboardingState,
    },
    RoomsChanged {
        rev: u64,
        rooms: Vec<ChatRoom>,
    },
    CatalogChanged {
        rev: u64,
        catalog: CatalogState,
    },
    SettingsChanged {
        rev: u64,
        settings: SettingsState,
    },
    ConsentChanged {
        rev: u64,
        consent: Option<ConsentRecord>,
    },
    NotificationsChanged {
        rev: u64,
        notifications: NotificationState,
    },
    BusyChanged {
        rev: u64,
        busy: BusyState,
    },
    ToastChanged {
        rev: u64,
        toast: Option<String>,
    },
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
            AppUpdate::AuthChanged { rev, .. } => *rev,
            AppUpdate::OnboardingChanged { rev, .. } => *rev,
            AppUpdate::RoomsChanged { rev, .. } => *rev,
            AppUpdate::CatalogChanged { rev, .. } => *rev,
            AppUpdate::SettingsChanged { rev, .. } => *rev,
            AppUpdate::ConsentChanged { rev, .. } => *rev,
            AppUpdate::NotificationsChanged { rev, .. } => *rev,
            AppUpdate::BusyChanged { rev, .. } => *rev,
            AppUpdate::ToastChanged { rev, .. } => *rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Payload of a successful login response, applied on the core thread.
#[derive(Clone, Debug)]
pub struct LoginSuccess {
    pub token: String,
    pub user_id: String,
    pub name: String,
    pub avatar: Option<String>,
    pub email: String,
    pub onboarded: bool,
    pub validated_email: bool,
}

/// Continuations produced by spawned async work, funneled back through the
/// core channel so all state mutation happens on one thread.
#[derive(Debug)]
pub enum InternalEvent {
    // Async auth results
    LoginFinished {
        epoch: u64,
        success: Option<LoginSuccess>,
        error: Option<String>,
    },

    // Post-login fetches
    RoomsFetched {
        epoch: u64,
        rooms: Vec<ChatRoom>,
    },
    CatalogFetched {
        epoch: u64,
        offers: Vec<CatalogItem>,
        interests: Vec<CatalogItem>,
    },

    // Pagination results
    OlderMessagesFetched {
        epoch: u64,
        room_id: String,
        messages: Vec<ChatRoomMessage>,
        next_cursor: Option<String>,
        exhausted: bool,
    },
    OlderMessagesFailed {
        epoch: u64,
        room_id: String,
        error: String,
    },

    // Outbox
    MessageSendResult {
        epoch: u64,
        room_id: String,
        message_id: String,
        ok: bool,
        error: Option<String>,
    },

    // Submissions
    ProfileSubmitted {
        epoch: u64,
        ok: bool,
        error: Option<String>,
    },
    ReportSubmitted {
        epoch: u64,
        ok: bool,
        error: Option<String>,
    },

    // Push registration round-trip
    PushTokenObtained {
        token: Option<String>,
    },
    PushTokenRegistered {
        ok: bool,
    },

    Toast(String),
}

impl InternalEvent {
    /// The session epoch the event belongs to, for events whose effect is
    /// only valid within the session that spawned them.
    pub fn epoch(&self) -> Option<u64> {
        match self {
            InternalEvent::LoginFinished { epoch, .. }
            | InternalEvent::RoomsFetched { epoch, .. }
            | InternalEvent::CatalogFetched { epoch, .. }
            | InternalEvent::OlderMessagesFetched { epoch, .. }
            | InternalEvent::OlderMessagesFailed { epoch, .. }
            | InternalEvent::MessageSendResult { epoch, .. }
            | InternalEvent::ProfileSubmitted { epoch, .. }
            | InternalEvent::ReportSubmitted { epoch, .. } => Some(*epoch),
            InternalEvent::PushTokenObtained { .. }
            | InternalEvent::PushTokenRegistered { .. }
            | InternalEvent::Toast(_) => None,
        }
    }

    /// Log-safe event tag.
    pub fn tag(&self) -> &'static str {
        match self {
            InternalEvent::LoginFinished { .. } => "LoginFinished",
            InternalEvent::RoomsFetched { .. } => "RoomsFetched",
            InternalEvent::CatalogFetched { .. } => "CatalogFetched",
            InternalEvent::OlderMessagesFetched { .. } => "OlderMessagesFetched",
            InternalEvent::OlderMessagesFailed { .. } => "OlderMessagesFailed",
            InternalEvent::MessageSendResult { .. } => "MessageSendResult",
            InternalEvent::ProfileSubmitted { .. } => "ProfileSubmitted",
            InternalEvent::ReportSubmitted { .. } => "ReportSubmitted",
            InternalEvent::PushTokenObtained { .. } => "PushTokenObtained",
            InternalEvent::PushTokenRegistered { .. } => "PushTokenRegistered",
            InternalEvent::Toast(_) => "Toast",
        }
    }
}
