use crate::consent::CookiesPreferences;
use crate::onboarding::OnboardingValuesUpdate;

#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Auth
    Login {
        email: String,
        password: String,
    },
    Logout,

    // Consent & settings
    SetCookiePreferences {
        preferences: CookiesPreferences,
    },
    SetLocale {
        locale: String,
    },
    SetTheme {
        theme: String,
    },

    // Onboarding
    SetOnboardingValues {
        values: OnboardingValuesUpdate,
    },
    SetOnboardingOfferValue {
        offer_id: String,
        value: String,
    },
    SubmitProfile,

    // Chat
    SendMessage {
        room_id: String,
        body: String,
    },
    LoadOlderMessages {
        room_id: String,
        limit: u32,
    },
    MarkRoomRead {
        room_id: String,
    },
    SetTyping {
        room_id: String,
        user_id: String,
        writing: bool,
    },
    ApplySeenUpdate {
        room_id: String,
        user_id: String,
        seen_date: Option<i64>,
        seen_message_id: Option<String>,
    },
    /// Produced by the push-notification ingestion adapter. Ingestion is
    /// idempotent: a `message_id` already present in the room is a no-op.
    IngestMessage {
        room_id: String,
        message_id: String,
        body: String,
        sender_id: String,
        sender_name: String,
        sender_avatar: Option<String>,
        created_at: i64,
    },

    // Reports
    SubmitReport {
        report_type: String,
        entity_type: String,
        entity_id: String,
    },

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes credentials or message bodies).
    pub fn tag(&self) -> &'static str {
        match self {
            // Auth
            AppAction::Login { .. } => "Login",
            AppAction::Logout => "Logout",

            // Consent & settings
            AppAction::SetCookiePreferences { .. } => "SetCookiePreferences",
            AppAction::SetLocale { .. } => "SetLocale",
            AppAction::SetTheme { .. } => "SetTheme",

            // Onboarding
            AppAction::SetOnboardingValues { .. } => "SetOnboardingValues",
            AppAction::SetOnboardingOfferValue { .. } => "SetOnboardingOfferValue",
            AppAction::SubmitProfile => "SubmitProfile",

            // Chat
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::LoadOlderMessages { .. } => "LoadOlderMessages",
            AppAction::MarkRoomRead { .. } => "MarkRoomRead",
            AppAction::SetTyping { .. } => "SetTyping",
            AppAction::ApplySeenUpdate { .. } => "ApplySeenUpdate",
            AppAction::IngestMessage { .. } => "IngestMessage",

            // Reports
            AppAction::SubmitReport { .. } => "SubmitReport",

            // UI
            AppAction::ClearToast => "ClearToast",

            // Lifecycle
            AppAction::Foregrounded => "Foregrounded",
        }
    }
}
