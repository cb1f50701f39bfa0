mod api;
mod config;
mod push;
mod session;
mod storage;

use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::consent::{Category, ConsentGate, ConsentRecord};
use crate::interceptors::{
    ConsentPersistenceInterceptor, Dispatched, EntryKey, Interceptor, PushRegistrationInterceptor,
    SideEffect,
};
use crate::onboarding::{self, OnboardingState};
use crate::rooms;
use crate::state::{
    now_seconds, AppState, AuthState, BusyState, ChatRoomMessage, ChatRoomUser, NotificationState,
    Platform, PushRegistration,
};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

pub use push::parse_push_payload;

/// Deferred work decided by the reducer, executed after the transition is
/// committed. Keeps the reducer itself free of I/O.
enum FollowUp {
    None,
    SpawnLogin {
        email: String,
        password: String,
    },
    SendOutgoing {
        room_id: String,
        message_id: String,
        body: String,
    },
    FetchOlder {
        room_id: String,
        cursor: Option<String>,
        limit: u32,
    },
    SubmitProfile,
    SubmitReport {
        report_type: String,
        entity_type: String,
        entity_id: String,
    },
    RefreshSession,
}

pub struct AppCore {
    pub state: AppState,
    rev: u64,
    /// Session epoch; bumped on login attempts and logout so continuations
    /// spawned for a previous session are dropped when they land.
    epoch: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,

    http_client: reqwest::Client,
    api: api::ApiClient,
    cache_db: Option<rusqlite::Connection>,

    interceptors: Vec<Box<dyn Interceptor>>,
    push_token_provider: crate::SharedPushTokenProvider,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        platform: Platform,
        keychain_group: String,
        shared_state: Arc<RwLock<AppState>>,
        push_token_provider: crate::SharedPushTokenProvider,
    ) -> Self {
        let config = config::load_app_config(&data_dir);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        if let Err(e) = session::init_keyring_once(&keychain_group) {
            tracing::warn!(%e, "keyring init failed; session will not persist");
        }

        let cache_db = match storage::open_cache_db(&data_dir) {
            Ok(conn) => Some(conn),
            Err(e) => {
                tracing::warn!(%e, "failed to open cache db; running without persistence");
                None
            }
        };

        let gate = ConsentGate::new(platform, config.consent_expiry_days);
        let http_client = reqwest::Client::new();
        let api = api::ApiClient::new(http_client.clone(), config::api_url(&config));

        let mut state = AppState::empty();
        if let Some(db) = &cache_db {
            restore_cached_state(&mut state, db, &gate);
        }
        if let Some(auth) = session::load_session() {
            tracing::info!("restored session from keychain");
            if let AuthState::LoggedIn {
                email, onboarded, ..
            } = &auth
            {
                if !onboarded {
                    onboarding::seed_from_email(&mut state.onboarding, email);
                }
            }
            state.auth = auth;
        }

        let interceptors: Vec<Box<dyn Interceptor>> = vec![
            Box::new(ConsentPersistenceInterceptor::new(gate)),
            Box::new(PushRegistrationInterceptor),
        ];

        let mut this = Self {
            state,
            rev: 0,
            epoch: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            http_client,
            api,
            cache_db,
            interceptors,
            push_token_provider,
        };

        // Ensure FfiApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);

        if this.state.auth.is_logged_in() {
            this.spawn_session_fetches();
            this.request_push_token();
        }
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log `?action` directly: it can contain credentials
                // or message bodies.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        let prev = self.state.clone();
        let follow_up = self.reduce_action(&action);
        self.commit(&prev, Dispatched::Action(&action));
        self.execute(follow_up);
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        if let Some(epoch) = internal.epoch() {
            if epoch != self.epoch {
                tracing::debug!(event = internal.tag(), "dropping stale continuation");
                return;
            }
        }
        tracing::info!(event = internal.tag(), "internal");
        let prev = self.state.clone();
        let follow_up = self.reduce_internal(&internal);
        self.commit(&prev, Dispatched::Internal(&internal));
        self.execute(follow_up);
    }

    /// Run interceptors over the committed transition, publish slice
    /// updates, then execute the requested effects.
    fn commit(&mut self, prev: &AppState, event: Dispatched<'_>) {
        let now = now_seconds();
        let mut effects = Vec::new();
        for interceptor in &self.interceptors {
            effects.extend(interceptor.react(event, prev, &self.state, now));
        }
        self.emit_diff(prev);
        self.run_effects(effects, now);
    }

    // ── Reducers ────────────────────────────────────────────────────────

    fn reduce_action(&mut self, action: &AppAction) -> FollowUp {
        match action {
            AppAction::Login { email, password } => {
                if self.state.auth.is_logged_in() || self.state.busy.logging_in {
                    return FollowUp::None;
                }
                self.state.busy.logging_in = true;
                self.epoch = self.epoch.wrapping_add(1);
                FollowUp::SpawnLogin {
                    email: email.clone(),
                    password: password.clone(),
                }
            }
            AppAction::Logout => {
                self.epoch = self.epoch.wrapping_add(1);
                self.state.auth = AuthState::LoggedOut;
                self.state.rooms.clear();
                self.state.onboarding = OnboardingState::empty();
                self.state.busy = BusyState::idle();
                self.state.notifications = NotificationState::empty();
                // Catalog, settings and the consent record are device-level
                // and survive logout.
                FollowUp::None
            }

            AppAction::SetCookiePreferences { preferences } => {
                self.state.consent = Some(ConsentRecord {
                    preferences: preferences.clone(),
                    consent_date: now_seconds(),
                });
                FollowUp::None
            }
            AppAction::SetLocale { locale } => {
                self.state.settings.locale = Some(locale.clone());
                FollowUp::None
            }
            AppAction::SetTheme { theme } => {
                self.state.settings.theme = Some(theme.clone());
                FollowUp::None
            }

            AppAction::SetOnboardingValues { values } => {
                self.state.onboarding.merge(values.clone());
                FollowUp::None
            }
            AppAction::SetOnboardingOfferValue { offer_id, value } => {
                self.state
                    .onboarding
                    .set_offer_value(offer_id.clone(), value.clone());
                FollowUp::None
            }
            AppAction::SubmitProfile => {
                if !self.state.auth.is_logged_in() || self.state.busy.submitting_profile {
                    return FollowUp::None;
                }
                self.state.busy.submitting_profile = true;
                FollowUp::SubmitProfile
            }

            AppAction::SendMessage { room_id, body } => {
                let body = body.trim();
                if body.is_empty() {
                    return FollowUp::None;
                }
                let AuthState::LoggedIn {
                    user_id,
                    name,
                    avatar,
                    ..
                } = &self.state.auth
                else {
                    return FollowUp::None;
                };
                let sender = ChatRoomUser {
                    id: user_id.clone(),
                    name: name.clone(),
                    avatar: avatar.clone(),
                    last_message_seen_date: None,
                    last_message_seen_id: None,
                };
                let my_id = user_id.clone();
                let message = ChatRoomMessage {
                    id: uuid::Uuid::new_v4().to_string(),
                    sender,
                    body: body.to_string(),
                    created_at: now_seconds(),
                    sent: false,
                };
                let message_id = message.id.clone();
                rooms::ingest_message(&mut self.state.rooms, room_id, message);
                if let Some(room) = rooms::find_room_mut(&mut self.state.rooms, room_id) {
                    // Sending implies having read everything before it.
                    rooms::mark_read_by(room, &my_id);
                }
                FollowUp::SendOutgoing {
                    room_id: room_id.clone(),
                    message_id,
                    body: body.to_string(),
                }
            }
            AppAction::LoadOlderMessages { room_id, limit } => {
                let Some(room) = rooms::find_room_mut(&mut self.state.rooms, room_id) else {
                    return FollowUp::None;
                };
                if !rooms::begin_fetch(room) {
                    return FollowUp::None;
                }
                FollowUp::FetchOlder {
                    room_id: room_id.clone(),
                    cursor: room.pagination.cursor.clone(),
                    limit: *limit,
                }
            }
            AppAction::MarkRoomRead { room_id } => {
                let Some(my_id) = self.state.auth.user_id().map(String::from) else {
                    return FollowUp::None;
                };
                if let Some(room) = rooms::find_room_mut(&mut self.state.rooms, room_id) {
                    rooms::mark_read_by(room, &my_id);
                }
                FollowUp::None
            }
            AppAction::SetTyping {
                room_id,
                user_id,
                writing,
            } => {
                if let Some(room) = rooms::find_room_mut(&mut self.state.rooms, room_id) {
                    rooms::set_typing(room, user_id, *writing);
                }
                FollowUp::None
            }
            AppAction::ApplySeenUpdate {
                room_id,
                user_id,
                seen_date,
                seen_message_id,
            } => {
                if let Some(room) = rooms::find_room_mut(&mut self.state.rooms, room_id) {
                    rooms::apply_seen_update(room, user_id, *seen_date, seen_message_id.clone());
                }
                FollowUp::None
            }
            AppAction::IngestMessage {
                room_id,
                message_id,
                body,
                sender_id,
                sender_name,
                sender_avatar,
                created_at,
            } => {
                let is_own = self.state.auth.user_id() == Some(sender_id.as_str());
                let message = ChatRoomMessage {
                    id: message_id.clone(),
                    sender: ChatRoomUser {
                        id: sender_id.clone(),
                        name: sender_name.clone(),
                        avatar: sender_avatar.clone(),
                        last_message_seen_date: None,
                        last_message_seen_id: None,
                    },
                    body: body.clone(),
                    created_at: *created_at,
                    sent: true,
                };
                let ingested = rooms::ingest_message(&mut self.state.rooms, room_id, message);
                if !ingested && is_own {
                    // Fanout echo of a message we sent: the push carries the
                    // client-generated id, so treat it as the delivery ack.
                    if let Some(room) = rooms::find_room_mut(&mut self.state.rooms, room_id) {
                        rooms::mark_sent(room, message_id);
                    }
                }
                FollowUp::None
            }

            AppAction::SubmitReport {
                report_type,
                entity_type,
                entity_id,
            } => {
                if !self.state.auth.is_logged_in() || self.state.busy.submitting_report {
                    return FollowUp::None;
                }
                self.state.busy.submitting_report = true;
                FollowUp::SubmitReport {
                    report_type: report_type.clone(),
                    entity_type: entity_type.clone(),
                    entity_id: entity_id.clone(),
                }
            }

            AppAction::ClearToast => {
                self.state.toast = None;
                FollowUp::None
            }

            AppAction::Foregrounded => {
                if self.state.auth.is_logged_in() {
                    FollowUp::RefreshSession
                } else {
                    FollowUp::None
                }
            }
        }
    }

    fn reduce_internal(&mut self, internal: &InternalEvent) -> FollowUp {
        match internal {
            InternalEvent::LoginFinished { success, error, .. } => {
                self.state.busy.logging_in = false;
                match success {
                    Some(s) => {
                        self.state.auth = AuthState::LoggedIn {
                            token: s.token.clone(),
                            user_id: s.user_id.clone(),
                            name: s.name.clone(),
                            avatar: s.avatar.clone(),
                            email: s.email.clone(),
                            onboarded: s.onboarded,
                            validated_email: s.validated_email,
                        };
                        if !s.onboarded {
                            onboarding::seed_from_email(&mut self.state.onboarding, &s.email);
                        }
                        FollowUp::RefreshSession
                    }
                    None => {
                        let reason = error.clone().unwrap_or_else(|| "unknown error".into());
                        self.state.toast = Some(format!("Login failed: {reason}"));
                        FollowUp::None
                    }
                }
            }

            InternalEvent::RoomsFetched { rooms, .. } => {
                // A clone per fetch is fine: fetches are rare and the merge
                // needs owned values anyway.
                rooms::merge_fetched_rooms(&mut self.state.rooms, rooms.clone());
                FollowUp::None
            }
            InternalEvent::CatalogFetched {
                offers, interests, ..
            } => {
                self.state.catalog.offers = offers.clone();
                self.state.catalog.interests = interests.clone();
                FollowUp::None
            }

            InternalEvent::OlderMessagesFetched {
                room_id,
                messages,
                next_cursor,
                exhausted,
                ..
            } => {
                if let Some(room) = rooms::find_room_mut(&mut self.state.rooms, room_id) {
                    rooms::complete_fetch(
                        room,
                        messages.clone(),
                        next_cursor.clone(),
                        *exhausted,
                    );
                }
                FollowUp::None
            }
            InternalEvent::OlderMessagesFailed { room_id, error, .. } => {
                if let Some(room) = rooms::find_room_mut(&mut self.state.rooms, room_id) {
                    rooms::fail_fetch(room);
                }
                self.state.toast = Some(format!("Could not load older messages: {error}"));
                FollowUp::None
            }

            InternalEvent::MessageSendResult {
                room_id,
                message_id,
                ok,
                error,
                ..
            } => {
                if *ok {
                    if let Some(room) = rooms::find_room_mut(&mut self.state.rooms, room_id) {
                        rooms::mark_sent(room, message_id);
                    }
                } else {
                    let reason = error.clone().unwrap_or_else(|| "send failed".into());
                    self.state.toast = Some(format!("Message not sent: {reason}"));
                }
                FollowUp::None
            }

            InternalEvent::ProfileSubmitted { ok, error, .. } => {
                self.state.busy.submitting_profile = false;
                if *ok {
                    if let AuthState::LoggedIn { onboarded, .. } = &mut self.state.auth {
                        *onboarded = true;
                    }
                    self.state.onboarding = OnboardingState::empty();
                } else {
                    let reason = error.clone().unwrap_or_else(|| "unknown error".into());
                    self.state.toast = Some(format!("Profile submission failed: {reason}"));
                }
                FollowUp::None
            }
            InternalEvent::ReportSubmitted { ok, error, .. } => {
                self.state.busy.submitting_report = false;
                self.state.toast = Some(if *ok {
                    "Report submitted".to_string()
                } else {
                    let reason = error.clone().unwrap_or_else(|| "unknown error".into());
                    format!("Report submission failed: {reason}")
                });
                FollowUp::None
            }

            InternalEvent::PushTokenObtained { token } => {
                self.state.notifications.token = token.clone();
                if token.is_none() {
                    self.state.notifications.registration = PushRegistration::Disabled;
                }
                FollowUp::None
            }
            InternalEvent::PushTokenRegistered { ok } => {
                self.state.notifications.registration = if *ok {
                    PushRegistration::Registered
                } else {
                    PushRegistration::Failed
                };
                FollowUp::None
            }

            InternalEvent::Toast(msg) => {
                self.state.toast = Some(msg.clone());
                FollowUp::None
            }
        }
    }

    // ── Update emission ─────────────────────────────────────────────────

    fn emit_diff(&mut self, prev: &AppState) {
        let mut changed = false;
        macro_rules! emit {
            ($field:ident, $variant:ident) => {
                if self.state.$field != prev.$field {
                    let rev = self.next_rev();
                    let _ = self.update_sender.send(AppUpdate::$variant {
                        rev,
                        $field: self.state.$field.clone(),
                    });
                    changed = true;
                }
            };
        }
        emit!(auth, AuthChanged);
        emit!(onboarding, OnboardingChanged);
        emit!(rooms, RoomsChanged);
        emit!(catalog, CatalogChanged);
        emit!(settings, SettingsChanged);
        emit!(consent, ConsentChanged);
        emit!(notifications, NotificationsChanged);
        emit!(busy, BusyChanged);
        emit!(toast, ToastChanged);

        if changed {
            let snapshot = self.state.clone();
            self.commit_state_snapshot(&snapshot);
        }
    }

    // ── Effects ─────────────────────────────────────────────────────────

    fn run_effects(&self, effects: Vec<SideEffect>, now: i64) {
        for effect in effects {
            match effect {
                SideEffect::PersistEntry { key, json } => {
                    if let Some(db) = &self.cache_db {
                        storage::save_entry(db, key, &json, now);
                    }
                }
                SideEffect::EvictEntries { keys } => {
                    if let Some(db) = &self.cache_db {
                        storage::evict_entries(db, &keys);
                    }
                }
                SideEffect::PersistConsent { record } => {
                    if let Some(db) = &self.cache_db {
                        storage::save_consent(db, &record);
                    }
                }
                SideEffect::PersistSession { auth } => session::save_session(&auth),
                SideEffect::EvictSession => session::delete_session(),
                SideEffect::RequestPushToken => self.request_push_token(),
                SideEffect::RegisterPushToken { token } => self.register_push_token(token),
                SideEffect::UnregisterPushToken { token } => self.unregister_push_token(token),
            }
        }
    }

    fn request_push_token(&self) {
        let provider = match self.push_token_provider.read() {
            Ok(slot) => slot.clone(),
            Err(poison) => poison.into_inner().clone(),
        };
        match provider {
            Some(p) => p.request_token(),
            // The host registers its provider asynchronously; it can still
            // deliver a token unprompted via `provide_push_token`.
            None => tracing::debug!("push: no token provider registered"),
        }
    }

    // ── Async follow-ups ────────────────────────────────────────────────

    fn execute(&mut self, follow_up: FollowUp) {
        match follow_up {
            FollowUp::None => {}
            FollowUp::SpawnLogin { email, password } => self.spawn_login(email, password),
            FollowUp::SendOutgoing {
                room_id,
                message_id,
                body,
            } => self.spawn_send(room_id, message_id, body),
            FollowUp::FetchOlder {
                room_id,
                cursor,
                limit,
            } => self.spawn_fetch_older(room_id, cursor, limit),
            FollowUp::SubmitProfile => self.spawn_submit_profile(),
            FollowUp::SubmitReport {
                report_type,
                entity_type,
                entity_id,
            } => self.spawn_submit_report(report_type, entity_type, entity_id),
            FollowUp::RefreshSession => self.spawn_session_fetches(),
        }
    }

    fn send_internal(&self, event: InternalEvent) {
        let _ = self.core_sender.send(CoreMsg::Internal(Box::new(event)));
    }

    fn spawn_login(&self, email: String, password: String) {
        let epoch = self.epoch;
        if !self.network_enabled() {
            self.send_internal(InternalEvent::LoginFinished {
                epoch,
                success: None,
                error: Some("network disabled".into()),
            });
            return;
        }
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let event = match api.login(&email, &password).await {
                Ok(success) => InternalEvent::LoginFinished {
                    epoch,
                    success: Some(success),
                    error: None,
                },
                Err(e) => InternalEvent::LoginFinished {
                    epoch,
                    success: None,
                    error: Some(e.to_string()),
                },
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(event)));
        });
    }

    fn spawn_session_fetches(&self) {
        let Some(token) = self.state.auth.token().map(String::from) else {
            return;
        };
        if !self.network_enabled() {
            return;
        }
        let epoch = self.epoch;
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        {
            let api = api.clone();
            let tx = tx.clone();
            let token = token.clone();
            self.runtime.spawn(async move {
                match api.fetch_rooms(&token).await {
                    Ok(rooms) => {
                        let _ = tx.send(CoreMsg::Internal(Box::new(
                            InternalEvent::RoomsFetched { epoch, rooms },
                        )));
                    }
                    Err(e) => tracing::warn!(%e, "rooms refresh failed"),
                }
            });
        }
        self.runtime.spawn(async move {
            match api.fetch_catalog(&token).await {
                Ok((offers, interests)) => {
                    let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::CatalogFetched {
                        epoch,
                        offers,
                        interests,
                    })));
                }
                Err(e) => tracing::warn!(%e, "catalog refresh failed"),
            }
        });
    }

    fn spawn_fetch_older(&self, room_id: String, cursor: Option<String>, limit: u32) {
        let epoch = self.epoch;
        let Some(token) = self.state.auth.token().map(String::from) else {
            return;
        };
        if !self.network_enabled() {
            self.send_internal(InternalEvent::OlderMessagesFailed {
                epoch,
                room_id,
                error: "network disabled".into(),
            });
            return;
        }
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let event = match api
                .fetch_older_messages(&token, &room_id, cursor.as_deref(), limit)
                .await
            {
                Ok((messages, next_cursor, exhausted)) => InternalEvent::OlderMessagesFetched {
                    epoch,
                    room_id,
                    messages,
                    next_cursor,
                    exhausted,
                },
                Err(e) => InternalEvent::OlderMessagesFailed {
                    epoch,
                    room_id,
                    error: e.to_string(),
                },
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(event)));
        });
    }

    fn spawn_send(&self, room_id: String, message_id: String, body: String) {
        let epoch = self.epoch;
        let Some(token) = self.state.auth.token().map(String::from) else {
            return;
        };
        if !self.network_enabled() {
            self.send_internal(InternalEvent::MessageSendResult {
                epoch,
                room_id,
                message_id,
                ok: false,
                error: Some("network disabled".into()),
            });
            return;
        }
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.send_message(&token, &room_id, &message_id, &body).await;
            let event = match result {
                Ok(()) => InternalEvent::MessageSendResult {
                    epoch,
                    room_id,
                    message_id,
                    ok: true,
                    error: None,
                },
                Err(e) => InternalEvent::MessageSendResult {
                    epoch,
                    room_id,
                    message_id,
                    ok: false,
                    error: Some(e.to_string()),
                },
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(event)));
        });
    }

    fn spawn_submit_profile(&self) {
        let epoch = self.epoch;
        let Some(token) = self.state.auth.token().map(String::from) else {
            return;
        };
        if !self.network_enabled() {
            self.send_internal(InternalEvent::ProfileSubmitted {
                epoch,
                ok: false,
                error: Some("network disabled".into()),
            });
            return;
        }
        let onboarding = self.state.onboarding.clone();
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let event = match api.submit_profile(&token, &onboarding).await {
                Ok(()) => InternalEvent::ProfileSubmitted {
                    epoch,
                    ok: true,
                    error: None,
                },
                Err(e) => InternalEvent::ProfileSubmitted {
                    epoch,
                    ok: false,
                    error: Some(e.to_string()),
                },
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(event)));
        });
    }

    fn spawn_submit_report(&self, report_type: String, entity_type: String, entity_id: String) {
        let epoch = self.epoch;
        let Some(token) = self.state.auth.token().map(String::from) else {
            return;
        };
        if !self.network_enabled() {
            self.send_internal(InternalEvent::ReportSubmitted {
                epoch,
                ok: false,
                error: Some("network disabled".into()),
            });
            return;
        }
        let api = self.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let event = match api
                .submit_report(&token, &report_type, &entity_type, &entity_id)
                .await
            {
                Ok(()) => InternalEvent::ReportSubmitted {
                    epoch,
                    ok: true,
                    error: None,
                },
                Err(e) => InternalEvent::ReportSubmitted {
                    epoch,
                    ok: false,
                    error: Some(e.to_string()),
                },
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(event)));
        });
    }
}

/// Load consented slices and the consent record from the cache db into a
/// fresh state, honoring the gate (an expired web consent loads nothing).
fn restore_cached_state(state: &mut AppState, db: &rusqlite::Connection, gate: &ConsentGate) {
    state.consent = storage::load_consent(db);
    let effective = gate.effective(state.consent.as_ref(), now_seconds());

    if effective.category(Category::Cache) {
        if let Some(json) = storage::load_entry(db, EntryKey::Offers) {
            match serde_json::from_str(&json) {
                Ok(offers) => state.catalog.offers = offers,
                Err(e) => tracing::warn!(%e, "ignoring corrupt offers cache entry"),
            }
        }
        if let Some(json) = storage::load_entry(db, EntryKey::Interests) {
            match serde_json::from_str(&json) {
                Ok(interests) => state.catalog.interests = interests,
                Err(e) => tracing::warn!(%e, "ignoring corrupt interests cache entry"),
            }
        }
    }
    if effective.category(Category::Settings) {
        if let Some(json) = storage::load_entry(db, EntryKey::Locale) {
            state.settings.locale = serde_json::from_str(&json).ok();
        }
        if let Some(json) = storage::load_entry(db, EntryKey::Theme) {
            state.settings.theme = serde_json::from_str(&json).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::CookiesPreferences;
    use crate::updates::LoginSuccess;
    use flume::Receiver;
    use std::sync::Mutex;

    // The mock keyring store is process-global; serialize tests that log in
    // or out so session persistence does not leak between them.
    static KEYRING_LOCK: Mutex<()> = Mutex::new(());

    fn lock_keyring() -> std::sync::MutexGuard<'static, ()> {
        match KEYRING_LOCK.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn test_core(
        platform: Platform,
    ) -> (
        AppCore,
        Receiver<AppUpdate>,
        Receiver<CoreMsg>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("amity_config.json"),
            r#"{ "disable_network": true }"#,
        )
        .unwrap();
        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded();
        let shared = Arc::new(RwLock::new(AppState::empty()));
        let provider: crate::SharedPushTokenProvider = Arc::new(RwLock::new(None));
        let core = AppCore::new(
            update_tx,
            core_tx,
            dir.path().to_string_lossy().into_owned(),
            platform,
            "test-group".into(),
            shared,
            provider,
        );
        (core, update_rx, core_rx, dir)
    }

    fn login(core: &mut AppCore, core_rx: &Receiver<CoreMsg>) {
        core.handle_message(CoreMsg::Action(AppAction::Login {
            email: "jane.doe@example.com".into(),
            password: "pw".into(),
        }));
        // Network is disabled, so the spawned login fails; replace the
        // queued failure with a synthetic success at the same epoch.
        while core_rx.try_recv().is_ok() {}
        core.handle_message(CoreMsg::Internal(Box::new(InternalEvent::LoginFinished {
            epoch: core.epoch,
            success: Some(LoginSuccess {
                token: "tok".into(),
                user_id: "me".into(),
                name: "Jane".into(),
                avatar: None,
                email: "jane.doe@example.com".into(),
                onboarded: false,
                validated_email: true,
            }),
            error: None,
        })));
    }

    #[test]
    fn login_seeds_onboarding_and_clears_busy() {
        let _guard = lock_keyring();
        session::delete_session();
        let (mut core, update_rx, core_rx, _dir) = test_core(Platform::Ios);

        core.handle_message(CoreMsg::Action(AppAction::Login {
            email: "jane.doe@example.com".into(),
            password: "pw".into(),
        }));
        assert!(core.state.busy.logging_in);

        login(&mut core, &core_rx);
        assert!(!core.state.busy.logging_in);
        assert!(core.state.auth.is_logged_in());
        assert_eq!(core.state.onboarding.first_name.as_deref(), Some("Jane"));
        assert_eq!(core.state.onboarding.last_name.as_deref(), Some("Doe"));

        // Dispatching Login again while logged in is a no-op.
        let rev_before = core.rev;
        core.handle_message(CoreMsg::Action(AppAction::Login {
            email: "x@example.com".into(),
            password: "pw".into(),
        }));
        assert_eq!(core.rev, rev_before);

        let revs: Vec<u64> = update_rx.drain().map(|u| u.rev()).collect();
        assert!(revs.windows(2).all(|w| w[0] < w[1]), "revs not increasing: {revs:?}");
        session::delete_session();
    }

    #[test]
    fn stale_continuations_from_previous_session_are_dropped() {
        let _guard = lock_keyring();
        session::delete_session();
        let (mut core, _update_rx, core_rx, _dir) = test_core(Platform::Ios);

        login(&mut core, &core_rx);
        let old_epoch = core.epoch;

        core.handle_message(CoreMsg::Action(AppAction::Logout));
        assert!(!core.state.auth.is_logged_in());

        // A rooms fetch spawned before logout lands now.
        core.handle_message(CoreMsg::Internal(Box::new(InternalEvent::RoomsFetched {
            epoch: old_epoch,
            rooms: vec![crate::state::ChatRoom::new("r1".into())],
        })));
        assert!(core.state.rooms.is_empty());
        session::delete_session();
    }

    #[test]
    fn logout_keeps_device_level_state() {
        let _guard = lock_keyring();
        session::delete_session();
        let (mut core, _update_rx, core_rx, _dir) = test_core(Platform::Ios);

        login(&mut core, &core_rx);
        core.handle_message(CoreMsg::Action(AppAction::SetLocale { locale: "fr".into() }));
        core.handle_message(CoreMsg::Action(AppAction::IngestMessage {
            room_id: "r1".into(),
            message_id: "m1".into(),
            body: "hey".into(),
            sender_id: "u2".into(),
            sender_name: "Sam".into(),
            sender_avatar: None,
            created_at: 100,
        }));
        assert_eq!(core.state.rooms.len(), 1);

        core.handle_message(CoreMsg::Action(AppAction::Logout));
        assert!(core.state.rooms.is_empty());
        assert_eq!(core.state.settings.locale.as_deref(), Some("fr"));
        assert!(session::load_session().is_none());
        session::delete_session();
    }

    #[test]
    fn web_consent_round_trips_through_cache_db() {
        let _guard = lock_keyring();
        session::delete_session();
        let (mut core, _update_rx, _core_rx, dir) = test_core(Platform::Web);

        core.handle_message(CoreMsg::Action(AppAction::SetLocale { locale: "de".into() }));
        core.handle_message(CoreMsg::Action(AppAction::SetCookiePreferences {
            preferences: CookiesPreferences {
                auth: true,
                cache: false,
                settings: true,
            },
        }));
        drop(core);

        // A second core over the same data dir restores consent + settings.
        let (update_tx, _update_rx) = flume::unbounded();
        let (core_tx, _core_rx) = flume::unbounded();
        let shared = Arc::new(RwLock::new(AppState::empty()));
        let provider: crate::SharedPushTokenProvider = Arc::new(RwLock::new(None));
        let core = AppCore::new(
            update_tx,
            core_tx,
            dir.path().to_string_lossy().into_owned(),
            Platform::Web,
            "test-group".into(),
            shared,
            provider,
        );
        assert!(core.state.consent.is_some());
        assert_eq!(core.state.settings.locale.as_deref(), Some("de"));
        session::delete_session();
    }

    #[test]
    fn web_settings_not_persisted_without_consent() {
        let _guard = lock_keyring();
        session::delete_session();
        let (mut core, _update_rx, _core_rx, dir) = test_core(Platform::Web);

        core.handle_message(CoreMsg::Action(AppAction::SetLocale { locale: "de".into() }));
        drop(core);

        let (update_tx, _update_rx) = flume::unbounded();
        let (core_tx, _core_rx) = flume::unbounded();
        let shared = Arc::new(RwLock::new(AppState::empty()));
        let provider: crate::SharedPushTokenProvider = Arc::new(RwLock::new(None));
        let core = AppCore::new(
            update_tx,
            core_tx,
            dir.path().to_string_lossy().into_owned(),
            Platform::Web,
            "test-group".into(),
            shared,
            provider,
        );
        assert!(core.state.settings.locale.is_none());
        session::delete_session();
    }

    #[test]
    fn optimistic_send_and_fanout_echo() {
        let _guard = lock_keyring();
        session::delete_session();
        let (mut core, _update_rx, core_rx, _dir) = test_core(Platform::Ios);
        login(&mut core, &core_rx);
        while core_rx.try_recv().is_ok() {}

        core.handle_message(CoreMsg::Action(AppAction::SendMessage {
            room_id: "r1".into(),
            body: "  hello  ".into(),
        }));
        let room = rooms::find_room(&core.state.rooms, "r1").unwrap();
        assert_eq!(room.messages.len(), 1);
        let msg = &room.messages[0];
        assert_eq!(msg.body, "hello");
        assert!(!msg.sent);
        let message_id = msg.id.clone();

        // Network disabled: the spawned send fails immediately.
        match core_rx.try_recv() {
            Ok(msg @ CoreMsg::Internal(_)) => core.handle_message(msg),
            other => panic!("expected queued send result, got {other:?}"),
        }
        assert!(core.state.toast.as_deref().unwrap().contains("not sent"));
        let room = rooms::find_room(&core.state.rooms, "r1").unwrap();
        assert!(!room.messages[0].sent);

        // Fanout echo with our client id acts as the delivery ack.
        core.handle_message(CoreMsg::Action(AppAction::IngestMessage {
            room_id: "r1".into(),
            message_id: message_id.clone(),
            body: "hello".into(),
            sender_id: "me".into(),
            sender_name: "Jane".into(),
            sender_avatar: None,
            created_at: 1,
        }));
        let room = rooms::find_room(&core.state.rooms, "r1").unwrap();
        assert_eq!(room.messages.len(), 1);
        assert!(room.messages[0].sent);
        session::delete_session();
    }

    #[test]
    fn report_result_after_logout_is_dropped() {
        let _guard = lock_keyring();
        session::delete_session();
        let (mut core, _update_rx, core_rx, _dir) = test_core(Platform::Ios);
        login(&mut core, &core_rx);

        core.handle_message(CoreMsg::Action(AppAction::SubmitReport {
            report_type: "abuse".into(),
            entity_type: "message".into(),
            entity_id: "m1".into(),
        }));
        assert!(core.state.busy.submitting_report);
        let old_epoch = core.epoch;
        while core_rx.try_recv().is_ok() {}

        core.handle_message(CoreMsg::Action(AppAction::Logout));

        // The in-flight report lands after logout: no toast in the
        // logged-out state.
        core.handle_message(CoreMsg::Internal(Box::new(
            InternalEvent::ReportSubmitted {
                epoch: old_epoch,
                ok: true,
                error: None,
            },
        )));
        assert!(core.state.toast.is_none());
        assert!(!core.state.busy.submitting_report);
        session::delete_session();
    }

    #[test]
    fn profile_success_resets_onboarding_and_marks_onboarded() {
        let _guard = lock_keyring();
        session::delete_session();
        let (mut core, _update_rx, core_rx, _dir) = test_core(Platform::Ios);
        login(&mut core, &core_rx);

        core.handle_message(CoreMsg::Action(AppAction::SetOnboardingValues {
            values: crate::onboarding::OnboardingValuesUpdate {
                degree: Some("MSc".into()),
                ..Default::default()
            },
        }));
        core.handle_message(CoreMsg::Action(AppAction::SubmitProfile));
        assert!(core.state.busy.submitting_profile);
        while core_rx.try_recv().is_ok() {}

        core.handle_message(CoreMsg::Internal(Box::new(
            InternalEvent::ProfileSubmitted {
                epoch: core.epoch,
                ok: true,
                error: None,
            },
        )));
        assert!(!core.state.busy.submitting_profile);
        assert_eq!(core.state.onboarding, OnboardingState::empty());
        match &core.state.auth {
            AuthState::LoggedIn { onboarded, .. } => assert!(*onboarded),
            other => panic!("expected logged-in auth, got {other:?}"),
        }
        session::delete_session();
    }

    #[test]
    fn push_token_lifecycle() {
        let _guard = lock_keyring();
        session::delete_session();
        let (mut core, _update_rx, core_rx, _dir) = test_core(Platform::Ios);
        login(&mut core, &core_rx);

        core.handle_message(CoreMsg::Internal(Box::new(
            InternalEvent::PushTokenObtained {
                token: Some("apns-1".into()),
            },
        )));
        assert_eq!(core.state.notifications.token.as_deref(), Some("apns-1"));

        core.handle_message(CoreMsg::Internal(Box::new(
            InternalEvent::PushTokenRegistered { ok: true },
        )));
        assert_eq!(
            core.state.notifications.registration,
            PushRegistration::Registered
        );

        core.handle_message(CoreMsg::Internal(Box::new(
            InternalEvent::PushTokenObtained { token: None },
        )));
        assert_eq!(
            core.state.notifications.registration,
            PushRegistration::Disabled
        );
        session::delete_session();
    }

    #[test]
    fn pagination_action_respects_inflight_guard() {
        let _guard = lock_keyring();
        session::delete_session();
        let (mut core, _update_rx, core_rx, _dir) = test_core(Platform::Ios);
        login(&mut core, &core_rx);

        core.handle_message(CoreMsg::Action(AppAction::IngestMessage {
            room_id: "r1".into(),
            message_id: "m5".into(),
            body: "later".into(),
            sender_id: "u2".into(),
            sender_name: "Sam".into(),
            sender_avatar: None,
            created_at: 500,
        }));
        while core_rx.try_recv().is_ok() {}

        core.handle_message(CoreMsg::Action(AppAction::LoadOlderMessages {
            room_id: "r1".into(),
            limit: 20,
        }));
        assert!(core.state.rooms[0].pagination.loading);
        // One queued failure event (network disabled).
        assert_eq!(core_rx.len(), 1);

        // Second dispatch while in flight does not queue another fetch.
        core.handle_message(CoreMsg::Action(AppAction::LoadOlderMessages {
            room_id: "r1".into(),
            limit: 20,
        }));
        assert_eq!(core_rx.len(), 1);

        // Deliver the failure: loading clears, retry becomes possible.
        if let Ok(msg) = core_rx.try_recv() {
            core.handle_message(msg);
        }
        assert!(!core.state.rooms[0].pagination.loading);
        assert!(core.state.toast.is_some());
        session::delete_session();
    }
}
