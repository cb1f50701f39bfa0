//! Post-commit interceptors: small observers that compare consecutive state
//! snapshots and emit side effects for the core to execute.
//!
//! Interceptors never mutate state and never perform I/O themselves; they
//! return [`SideEffect`]s, which keeps the persistence and push policies
//! unit-testable without a database or network.

use tracing::warn;

use crate::actions::AppAction;
use crate::consent::{transitions, Category, ConsentGate, ConsentRecord};
use crate::state::{AppState, AuthState, PushRegistration};
use crate::updates::InternalEvent;

/// What was dispatched, by reference; interceptors mostly care about the
/// state diff but some effects are keyed to a specific event.
#[derive(Clone, Copy, Debug)]
pub enum Dispatched<'a> {
    Action(&'a AppAction),
    Internal(&'a InternalEvent),
}

/// Effects requested by an interceptor, executed by the core after commit.
#[derive(Clone, Debug, PartialEq)]
pub enum SideEffect {
    /// Write a JSON value into the on-disk cache under `key`.
    PersistEntry { key: EntryKey, json: String },
    /// Remove entries from the on-disk cache.
    EvictEntries { keys: Vec<EntryKey> },
    /// Store the consent decision itself (always allowed).
    PersistConsent { record: ConsentRecord },
    /// Store / remove the session in the platform keychain.
    PersistSession { auth: AuthState },
    EvictSession,
    /// Ask the host app for a push token.
    RequestPushToken,
    RegisterPushToken { token: String },
    UnregisterPushToken { token: String },
}

/// Cache keys, each tied to the consent category that gates it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKey {
    Offers,
    Interests,
    Locale,
    Theme,
}

impl EntryKey {
    pub fn name(&self) -> &'static str {
        match self {
            EntryKey::Offers => "offers",
            EntryKey::Interests => "interests",
            EntryKey::Locale => "locale",
            EntryKey::Theme => "theme",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            EntryKey::Offers | EntryKey::Interests => Category::Cache,
            EntryKey::Locale | EntryKey::Theme => Category::Settings,
        }
    }
}

pub trait Interceptor: Send {
    fn name(&self) -> &'static str;

    /// Inspect a committed transition and return the effects it warrants.
    /// `prev` is the state before the event was applied, `next` the state
    /// after; `now` is the commit time in unix seconds.
    fn react(
        &self,
        event: Dispatched<'_>,
        prev: &AppState,
        next: &AppState,
        now: i64,
    ) -> Vec<SideEffect>;
}

/// Mirrors consented state slices to disk and reacts to consent changes:
/// newly granted categories get an immediate snapshot of their current
/// slices, revoked categories get their entries evicted.
pub struct ConsentPersistenceInterceptor {
    gate: ConsentGate,
}

impl ConsentPersistenceInterceptor {
    pub fn new(gate: ConsentGate) -> Self {
        Self { gate }
    }

    fn entry_json(key: EntryKey, state: &AppState) -> Option<String> {
        let value = match key {
            EntryKey::Offers => serde_json::to_string(&state.catalog.offers),
            EntryKey::Interests => serde_json::to_string(&state.catalog.interests),
            EntryKey::Locale => serde_json::to_string(&state.settings.locale.as_ref()?),
            EntryKey::Theme => serde_json::to_string(&state.settings.theme.as_ref()?),
        };
        match value {
            Ok(json) => Some(json),
            Err(e) => {
                warn!("failed to serialize cache entry {}: {e}", key.name());
                None
            }
        }
    }

    fn keys_of(category: Category) -> Vec<EntryKey> {
        [
            EntryKey::Offers,
            EntryKey::Interests,
            EntryKey::Locale,
            EntryKey::Theme,
        ]
        .into_iter()
        .filter(|k| k.category() == category)
        .collect()
    }
}

impl Interceptor for ConsentPersistenceInterceptor {
    fn name(&self) -> &'static str {
        "consent-persistence"
    }

    fn react(
        &self,
        _event: Dispatched<'_>,
        prev: &AppState,
        next: &AppState,
        now: i64,
    ) -> Vec<SideEffect> {
        let mut effects = vec![];

        // The decision record itself is never gated.
        if next.consent != prev.consent {
            if let Some(record) = &next.consent {
                effects.push(SideEffect::PersistConsent {
                    record: record.clone(),
                });
            }
        }

        let prev_eff = self.gate.effective(prev.consent.as_ref(), now);
        let next_eff = self.gate.effective(next.consent.as_ref(), now);
        let (granted, revoked) = transitions(&prev_eff, &next_eff);

        // Newly granted categories: snapshot whatever is in memory right now,
        // so state accumulated while ungated becomes durable.
        for category in &granted {
            for key in Self::keys_of(*category) {
                if let Some(json) = Self::entry_json(key, next) {
                    effects.push(SideEffect::PersistEntry { key, json });
                }
            }
        }
        let evict: Vec<EntryKey> = revoked.iter().flat_map(|c| Self::keys_of(*c)).collect();
        if !evict.is_empty() {
            effects.push(SideEffect::EvictEntries { keys: evict });
        }

        // Steady-state mirroring of changed slices, gated per category.
        if next_eff.category(Category::Cache)
            && !granted.contains(&Category::Cache)
            && next.catalog != prev.catalog
        {
            for key in [EntryKey::Offers, EntryKey::Interests] {
                if let Some(json) = Self::entry_json(key, next) {
                    effects.push(SideEffect::PersistEntry { key, json });
                }
            }
        }
        if next_eff.category(Category::Settings)
            && !granted.contains(&Category::Settings)
            && next.settings != prev.settings
        {
            for key in [EntryKey::Locale, EntryKey::Theme] {
                if let Some(json) = Self::entry_json(key, next) {
                    effects.push(SideEffect::PersistEntry { key, json });
                }
            }
        }

        // The session lives in the keychain and is auth-category, which is
        // always granted.
        if next.auth.token() != prev.auth.token() {
            match &next.auth {
                AuthState::LoggedIn { .. } => effects.push(SideEffect::PersistSession {
                    auth: next.auth.clone(),
                }),
                AuthState::LoggedOut => effects.push(SideEffect::EvictSession),
            }
        }

        effects
    }
}

/// Ties push-token registration to the session lifecycle: request a token on
/// login, register it with the backend once the host app delivers it, and
/// unregister it on logout.
pub struct PushRegistrationInterceptor;

impl Interceptor for PushRegistrationInterceptor {
    fn name(&self) -> &'static str {
        "push-registration"
    }

    fn react(
        &self,
        event: Dispatched<'_>,
        prev: &AppState,
        next: &AppState,
        _now: i64,
    ) -> Vec<SideEffect> {
        if !prev.auth.is_logged_in() && next.auth.is_logged_in() {
            return vec![SideEffect::RequestPushToken];
        }

        if let Dispatched::Internal(InternalEvent::PushTokenObtained { token: Some(token) }) = event
        {
            // Token may arrive after the user already logged out again.
            if next.auth.is_logged_in() {
                return vec![SideEffect::RegisterPushToken {
                    token: token.clone(),
                }];
            }
        }

        if prev.auth.is_logged_in() && !next.auth.is_logged_in() {
            if let Some(token) = &prev.notifications.token {
                if prev.notifications.registration == PushRegistration::Registered {
                    return vec![SideEffect::UnregisterPushToken {
                        token: token.clone(),
                    }];
                }
            }
        }

        vec![]
    }
}
