//! Consent bookkeeping and the policy that gates durable persistence.
//!
//! Consent is tracked per category. On iOS/Android consent is implicit and
//! persistence is always allowed; on web a recorded consent expires
//! [`CONSENT_EXPIRY_DAYS`] after `consent_date`, after which it behaves as if
//! it had never been given until the user re-decides.

use crate::state::Platform;

/// Default web consent validity window, in days.
pub const CONSENT_EXPIRY_DAYS: i64 = 180;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Per-category consent flags.
///
/// `auth` gates session-token persistence and is not user-optional; it is
/// carried here for completeness but persistence of the auth category is
/// never blocked on it.
#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CookiesPreferences {
    pub auth: bool,
    pub cache: bool,
    pub settings: bool,
}

impl CookiesPreferences {
    pub fn none() -> Self {
        Self {
            auth: true,
            cache: false,
            settings: false,
        }
    }

    pub fn category(&self, category: Category) -> bool {
        match category {
            Category::Auth => self.auth,
            Category::Cache => self.cache,
            Category::Settings => self.settings,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConsentRecord {
    pub preferences: CookiesPreferences,
    /// Unix seconds of the user's decision.
    pub consent_date: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Category {
    Auth,
    Cache,
    Settings,
}

/// Decides whether a category may be persisted right now.
#[derive(Clone, Copy, Debug)]
pub struct ConsentGate {
    platform: Platform,
    expiry_days: i64,
}

impl ConsentGate {
    pub fn new(platform: Platform, expiry_days: Option<i64>) -> Self {
        Self {
            platform,
            expiry_days: expiry_days.unwrap_or(CONSENT_EXPIRY_DAYS),
        }
    }

    /// Whether `record` is still a valid decision at `now`.
    pub fn is_valid(&self, record: &ConsentRecord, now: i64) -> bool {
        if !self.platform.is_web() {
            return true;
        }
        now - record.consent_date < self.expiry_days * SECONDS_PER_DAY
    }

    /// The categories effectively granted at `now`.
    ///
    /// Auth is always granted. On non-web platforms everything is granted
    /// implicitly; on web an absent or expired record grants nothing beyond
    /// auth.
    pub fn effective(&self, record: Option<&ConsentRecord>, now: i64) -> CookiesPreferences {
        if !self.platform.is_web() {
            return CookiesPreferences {
                auth: true,
                cache: true,
                settings: true,
            };
        }
        match record {
            Some(r) if self.is_valid(r, now) => CookiesPreferences {
                auth: true,
                ..r.preferences.clone()
            },
            _ => CookiesPreferences::none(),
        }
    }

    pub fn allows(&self, record: Option<&ConsentRecord>, category: Category, now: i64) -> bool {
        self.effective(record, now).category(category)
    }
}

/// Categories that transitioned false->true / true->false between two
/// effective preference sets.
pub fn transitions(
    old: &CookiesPreferences,
    new: &CookiesPreferences,
) -> (Vec<Category>, Vec<Category>) {
    let mut granted = vec![];
    let mut revoked = vec![];
    for category in [Category::Auth, Category::Cache, Category::Settings] {
        match (old.category(category), new.category(category)) {
            (false, true) => granted.push(category),
            (true, false) => revoked.push(category),
            _ => {}
        }
    }
    (granted, revoked)
}
