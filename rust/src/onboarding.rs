//! Multi-step registration wizard accumulator.
//!
//! Fields arrive one wizard step at a time and are merged into the
//! accumulator; nothing is required until final submission. The whole
//! accumulator resets atomically once the profile is created.

use std::collections::HashMap;

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct OnboardingState {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// ISO 8601 date (`YYYY-MM-DD`).
    pub birthdate: Option<String>,
    pub gender: Option<String>,
    pub nationality: Option<String>,
    pub role: Option<String>,
    pub degree: Option<String>,
    pub languages: Vec<String>,
    /// offer id -> user-entered value for that offer.
    pub offer_values: HashMap<String, String>,
    pub interests: Vec<String>,
    pub school: Option<String>,
    pub field_of_study: Option<String>,
    pub graduation_year: Option<u32>,
}

impl OnboardingState {
    pub fn empty() -> Self {
        Self {
            first_name: None,
            last_name: None,
            birthdate: None,
            gender: None,
            nationality: None,
            role: None,
            degree: None,
            languages: vec![],
            offer_values: HashMap::new(),
            interests: vec![],
            school: None,
            field_of_study: None,
            graduation_year: None,
        }
    }

    /// Merge a partial update; only fields present in `update` change.
    pub fn merge(&mut self, update: OnboardingValuesUpdate) {
        macro_rules! take {
            ($field:ident) => {
                if let Some(v) = update.$field {
                    self.$field = Some(v);
                }
            };
        }
        take!(first_name);
        take!(last_name);
        take!(birthdate);
        take!(gender);
        take!(nationality);
        take!(role);
        take!(degree);
        take!(school);
        take!(field_of_study);
        take!(graduation_year);
        if let Some(v) = update.languages {
            self.languages = v;
        }
        if let Some(v) = update.interests {
            self.interests = v;
        }
    }

    pub fn set_offer_value(&mut self, offer_id: String, value: String) {
        self.offer_values.insert(offer_id, value);
    }
}

/// Partial wizard update; `None` fields are left untouched by `merge`.
#[derive(uniffi::Record, Clone, Debug, Default, PartialEq)]
pub struct OnboardingValuesUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub birthdate: Option<String>,
    pub gender: Option<String>,
    pub nationality: Option<String>,
    pub role: Option<String>,
    pub degree: Option<String>,
    pub languages: Option<Vec<String>>,
    pub interests: Option<Vec<String>>,
    pub school: Option<String>,
    pub field_of_study: Option<String>,
    pub graduation_year: Option<u32>,
}

/// Pre-seed name fields from an email address, best effort.
///
/// `"jane.doe@example.com"` seeds `first_name = "Jane"`,
/// `last_name = "Doe"`; a local part without a `.` only seeds the first
/// name. Already-set fields are never overwritten.
pub fn seed_from_email(state: &mut OnboardingState, email: &str) {
    let local = match email.split('@').next() {
        Some(l) if !l.is_empty() => l,
        _ => return,
    };
    let mut parts = local.split('.').filter(|p| !p.is_empty());
    if state.first_name.is_none() {
        if let Some(first) = parts.next() {
            state.first_name = Some(capitalize(first));
        }
    } else {
        parts.next();
    }
    if state.last_name.is_none() {
        if let Some(last) = parts.next() {
            state.last_name = Some(capitalize(last));
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
