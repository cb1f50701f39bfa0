//! Session persistence in the platform keychain.
//!
//! The session (bearer token plus the user snapshot needed to restore
//! [`AuthState`] without a network round-trip) is auth-category data and is
//! stored unconditionally, never behind the consent gate.

use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::state::AuthState;

pub const SERVICE_ID: &str = "com.amity.app";
const SESSION_USER: &str = "session";

pub fn init_keyring_once(#[allow(unused)] keychain_group: &str) -> Result<()> {
    static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();
    match INIT.get_or_init(|| init_keyring_inner(keychain_group).map_err(|e| e.to_string())) {
        Ok(()) => Ok(()),
        Err(e) => Err(anyhow!(e.clone())),
    }
}

fn init_keyring_inner(#[allow(unused)] keychain_group: &str) -> Result<()> {
    // IMPORTANT: `set_default_store` can only be called once per process.
    // We guard it via `OnceLock` above.
    #[cfg(target_os = "ios")]
    {
        let mut config = std::collections::HashMap::new();
        config.insert("access-group", keychain_group);
        let store = apple_native_keyring_store::protected::Store::new_with_configuration(&config)
            .context(
            "failed to create Apple protected keyring store with shared access group",
        )?;
        keyring_core::set_default_store(store);
        return Ok(());
    }

    #[cfg(target_os = "android")]
    {
        use android_native_keyring_store::credential::AndroidStore;

        let store = AndroidStore::from_ndk_context()
            .context("Android keyring store not initialized. Call Keyring.setAndroidKeyringCredentialBuilder(context) early in MainActivity, or use a framework that provides ndk-context.")?;
        keyring_core::set_default_store(store);
        return Ok(());
    }

    #[cfg(not(any(target_os = "android", target_os = "ios")))]
    {
        // Desktop/dev/web-server: in-memory mock store. The session simply
        // does not survive a process restart there.
        keyring_core::set_default_store(
            keyring_core::mock::Store::new().context("failed to create mock keyring store")?,
        );
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct SessionBlob {
    token: String,
    user_id: String,
    name: String,
    avatar: Option<String>,
    email: String,
    onboarded: bool,
    validated_email: bool,
}

/// Store the logged-in session. A `LoggedOut` value is a no-op; use
/// [`delete_session`] on logout.
pub fn save_session(auth: &AuthState) {
    let AuthState::LoggedIn {
        token,
        user_id,
        name,
        avatar,
        email,
        onboarded,
        validated_email,
    } = auth
    else {
        return;
    };
    let blob = SessionBlob {
        token: token.clone(),
        user_id: user_id.clone(),
        name: name.clone(),
        avatar: avatar.clone(),
        email: email.clone(),
        onboarded: *onboarded,
        validated_email: *validated_email,
    };
    let json = match serde_json::to_string(&blob) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(%e, "failed to serialize session");
            return;
        }
    };
    match keyring_core::Entry::new(SERVICE_ID, SESSION_USER) {
        Ok(entry) => {
            if let Err(e) = entry.set_password(&json) {
                tracing::warn!(%e, "failed to store session in keychain");
            }
        }
        Err(e) => tracing::warn!(%e, "failed to open keychain entry"),
    }
}

pub fn load_session() -> Option<AuthState> {
    let entry = keyring_core::Entry::new(SERVICE_ID, SESSION_USER).ok()?;
    let json = entry.get_password().ok()?;
    let blob: SessionBlob = serde_json::from_str(&json).ok()?;
    Some(AuthState::LoggedIn {
        token: blob.token,
        user_id: blob.user_id,
        name: blob.name,
        avatar: blob.avatar,
        email: blob.email,
        onboarded: blob.onboarded,
        validated_email: blob.validated_email,
    })
}

pub fn delete_session() {
    if let Ok(entry) = keyring_core::Entry::new(SERVICE_ID, SESSION_USER) {
        // Missing credential is fine (fresh install or already logged out).
        let _ = entry.delete_credential();
    }
}
