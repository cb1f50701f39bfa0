mod actions;
mod consent;
mod core;
mod interceptors;
mod logging;
mod onboarding;
mod rooms;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use consent::*;
pub use onboarding::*;
pub use state::*;
pub use updates::*;

/// Whether `user` has seen `message`, combining both read-receipt signals
/// (seen-date at or past the message timestamp, or seen-id equal to the
/// message id). Exposed so list UIs can derive read markers from snapshots.
#[uniffi::export]
pub fn is_message_read(message: ChatRoomMessage, user: ChatRoomUser) -> bool {
    rooms::is_read(&message, &user)
}

uniffi::setup_scaffolding!();

#[uniffi::export(callback_interface)]
pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

/// Platform-side hook for obtaining a push token. `request_token` must not
/// block; the host answers (possibly much later) via
/// [`FfiApp::provide_push_token`].
#[uniffi::export(callback_interface)]
pub trait PushTokenProvider: Send + Sync + 'static {
    fn request_token(&self);
}

pub type SharedPushTokenProvider = Arc<RwLock<Option<Arc<dyn PushTokenProvider>>>>;

#[derive(uniffi::Object)]
pub struct FfiApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
    push_token_provider: SharedPushTokenProvider,
}

#[uniffi::export]
impl FfiApp {
    #[uniffi::constructor]
    pub fn new(data_dir: String, platform: String, keychain_group: String) -> Arc<Self> {
        logging::init_logging(&data_dir);
        tracing::info!(data_dir = %data_dir, platform = %platform, "FfiApp::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));
        let push_token_provider: SharedPushTokenProvider = Arc::new(RwLock::new(None));
        let platform = Platform::parse(&platform);

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        let provider_for_core = push_token_provider.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                platform,
                keychain_group,
                shared_for_core,
                provider_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            push_token_provider,
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }

    /// Entry point for OS push payloads (remote notification JSON).
    /// Malformed payloads are dropped.
    pub fn push_notification_received(&self, payload_json: String) {
        if let Some(action) = crate::core::parse_push_payload(&payload_json) {
            self.dispatch(action);
        }
    }

    pub fn set_push_token_provider(&self, provider: Box<dyn PushTokenProvider>) {
        let provider: Arc<dyn PushTokenProvider> = Arc::from(provider);
        match self.push_token_provider.write() {
            Ok(mut slot) => *slot = Some(provider),
            Err(poison) => *poison.into_inner() = Some(provider),
        }
    }

    /// Host answer to a token request. `None` means push is unavailable
    /// (permission denied or unsupported), which is terminal for the session.
    pub fn provide_push_token(&self, token: Option<String>) {
        let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
            InternalEvent::PushTokenObtained { token },
        )));
    }
}
