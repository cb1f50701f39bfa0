// Push notification ingestion and device-token registration.

use serde::Deserialize;

use super::AppCore;
use crate::actions::AppAction;
use crate::updates::{CoreMsg, InternalEvent};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushSender {
    id: String,
    name: String,
    avatar: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushPayload {
    room_id: String,
    message_id: String,
    text: String,
    created_at: i64,
    sender: PushSender,
}

/// Decode an OS push payload into the action that ingests it. Malformed
/// payloads are dropped; the OS delivers whatever the backend (or a stale
/// app version) put there, so this is not an error path worth surfacing.
pub fn parse_push_payload(json: &str) -> Option<AppAction> {
    let payload: PushPayload = match serde_json::from_str(json) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(%e, "push: dropping malformed payload");
            return None;
        }
    };
    Some(AppAction::IngestMessage {
        room_id: payload.room_id,
        message_id: payload.message_id,
        body: payload.text,
        sender_id: payload.sender.id,
        sender_name: payload.sender.name,
        sender_avatar: payload.sender.avatar,
        created_at: payload.created_at,
    })
}

impl AppCore {
    pub(super) fn register_push_token(&self, token: String) {
        if !self.network_enabled() {
            tracing::debug!("push: network disabled, skipping token registration");
            return;
        }
        let url = format!("{}/token", self.notification_url());
        let client = self.http_client.clone();
        let tx = self.core_sender.clone();

        self.runtime.spawn(async move {
            let body = serde_json::json!({ "token": token });
            let ok = match client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!(status = %resp.status(), "push: registered token");
                    true
                }
                Ok(resp) => {
                    tracing::warn!(status = %resp.status(), "push: token registration rejected");
                    false
                }
                Err(e) => {
                    tracing::warn!(%e, "push: failed to register token");
                    false
                }
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::PushTokenRegistered { ok },
            )));
        });
    }

    pub(super) fn unregister_push_token(&self, token: String) {
        if !self.network_enabled() {
            return;
        }
        let url = format!("{}/token", self.notification_url());
        let client = self.http_client.clone();

        // Best effort; the session is already gone locally.
        self.runtime.spawn(async move {
            let body = serde_json::json!({ "token": token });
            match client.delete(&url).json(&body).send().await {
                Ok(resp) => {
                    tracing::info!(status = %resp.status(), "push: unregistered token");
                }
                Err(e) => {
                    tracing::warn!(%e, "push: failed to unregister token");
                }
            }
        });
    }
}
