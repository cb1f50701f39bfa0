//! Typed REST client for the backend. All calls are made from spawned tasks
//! on the core runtime; results travel back to the core thread as
//! [`crate::updates::InternalEvent`]s.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::onboarding::OnboardingState;
use crate::state::{CatalogItem, ChatRoom, ChatRoomMessage, ChatRoomUser, PaginatedState};
use crate::updates::LoginSuccess;

#[derive(Clone)]
pub(super) struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    token: String,
    user: WireUser,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUser {
    id: String,
    name: String,
    avatar: Option<String>,
    email: String,
    #[serde(default)]
    onboarded: bool,
    #[serde(default)]
    validated_email: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRoomUser {
    id: String,
    name: String,
    avatar: Option<String>,
    last_message_seen_date: Option<i64>,
    last_message_seen_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: String,
    sender: WireRoomUser,
    body: String,
    created_at: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRoom {
    id: String,
    users: Vec<WireRoomUser>,
    /// Newest page of messages, newest first.
    messages: Vec<WireMessage>,
    next_cursor: Option<String>,
    #[serde(default)]
    exhausted: bool,
}

#[derive(Deserialize)]
struct RoomsResponse {
    rooms: Vec<WireRoom>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct MessagesPage {
    messages: Vec<WireMessage>,
    next_cursor: Option<String>,
    #[serde(default)]
    exhausted: bool,
}

#[derive(Deserialize)]
struct CatalogResponse {
    offers: Vec<CatalogItem>,
    interests: Vec<CatalogItem>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfilePayload<'a> {
    first_name: &'a Option<String>,
    last_name: &'a Option<String>,
    birthdate: &'a Option<String>,
    gender: &'a Option<String>,
    nationality: &'a Option<String>,
    role: &'a Option<String>,
    degree: &'a Option<String>,
    languages: &'a Vec<String>,
    offer_values: &'a std::collections::HashMap<String, String>,
    interests: &'a Vec<String>,
    school: &'a Option<String>,
    field_of_study: &'a Option<String>,
    graduation_year: &'a Option<u32>,
}

impl From<WireRoomUser> for ChatRoomUser {
    fn from(u: WireRoomUser) -> Self {
        ChatRoomUser {
            id: u.id,
            name: u.name,
            avatar: u.avatar,
            last_message_seen_date: u.last_message_seen_date,
            last_message_seen_id: u.last_message_seen_id,
        }
    }
}

impl From<WireMessage> for ChatRoomMessage {
    fn from(m: WireMessage) -> Self {
        ChatRoomMessage {
            id: m.id,
            sender: m.sender.into(),
            body: m.body,
            created_at: m.created_at,
            sent: true,
        }
    }
}

impl From<WireRoom> for ChatRoom {
    fn from(r: WireRoom) -> Self {
        let mut messages: Vec<ChatRoomMessage> =
            r.messages.into_iter().map(Into::into).collect();
        // The wire order is newest-first; the local log is ascending.
        messages.reverse();
        let mut room = ChatRoom {
            id: r.id,
            users: r.users.into_iter().map(Into::into).collect(),
            messages,
            last_message: None,
            writing: Default::default(),
            pagination: PaginatedState {
                cursor: r.next_cursor,
                loading: false,
                exhausted: r.exhausted,
            },
        };
        crate::rooms::refresh_last_message(&mut room);
        room
    }
}

impl ApiClient {
    pub(super) fn new(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub(super) async fn login(&self, email: &str, password: &str) -> Result<LoginSuccess> {
        let resp = self
            .http
            .post(self.url("/auth/login"))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .context("login request failed")?;
        if !resp.status().is_success() {
            bail!("login rejected: {}", resp.status());
        }
        let body: LoginResponse = resp.json().await.context("invalid login response")?;
        Ok(LoginSuccess {
            token: body.token,
            user_id: body.user.id,
            name: body.user.name,
            avatar: body.user.avatar,
            email: body.user.email,
            onboarded: body.user.onboarded,
            validated_email: body.user.validated_email,
        })
    }

    pub(super) async fn fetch_rooms(&self, token: &str) -> Result<Vec<ChatRoom>> {
        let resp = self
            .http
            .get(self.url("/rooms"))
            .bearer_auth(token)
            .send()
            .await
            .context("rooms request failed")?;
        if !resp.status().is_success() {
            bail!("rooms fetch rejected: {}", resp.status());
        }
        let body: RoomsResponse = resp.json().await.context("invalid rooms response")?;
        Ok(body.rooms.into_iter().map(Into::into).collect())
    }

    pub(super) async fn fetch_older_messages(
        &self,
        token: &str,
        room_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<(Vec<ChatRoomMessage>, Option<String>, bool)> {
        let mut req = self
            .http
            .get(self.url(&format!("/rooms/{room_id}/messages")))
            .bearer_auth(token)
            .query(&[("limit", limit.to_string())]);
        if let Some(cursor) = cursor {
            req = req.query(&[("before", cursor)]);
        }
        let resp = req.send().await.context("messages request failed")?;
        if !resp.status().is_success() {
            bail!("messages fetch rejected: {}", resp.status());
        }
        let page: MessagesPage = resp.json().await.context("invalid messages response")?;
        let mut messages: Vec<ChatRoomMessage> =
            page.messages.into_iter().map(Into::into).collect();
        messages.reverse();
        Ok((messages, page.next_cursor, page.exhausted))
    }

    /// `message_id` is the client-generated uuid; the backend echoes it in
    /// push fanout so the sender can recognize its own message.
    pub(super) async fn send_message(
        &self,
        token: &str,
        room_id: &str,
        message_id: &str,
        body: &str,
    ) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/rooms/{room_id}/messages")))
            .bearer_auth(token)
            .json(&serde_json::json!({ "id": message_id, "body": body }))
            .send()
            .await
            .context("send-message request failed")?;
        if !resp.status().is_success() {
            bail!("send rejected: {}", resp.status());
        }
        Ok(())
    }

    pub(super) async fn fetch_catalog(
        &self,
        token: &str,
    ) -> Result<(Vec<CatalogItem>, Vec<CatalogItem>)> {
        let resp = self
            .http
            .get(self.url("/catalog"))
            .bearer_auth(token)
            .send()
            .await
            .context("catalog request failed")?;
        if !resp.status().is_success() {
            bail!("catalog fetch rejected: {}", resp.status());
        }
        let body: CatalogResponse = resp.json().await.context("invalid catalog response")?;
        Ok((body.offers, body.interests))
    }

    pub(super) async fn submit_profile(
        &self,
        token: &str,
        onboarding: &OnboardingState,
    ) -> Result<()> {
        let payload = ProfilePayload {
            first_name: &onboarding.first_name,
            last_name: &onboarding.last_name,
            birthdate: &onboarding.birthdate,
            gender: &onboarding.gender,
            nationality: &onboarding.nationality,
            role: &onboarding.role,
            degree: &onboarding.degree,
            languages: &onboarding.languages,
            offer_values: &onboarding.offer_values,
            interests: &onboarding.interests,
            school: &onboarding.school,
            field_of_study: &onboarding.field_of_study,
            graduation_year: &onboarding.graduation_year,
        };
        let resp = self
            .http
            .post(self.url("/profile"))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .context("profile request failed")?;
        if !resp.status().is_success() {
            bail!("profile rejected: {}", resp.status());
        }
        Ok(())
    }

    pub(super) async fn submit_report(
        &self,
        token: &str,
        report_type: &str,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/reports"))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "type": report_type,
                "entityType": entity_type,
                "entityId": entity_id,
            }))
            .send()
            .await
            .context("report request failed")?;
        if !resp.status().is_success() {
            bail!("report rejected: {}", resp.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_room_reverses_message_order_and_sets_last() {
        let json = serde_json::json!({
            "id": "r1",
            "users": [
                { "id": "u1", "name": "Jane", "avatar": null,
                  "lastMessageSeenDate": 100, "lastMessageSeenId": "m1" }
            ],
            "messages": [
                { "id": "m2", "body": "hi again", "createdAt": 200,
                  "sender": { "id": "u1", "name": "Jane", "avatar": null,
                              "lastMessageSeenDate": null, "lastMessageSeenId": null } },
                { "id": "m1", "body": "hi", "createdAt": 100,
                  "sender": { "id": "u1", "name": "Jane", "avatar": null,
                              "lastMessageSeenDate": null, "lastMessageSeenId": null } }
            ],
            "nextCursor": "m1",
            "exhausted": false
        });
        let wire: WireRoom = serde_json::from_value(json).unwrap();
        let room: ChatRoom = wire.into();

        let ids: Vec<&str> = room.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert!(room.messages.iter().all(|m| m.sent));
        assert_eq!(room.last_message.as_ref().unwrap().id, "m2");
        assert_eq!(room.pagination.cursor.as_deref(), Some("m1"));
        assert_eq!(room.users[0].last_message_seen_date, Some(100));
    }
}
