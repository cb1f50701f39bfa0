//! Pure chat-room state transitions: message ingestion, read-receipt
//! reconciliation and pagination bookkeeping.
//!
//! Messages for the same room arrive from independent sources (push
//! notifications, paginated fetches, the local outbox) with no ordering
//! guarantee between them, so every operation here is idempotent and merges
//! are id-based and commutative.

use crate::state::{ChatRoom, ChatRoomMessage, ChatRoomUser};

pub fn find_room<'a>(rooms: &'a [ChatRoom], room_id: &str) -> Option<&'a ChatRoom> {
    rooms.iter().find(|r| r.id == room_id)
}

pub fn find_room_mut<'a>(rooms: &'a mut [ChatRoom], room_id: &str) -> Option<&'a mut ChatRoom> {
    rooms.iter_mut().find(|r| r.id == room_id)
}

/// Whether `user` has seen `message`.
///
/// True when the user's seen-date is at or past the message timestamp, or
/// when their seen-id matches the message id. The two cursor signals are
/// updated independently and can diverge; whether the freshest one should
/// win is an open product question, so both are honored as-is.
pub fn is_read(message: &ChatRoomMessage, user: &ChatRoomUser) -> bool {
    if let Some(seen_date) = user.last_message_seen_date {
        if seen_date >= message.created_at {
            return true;
        }
    }
    user.last_message_seen_id.as_deref() == Some(message.id.as_str())
}

/// Append an externally-sourced message to its room, creating the room if
/// unknown. Returns `false` (no-op) when the id is already present — the
/// same message may be delivered by the OS twice, or arrive via push after
/// a foreground fetch already obtained it.
pub fn ingest_message(
    rooms: &mut Vec<ChatRoom>,
    room_id: &str,
    message: ChatRoomMessage,
) -> bool {
    if find_room(rooms, room_id).is_none() {
        rooms.push(ChatRoom::new(room_id.to_string()));
    }
    let Some(room) = find_room_mut(rooms, room_id) else {
        return false;
    };

    if room.messages.iter().any(|m| m.id == message.id) {
        return false;
    }

    // The sender may be a participant we have not seen yet.
    ensure_member(room, message.sender.clone());
    room.messages.push(message);
    refresh_last_message(room);
    true
}

/// Recompute the denormalized `last_message` pointer (greatest `created_at`).
pub fn refresh_last_message(room: &mut ChatRoom) {
    room.last_message = room
        .messages
        .iter()
        .max_by(|a, b| a.created_at.cmp(&b.created_at))
        .cloned();
}

/// Add `user` to the room's participant list if absent.
pub fn ensure_member(room: &mut ChatRoom, user: ChatRoomUser) {
    if !room.users.iter().any(|u| u.id == user.id) {
        room.users.push(user);
    }
}

/// Monotonically advance a participant's read-receipt cursor.
///
/// Each signal advances independently: a date that does not advance the
/// stored date is ignored, and the seen-id is adopted only when no id is
/// stored yet, when both ids resolve in the log and the new one is not
/// older, or when the comparison is unresolvable but an advancing date
/// vouches for the update. An id that is provably older than the stored one
/// never overwrites it, even alongside a newer date.
pub fn apply_seen_update(
    room: &mut ChatRoom,
    user_id: &str,
    seen_date: Option<i64>,
    seen_message_id: Option<String>,
) -> bool {
    let message_time = |id: &str| {
        room.messages
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.created_at)
    };
    let new_id_time = seen_message_id.as_deref().and_then(|id| message_time(id));
    let current_id_time = room
        .users
        .iter()
        .find(|u| u.id == user_id)
        .and_then(|u| u.last_message_seen_id.as_deref())
        .and_then(|id| message_time(id));

    let Some(user) = room.users.iter_mut().find(|u| u.id == user_id) else {
        return false;
    };

    let mut changed = false;

    let date_advanced = match (seen_date, user.last_message_seen_date) {
        (Some(new), Some(current)) => new > current,
        (Some(_), None) => true,
        (None, _) => false,
    };
    if date_advanced {
        user.last_message_seen_date = seen_date;
        changed = true;
    }

    if let Some(new_id) = seen_message_id {
        let adopt = if user.last_message_seen_id.is_none() {
            true
        } else {
            match (new_id_time, current_id_time) {
                (Some(new), Some(current)) => new >= current,
                _ => date_advanced,
            }
        };
        if adopt && user.last_message_seen_id.as_deref() != Some(new_id.as_str()) {
            user.last_message_seen_id = Some(new_id);
            changed = true;
        }
    }

    changed
}

/// Move a participant's cursor to the room's newest message.
pub fn mark_read_by(room: &mut ChatRoom, user_id: &str) -> bool {
    let Some(last) = room.last_message.clone() else {
        return false;
    };
    apply_seen_update(room, user_id, Some(last.created_at), Some(last.id))
}

/// Flip the local `sent` flag once the server acknowledged the message.
pub fn mark_sent(room: &mut ChatRoom, message_id: &str) -> bool {
    let mut changed = false;
    if let Some(msg) = room.messages.iter_mut().find(|m| m.id == message_id) {
        if !msg.sent {
            msg.sent = true;
            changed = true;
        }
    }
    if changed {
        refresh_last_message(room);
    }
    changed
}

pub fn set_typing(room: &mut ChatRoom, user_id: &str, writing: bool) -> bool {
    if room.writing.get(user_id).copied().unwrap_or(false) == writing {
        return false;
    }
    room.writing.insert(user_id.to_string(), writing);
    true
}

/// Mark the start of an older-page fetch. Returns `false` (and must not
/// issue a request) when a fetch is already in flight or the history is
/// exhausted.
pub fn begin_fetch(room: &mut ChatRoom) -> bool {
    if room.pagination.loading || room.pagination.exhausted {
        return false;
    }
    room.pagination.loading = true;
    true
}

/// Apply a fetched page of older messages (ascending order), preserving
/// id-uniqueness against whatever arrived in the meantime.
pub fn complete_fetch(
    room: &mut ChatRoom,
    older: Vec<ChatRoomMessage>,
    next_cursor: Option<String>,
    exhausted: bool,
) {
    let mut merged: Vec<ChatRoomMessage> = older
        .into_iter()
        .filter(|m| !room.messages.iter().any(|existing| existing.id == m.id))
        .collect();
    merged.append(&mut room.messages);
    room.messages = merged;

    room.pagination.loading = false;
    room.pagination.cursor = next_cursor;
    room.pagination.exhausted = exhausted;
    refresh_last_message(room);
}

/// Clear the loading flag without touching the log, allowing a retry.
pub fn fail_fetch(room: &mut ChatRoom) {
    room.pagination.loading = false;
}

/// Reconcile a freshly-fetched room list with local state.
///
/// Push-ingested messages and local outbox entries may not be visible
/// server-side yet, so fetched rooms are merged into (never replace) local
/// ones: message logs union by id, participant cursors advance
/// monotonically, and rooms the server does not know about yet are kept.
pub fn merge_fetched_rooms(rooms: &mut Vec<ChatRoom>, fetched: Vec<ChatRoom>) {
    for incoming in fetched {
        match find_room_mut(rooms, &incoming.id) {
            None => rooms.push(incoming),
            Some(local) => merge_room(local, incoming),
        }
    }
    rooms.sort_by_key(|r| {
        std::cmp::Reverse(r.last_message.as_ref().map(|m| m.created_at).unwrap_or(0))
    });
}

fn merge_room(local: &mut ChatRoom, incoming: ChatRoom) {
    let mut messages = incoming.messages;
    for msg in local.messages.drain(..) {
        if !messages.iter().any(|m| m.id == msg.id) {
            messages.push(msg);
        }
    }
    // Commutative merge order: the same set of messages yields the same log
    // no matter which source delivered them first.
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    local.messages = messages;

    for user in incoming.users {
        if !local.users.iter().any(|u| u.id == user.id) {
            local.users.push(user);
            continue;
        }
        if let Some(existing) = local.users.iter_mut().find(|u| u.id == user.id) {
            existing.name = user.name.clone();
            existing.avatar = user.avatar.clone();
        }
        // Cursors only ever advance.
        apply_seen_update(
            local,
            &user.id,
            user.last_message_seen_date,
            user.last_message_seen_id,
        );
    }

    if !local.pagination.loading {
        local.pagination = incoming.pagination;
    }
    refresh_last_message(local);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> ChatRoomUser {
        ChatRoomUser {
            id: id.to_string(),
            name: id.to_string(),
            avatar: None,
            last_message_seen_date: None,
            last_message_seen_id: None,
        }
    }

    fn message(id: &str, created_at: i64) -> ChatRoomMessage {
        ChatRoomMessage {
            id: id.to_string(),
            sender: user("sender"),
            body: format!("body of {id}"),
            created_at,
            sent: true,
        }
    }

    fn room_with(messages: Vec<ChatRoomMessage>) -> ChatRoom {
        let mut room = ChatRoom::new("r1".to_string());
        room.users.push(user("u1"));
        room.messages = messages;
        refresh_last_message(&mut room);
        room
    }

    #[test]
    fn ingestion_is_idempotent() {
        let mut rooms = vec![room_with(vec![message("m1", 100)])];

        assert!(ingest_message(&mut rooms, "r1", message("m2", 200)));
        let snapshot = rooms.clone();

        // Same payload delivered again (push redelivery or fetch overlap).
        assert!(!ingest_message(&mut rooms, "r1", message("m2", 200)));
        assert_eq!(rooms, snapshot);
        assert_eq!(rooms[0].messages.len(), 2);
    }

    #[test]
    fn ingestion_updates_last_message_only_if_newer() {
        let mut rooms = vec![room_with(vec![message("m2", 200)])];

        // An older message arriving late must not move the pointer back.
        assert!(ingest_message(&mut rooms, "r1", message("m1", 100)));
        assert_eq!(rooms[0].last_message.as_ref().unwrap().id, "m2");

        assert!(ingest_message(&mut rooms, "r1", message("m3", 300)));
        assert_eq!(rooms[0].last_message.as_ref().unwrap().id, "m3");
    }

    #[test]
    fn ingestion_creates_unknown_room() {
        let mut rooms = vec![];
        assert!(ingest_message(&mut rooms, "r9", message("m1", 100)));
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, "r9");
        assert_eq!(rooms[0].users.len(), 1);
        assert_eq!(rooms[0].last_message.as_ref().unwrap().id, "m1");
    }

    #[test]
    fn notification_then_seen_update_scenario() {
        // Room with [m1@T0]; user has no cursor.
        let mut rooms = vec![room_with(vec![message("m1", 100)])];

        assert!(ingest_message(&mut rooms, "r1", message("m2", 200)));
        let room = &rooms[0];
        let ids: Vec<&str> = room.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(room.last_message.as_ref().unwrap().id, "m2");

        let m2 = room.messages[1].clone();
        let u = room.users.iter().find(|u| u.id == "u1").unwrap();
        assert!(!is_read(&m2, u));

        apply_seen_update(&mut rooms[0], "u1", Some(200), Some("m2".into()));
        let room = &rooms[0];
        let u = room.users.iter().find(|u| u.id == "u1").unwrap();
        assert!(is_read(&m2, u));
    }

    #[test]
    fn is_read_honors_either_signal() {
        let m = message("m1", 100);

        let mut by_date = user("u");
        by_date.last_message_seen_date = Some(100);
        assert!(is_read(&m, &by_date));

        let mut by_id = user("u");
        by_id.last_message_seen_id = Some("m1".into());
        assert!(is_read(&m, &by_id));

        let mut neither = user("u");
        neither.last_message_seen_date = Some(99);
        neither.last_message_seen_id = Some("m0".into());
        assert!(!is_read(&m, &neither));
    }

    #[test]
    fn seen_updates_are_monotonic() {
        let mut room = room_with(vec![message("m1", 100), message("m2", 200)]);

        assert!(apply_seen_update(&mut room, "u1", Some(200), Some("m2".into())));

        // Regressions and non-advancing replays are no-ops.
        assert!(!apply_seen_update(&mut room, "u1", Some(150), Some("m1".into())));
        assert!(!apply_seen_update(&mut room, "u1", Some(200), None));

        let u = room.users.iter().find(|u| u.id == "u1").unwrap();
        assert_eq!(u.last_message_seen_date, Some(200));
        assert_eq!(u.last_message_seen_id.as_deref(), Some("m2"));
    }

    #[test]
    fn advancing_date_does_not_smuggle_in_an_older_id() {
        let mut room = room_with(vec![message("m1", 100), message("m2", 200)]);
        assert!(apply_seen_update(&mut room, "u1", Some(150), Some("m2".into())));

        // A later date paired with an id that resolves older in the log:
        // the date advances, the id stays put.
        assert!(apply_seen_update(&mut room, "u1", Some(180), Some("m1".into())));

        let u = room.users.iter().find(|u| u.id == "u1").unwrap();
        assert_eq!(u.last_message_seen_date, Some(180));
        assert_eq!(u.last_message_seen_id.as_deref(), Some("m2"));
        assert!(is_read(&room.messages[1], u));
    }

    #[test]
    fn id_only_seen_update_adopted_when_provably_not_older() {
        let mut room = room_with(vec![message("m1", 100), message("m2", 200)]);

        assert!(apply_seen_update(&mut room, "u1", None, Some("m1".into())));
        // m2 is newer than m1 within the log, so an id-only update advances.
        assert!(apply_seen_update(&mut room, "u1", None, Some("m2".into())));
        // ...but going back to m1 does not.
        assert!(!apply_seen_update(&mut room, "u1", None, Some("m1".into())));

        let u = room.users.iter().find(|u| u.id == "u1").unwrap();
        assert_eq!(u.last_message_seen_id.as_deref(), Some("m2"));
        assert_eq!(u.last_message_seen_date, None);
    }

    #[test]
    fn mark_read_moves_cursor_to_last_message() {
        let mut room = room_with(vec![message("m1", 100), message("m2", 200)]);
        assert!(mark_read_by(&mut room, "u1"));
        let u = room.users.iter().find(|u| u.id == "u1").unwrap();
        assert_eq!(u.last_message_seen_date, Some(200));
        assert_eq!(u.last_message_seen_id.as_deref(), Some("m2"));
    }

    #[test]
    fn begin_fetch_guards_inflight_and_exhausted() {
        let mut room = room_with(vec![]);
        assert!(begin_fetch(&mut room));
        assert!(!begin_fetch(&mut room)); // already loading

        fail_fetch(&mut room);
        assert!(!room.pagination.loading);
        assert!(begin_fetch(&mut room)); // retry allowed after failure

        complete_fetch(&mut room, vec![], None, true);
        assert!(room.pagination.exhausted);
        assert!(!begin_fetch(&mut room)); // exhausted
    }

    #[test]
    fn complete_fetch_prepends_and_deduplicates() {
        let mut room = room_with(vec![message("m3", 300)]);
        assert!(begin_fetch(&mut room));

        // The page overlaps with a message that arrived via push meanwhile.
        complete_fetch(
            &mut room,
            vec![message("m1", 100), message("m2", 200), message("m3", 300)],
            Some("cursor-m1".into()),
            false,
        );

        let ids: Vec<&str> = room.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3"]);
        assert!(!room.pagination.loading);
        assert_eq!(room.pagination.cursor.as_deref(), Some("cursor-m1"));
        assert_eq!(room.last_message.as_ref().unwrap().id, "m3");
    }

    #[test]
    fn merge_fetched_keeps_local_only_data() {
        let mut rooms = vec![];
        // Push created this room before any fetch completed.
        ingest_message(&mut rooms, "r1", message("m2", 200));

        let mut fetched = room_with(vec![message("m1", 100)]);
        fetched.users.push(user("u2"));
        merge_fetched_rooms(&mut rooms, vec![fetched]);

        let room = find_room(&rooms, "r1").unwrap();
        let ids: Vec<&str> = room.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(room.last_message.as_ref().unwrap().id, "m2");
        assert!(room.users.iter().any(|u| u.id == "u2"));
    }

    #[test]
    fn merge_fetched_is_order_insensitive() {
        // fetch-then-push and push-then-fetch converge to the same log.
        let mut a = vec![];
        ingest_message(&mut a, "r1", message("m2", 200));
        merge_fetched_rooms(&mut a, vec![room_with(vec![message("m1", 100)])]);

        let mut b = vec![];
        merge_fetched_rooms(&mut b, vec![room_with(vec![message("m1", 100)])]);
        ingest_message(&mut b, "r1", message("m2", 200));

        let ids = |rooms: &[ChatRoom]| -> Vec<String> {
            find_room(rooms, "r1")
                .unwrap()
                .messages
                .iter()
                .map(|m| m.id.clone())
                .collect()
        };
        assert_eq!(ids(&a), ids(&b));
    }
}
