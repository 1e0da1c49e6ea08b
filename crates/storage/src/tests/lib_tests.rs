use super::*;
use chrono::Duration;
use shared::{domain::Mood, ephemeral::NoticeKind};

async fn memory_storage() -> Storage {
    Storage::new("sqlite::memory:").await.expect("db")
}

fn chat<'a>(room_id: RoomId, author_id: UserId, text: &'a str, token: Option<&'a ClientToken>) -> NewMessage<'a> {
    NewMessage {
        room_id,
        author_id: Some(author_id),
        author: "alice",
        text,
        time: "10:00",
        target_user_id: None,
        client_token: token,
        created_at: Utc::now(),
    }
}

fn notice<'a>(room_id: RoomId, text: &'a str, target: UserId, created_at: DateTime<Utc>) -> NewMessage<'a> {
    NewMessage {
        room_id,
        author_id: None,
        author: SYSTEM_AUTHOR,
        text,
        time: "10:00",
        target_user_id: Some(target),
        client_token: None,
        created_at,
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = memory_storage().await;
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn create_user_is_idempotent_per_username() {
    let storage = memory_storage().await;
    let first = storage.create_user("alice", Some("a.png")).await.expect("user");
    let second = storage.create_user("alice", None).await.expect("user");
    assert_eq!(first, second);
    let (name, avatar) = storage
        .user_profile(first)
        .await
        .expect("profile")
        .expect("present");
    assert_eq!(name, "alice");
    assert_eq!(avatar.as_deref(), Some("a.png"));
}

#[tokio::test]
async fn replayed_client_token_returns_the_original_row() {
    let storage = memory_storage().await;
    let alice = storage.create_user("alice", None).await.expect("user");
    let room = RoomId::Mood(Mood::Happy);
    let token = ClientToken::from("tok-1");

    let first = storage
        .append_message(chat(room, alice, "hi", Some(&token)))
        .await
        .expect("append");
    assert!(!first.is_duplicate());

    let replay = storage
        .append_message(chat(room, alice, "edited on retry", Some(&token)))
        .await
        .expect("replay");
    assert!(replay.is_duplicate());
    assert_eq!(replay.message(), first.message());
    assert_eq!(replay.message().text, "hi");

    let all = storage
        .list_room_messages(room, MessageId(0), None, Utc::now())
        .await
        .expect("list");
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn same_token_in_another_room_is_a_new_message() {
    let storage = memory_storage().await;
    let alice = storage.create_user("alice", None).await.expect("user");
    let token = ClientToken::from("tok-1");

    let happy = storage
        .append_message(chat(RoomId::Mood(Mood::Happy), alice, "hi", Some(&token)))
        .await
        .expect("happy");
    let chill = storage
        .append_message(chat(RoomId::Mood(Mood::Chill), alice, "hi", Some(&token)))
        .await
        .expect("chill");
    assert!(!chill.is_duplicate());
    assert_ne!(happy.message().id, chill.message().id);
}

#[tokio::test]
async fn tokenless_messages_are_never_deduplicated() {
    let storage = memory_storage().await;
    let alice = storage.create_user("alice", None).await.expect("user");
    let room = RoomId::Mood(Mood::Sad);
    for _ in 0..2 {
        let outcome = storage
            .append_message(chat(room, alice, "same text", None))
            .await
            .expect("append");
        assert!(!outcome.is_duplicate());
    }
    let all = storage
        .list_room_messages(room, MessageId(0), None, Utc::now())
        .await
        .expect("list");
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn since_cursor_is_exclusive_and_ordered() {
    let storage = memory_storage().await;
    let alice = storage.create_user("alice", None).await.expect("user");
    let room = RoomId::Mood(Mood::Energetic);
    let mut ids = Vec::new();
    for text in ["one", "two", "three"] {
        let outcome = storage
            .append_message(chat(room, alice, text, None))
            .await
            .expect("append");
        ids.push(outcome.message().id);
    }
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

    let tail = storage
        .list_room_messages(room, ids[0], None, Utc::now())
        .await
        .expect("list");
    let texts: Vec<_> = tail.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["two", "three"]);
    assert!(storage
        .list_room_messages(room, ids[2], None, Utc::now())
        .await
        .expect("list")
        .is_empty());
}

#[tokio::test]
async fn messages_carry_the_author_avatar() {
    let storage = memory_storage().await;
    let alice = storage.create_user("alice", Some("alice.png")).await.expect("user");
    let outcome = storage
        .append_message(chat(RoomId::Mood(Mood::Romantic), alice, "hey", None))
        .await
        .expect("append");
    assert_eq!(outcome.message().avatar.as_deref(), Some("alice.png"));
}

#[tokio::test]
async fn targeted_messages_are_hidden_from_other_viewers() {
    let storage = memory_storage().await;
    let alice = storage.create_user("alice", None).await.expect("user");
    let bob = storage.create_user("bob", None).await.expect("user");
    let carol = storage.create_user("carol", None).await.expect("user");
    let room = storage
        .get_or_create_private_room(alice, bob, Utc::now())
        .await
        .expect("room");
    let room_id = RoomId::from(room.id);
    let text = NoticeKind::ChatRequestAccepted.render("bob");
    storage
        .append_message(notice(room_id, &text, alice, Utc::now()))
        .await
        .expect("notice");

    let for_alice = storage
        .list_room_messages(room_id, MessageId(0), Some(alice), Utc::now())
        .await
        .expect("list");
    assert_eq!(for_alice.len(), 1);
    let for_carol = storage
        .list_room_messages(room_id, MessageId(0), Some(carol), Utc::now())
        .await
        .expect("list");
    assert!(for_carol.is_empty());
}

#[tokio::test]
async fn ephemeral_notices_disappear_after_two_minutes() {
    let storage = memory_storage().await;
    let alice = storage.create_user("alice", None).await.expect("user");
    let bob = storage.create_user("bob", None).await.expect("user");
    let room = storage
        .get_or_create_private_room(alice, bob, Utc::now())
        .await
        .expect("room");
    let room_id = RoomId::from(room.id);
    let created = Utc::now();
    let text = NoticeKind::ChatRequestSent.render("alice");
    storage
        .append_message(notice(room_id, &text, bob, created))
        .await
        .expect("notice");

    let at_119 = storage
        .list_room_messages(room_id, MessageId(0), Some(bob), created + Duration::seconds(119))
        .await
        .expect("list");
    assert_eq!(at_119.len(), 1);

    let at_121 = storage
        .list_room_messages(room_id, MessageId(0), Some(bob), created + Duration::seconds(121))
        .await
        .expect("list");
    assert!(at_121.is_empty());
}

#[tokio::test]
async fn live_system_notice_ignores_expired_rows() {
    let storage = memory_storage().await;
    let alice = storage.create_user("alice", None).await.expect("user");
    let bob = storage.create_user("bob", None).await.expect("user");
    let room = storage
        .get_or_create_private_room(alice, bob, Utc::now())
        .await
        .expect("room");
    let room_id = RoomId::from(room.id);
    let created = Utc::now();
    let text = NoticeKind::ChatRequestSent.render("alice");
    storage
        .append_message(notice(room_id, &text, bob, created))
        .await
        .expect("notice");

    let live = storage
        .live_system_notice(room_id, &text, Some(bob), created + Duration::seconds(30))
        .await
        .expect("lookup");
    assert!(live.is_some());
    let stale = storage
        .live_system_notice(room_id, &text, Some(bob), created + Duration::seconds(200))
        .await
        .expect("lookup");
    assert!(stale.is_none());
    let other_target = storage
        .live_system_notice(room_id, &text, Some(alice), created)
        .await
        .expect("lookup");
    assert!(other_target.is_none());
}

#[tokio::test]
async fn undelivered_messages_drain_after_ack() {
    let storage = memory_storage().await;
    let alice = storage.create_user("alice", None).await.expect("user");
    let bob = storage.create_user("bob", Some("bob.png")).await.expect("user");
    let room = storage
        .get_or_create_private_room(alice, bob, Utc::now())
        .await
        .expect("room");
    let room_id = RoomId::from(room.id);

    let mut sent = Vec::new();
    for text in ["first", "second"] {
        let outcome = storage
            .append_message(chat(room_id, alice, text, None))
            .await
            .expect("append");
        storage
            .record_pending_deliveries(outcome.message().id, &[bob])
            .await
            .expect("ledger");
        sent.push(outcome.message().id);
    }

    let pending = storage.undelivered_for(bob, Utc::now()).await.expect("undelivered");
    assert_eq!(pending.iter().map(|m| m.id).collect::<Vec<_>>(), sent);
    assert!(storage
        .undelivered_for(alice, Utc::now())
        .await
        .expect("undelivered")
        .is_empty());

    let count = storage
        .mark_delivered_many(bob, &sent, Utc::now())
        .await
        .expect("ack");
    assert_eq!(count, 2);
    let again = storage
        .mark_delivered_many(bob, &sent, Utc::now())
        .await
        .expect("ack");
    assert_eq!(again, 0);
    assert!(storage
        .undelivered_for(bob, Utc::now())
        .await
        .expect("undelivered")
        .is_empty());
}

#[tokio::test]
async fn replayed_ledger_entries_stay_delivered() {
    let storage = memory_storage().await;
    let alice = storage.create_user("alice", None).await.expect("user");
    let bob = storage.create_user("bob", None).await.expect("user");
    let room = storage
        .get_or_create_private_room(alice, bob, Utc::now())
        .await
        .expect("room");
    let message = storage
        .append_message(chat(RoomId::from(room.id), alice, "hi", None))
        .await
        .expect("append")
        .into_message();
    storage
        .record_pending_deliveries(message.id, &[bob])
        .await
        .expect("ledger");
    assert!(storage
        .mark_delivered(message.id, bob, Utc::now())
        .await
        .expect("deliver"));
    storage
        .record_pending_deliveries(message.id, &[bob])
        .await
        .expect("ledger replay");
    assert!(storage
        .undelivered_for(bob, Utc::now())
        .await
        .expect("undelivered")
        .is_empty());
}

#[tokio::test]
async fn expired_notices_are_closed_instead_of_returned() {
    let storage = memory_storage().await;
    let alice = storage.create_user("alice", None).await.expect("user");
    let bob = storage.create_user("bob", None).await.expect("user");
    let room = storage
        .get_or_create_private_room(alice, bob, Utc::now())
        .await
        .expect("room");
    let created = Utc::now() - Duration::seconds(300);
    let text = NoticeKind::ChatRequestSent.render("alice");
    let stale = storage
        .append_message(notice(RoomId::from(room.id), &text, bob, created))
        .await
        .expect("notice")
        .into_message();
    storage
        .record_pending_deliveries(stale.id, &[bob])
        .await
        .expect("ledger");

    assert!(storage
        .undelivered_for(bob, Utc::now())
        .await
        .expect("undelivered")
        .is_empty());
    let reopened = storage
        .mark_delivered(stale.id, bob, Utc::now())
        .await
        .expect("deliver");
    assert!(!reopened, "entry should already be closed");
}

#[tokio::test]
async fn private_room_is_shared_by_the_unordered_pair() {
    let storage = memory_storage().await;
    let alice = storage.create_user("alice", None).await.expect("user");
    let bob = storage.create_user("bob", None).await.expect("user");
    let carol = storage.create_user("carol", None).await.expect("user");

    let forward = storage
        .get_or_create_private_room(alice, bob, Utc::now())
        .await
        .expect("room");
    let backward = storage
        .get_or_create_private_room(bob, alice, Utc::now())
        .await
        .expect("room");
    assert_eq!(forward.id, backward.id);
    assert!(forward.has_member(alice));
    assert_eq!(forward.peer_of(bob), Some(alice));
    assert_eq!(forward.peer_of(carol), None);

    let other = storage
        .get_or_create_private_room(alice, carol, Utc::now())
        .await
        .expect("room");
    assert_ne!(other.id, forward.id);
}

#[tokio::test]
async fn chat_requests_move_through_their_statuses() {
    let storage = memory_storage().await;
    let alice = storage.create_user("alice", Some("a.png")).await.expect("user");
    let bob = storage.create_user("bob", None).await.expect("user");

    let id = storage
        .insert_chat_request(alice, bob, Utc::now())
        .await
        .expect("request");
    let pending = storage.pending_chat_requests_for(bob).await.expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].requester_username, "alice");
    assert_eq!(pending[0].requester_avatar.as_deref(), Some("a.png"));

    storage
        .set_chat_request_status(id, ChatRequestStatus::Rejected, Utc::now())
        .await
        .expect("reject");
    assert!(storage
        .pending_chat_requests_for(bob)
        .await
        .expect("pending")
        .is_empty());

    let between = storage
        .chat_request_between(bob, alice)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(between.id, id);

    storage
        .reset_chat_request(id, bob, alice, Utc::now())
        .await
        .expect("reset");
    let reset = storage.chat_request(id).await.expect("load").expect("present");
    assert_eq!(reset.status, ChatRequestStatus::Pending);
    assert_eq!(reset.requester_id, bob);
    assert_eq!(reset.requested_id, alice);
}

#[tokio::test]
async fn hearts_upsert_then_read_then_clear() {
    let storage = memory_storage().await;
    let alice = storage.create_user("alice", None).await.expect("user");
    let bob = storage.create_user("bob", None).await.expect("user");

    let first = storage.upsert_heart(alice, bob, Utc::now()).await.expect("heart");
    assert_eq!(storage.mark_hearts_read(bob).await.expect("read"), 1);
    let second = storage.upsert_heart(alice, bob, Utc::now()).await.expect("heart");
    assert_eq!(first, second);

    let hearts = storage.list_hearts(bob).await.expect("list");
    assert_eq!(hearts.len(), 1);
    assert!(!hearts[0].is_read);
    assert_eq!(hearts[0].sender_username, "alice");

    assert_eq!(storage.clear_hearts(bob).await.expect("clear"), 1);
    assert!(storage.list_hearts(bob).await.expect("list").is_empty());
}
