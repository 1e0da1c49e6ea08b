use super::*;
use shared::domain::{Mood, PrivateRoomId};

fn typing(user: i64) -> ServerEvent {
    ServerEvent::UserTyping {
        user_id: UserId(user),
        username: format!("user{user}"),
    }
}

fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn joining_a_new_room_leaves_the_previous_one() {
    let broker = Broker::new(8);
    let (conn, _rx) = broker.connect().await;
    let happy = RoomId::Mood(Mood::Happy);
    let chill = RoomId::Mood(Mood::Chill);

    assert_eq!(broker.join_room(conn, happy, Some(UserId(1))).await, None);
    assert_eq!(broker.join_room(conn, chill, None).await, Some(happy));
    assert_eq!(broker.room_size(happy).await, 0);
    assert_eq!(broker.room_size(chill).await, 1);
    assert_eq!(broker.current_room(conn).await, Some(chill));
    assert_eq!(broker.user_connection_count(UserId(1)).await, 1);
}

#[tokio::test]
async fn room_broadcast_skips_the_sender() {
    let broker = Broker::new(8);
    let room = RoomId::Mood(Mood::Sad);
    let (a, mut rx_a) = broker.connect().await;
    let (b, mut rx_b) = broker.connect().await;
    broker.join_room(a, room, Some(UserId(1))).await;
    broker.join_room(b, room, Some(UserId(2))).await;

    broker.broadcast_room(room, &typing(1), Some(a)).await;
    assert!(drain(&mut rx_a).is_empty());
    assert_eq!(drain(&mut rx_b), vec![typing(1)]);
}

#[tokio::test]
async fn user_entry_survives_until_its_last_connection_goes() {
    let broker = Broker::new(8);
    let (first, _rx1) = broker.connect().await;
    let (second, _rx2) = broker.connect().await;
    broker.register_user(first, UserId(5)).await;
    broker.register_user(second, UserId(5)).await;
    assert_eq!(broker.user_connection_count(UserId(5)).await, 2);

    broker.disconnect(first).await;
    assert_eq!(broker.user_connection_count(UserId(5)).await, 1);
    broker.disconnect(second).await;
    assert_eq!(broker.user_connection_count(UserId(5)).await, 0);
}

#[tokio::test]
async fn disconnect_announces_user_left_to_the_room() {
    let broker = Broker::new(8);
    let room = RoomId::Mood(Mood::Energetic);
    let (leaver, _rx) = broker.connect().await;
    let (stayer, mut rx_stayer) = broker.connect().await;
    broker.join_room(leaver, room, Some(UserId(1))).await;
    broker.join_room(stayer, room, Some(UserId(2))).await;

    broker.disconnect(leaver).await;
    assert_eq!(
        drain(&mut rx_stayer),
        vec![ServerEvent::UserLeft { user_id: UserId(1) }]
    );
    assert_eq!(broker.room_size(room).await, 1);
}

#[tokio::test]
async fn publish_delivers_each_event_once_per_connection() {
    let broker = Broker::new(8);
    let room = RoomId::Private(PrivateRoomId(42));
    let (in_room, mut rx_in_room) = broker.connect().await;
    let (elsewhere, mut rx_elsewhere) = broker.connect().await;
    broker.join_room(in_room, room, Some(UserId(1))).await;
    broker
        .join_room(elsewhere, RoomId::Mood(Mood::Happy), Some(UserId(2)))
        .await;

    let event = typing(9);
    broker
        .publish(&[
            Outbound {
                audience: Audience::Room(room),
                event: event.clone(),
            },
            Outbound {
                audience: Audience::User(UserId(1)),
                event: event.clone(),
            },
            Outbound {
                audience: Audience::User(UserId(2)),
                event: event.clone(),
            },
        ])
        .await;

    assert_eq!(drain(&mut rx_in_room), vec![event.clone()]);
    assert_eq!(drain(&mut rx_elsewhere), vec![event]);
}

#[tokio::test]
async fn full_queues_drop_events_instead_of_blocking() {
    let broker = Broker::new(1);
    let (conn, mut rx) = broker.connect().await;
    broker.send_to(conn, typing(1)).await;
    broker.send_to(conn, typing(2)).await;
    assert_eq!(drain(&mut rx), vec![typing(1)]);
}
