use std::sync::Arc;
use std::time::Duration;

use mealsync_chat::client::{ChatSession, LocalLink, OwnerConsole, SessionUpdate};
use mealsync_chat::gateway::{GatewayHandle, ServerEvent};
use mealsync_chat::models::{NewRoom, RoomFilter, Sender};
use mealsync_chat::service::{ChatService, SendRequest};
use mealsync_chat::store::MemoryStore;
use mealsync_chat::uploads::MemoryUpload;

type Session = ChatSession<ChatService, LocalLink>;
type Console = OwnerConsole<ChatService, LocalLink>;

fn service() -> ChatService {
    ChatService::new(
        Arc::new(MemoryStore::new()),
        GatewayHandle::spawn(),
        Arc::new(MemoryUpload::new()),
        "rest-1",
    )
}

fn link(service: &ChatService) -> LocalLink {
    LocalLink::new(service.gateway().clone())
}

fn customer(service: &ChatService) -> Session {
    ChatSession::new(service.clone(), link(service), Sender::Customer)
}

async fn owner(service: &ChatService) -> Console {
    OwnerConsole::start(service.clone(), link(service), RoomFilter::for_restaurant("rest-1"))
        .await
        .unwrap()
}

fn room_for(product: &str, email: &str) -> NewRoom {
    NewRoom::for_customer(product, "Burger", "Ann", email, "rest-1")
}

/// Pull console updates until a notification has been applied.
async fn next_notification(console: &mut Console) {
    loop {
        let update = tokio::time::timeout(Duration::from_secs(1), console.next_update())
            .await
            .expect("no notification arrived")
            .unwrap();
        if matches!(update, SessionUpdate::Notification(_)) {
            return;
        }
    }
}

#[tokio::test]
async fn customer_asks_owner_answers() {
    let service = service();
    let mut owner = owner(&service).await;
    let mut customer = customer(&service);

    customer.open_for_customer(&room_for("p1", "a@x.com")).await.unwrap();
    assert_eq!(customer.room().unwrap().room_id, "p1-a@x.com");
    customer.send("Is this in stock?").await.unwrap();

    next_notification(&mut owner).await;
    assert_eq!(owner.unread_count(), 1);
    assert_eq!(owner.rooms()[0].room_id, "p1-a@x.com");
    assert_eq!(service.unread_count(&RoomFilter::default()).await.unwrap(), 1);

    let history = owner.open_room("p1-a@x.com").await.unwrap().to_vec();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content.as_deref(), Some("Is this in stock?"));
    assert_eq!(owner.unread_count(), 0);
    assert_eq!(service.unread_count(&RoomFilter::default()).await.unwrap(), 0);

    owner.reply("Yes!").await.unwrap();

    // customer: own message first, then the reply
    let SessionUpdate::Appended(own) = customer.next_update().await.unwrap() else {
        panic!("expected own message relay");
    };
    assert_eq!(own.sender, Sender::Customer);
    let SessionUpdate::Appended(reply) = customer.next_update().await.unwrap() else {
        panic!("expected owner reply relay");
    };
    assert_eq!(reply.sender, Sender::Owner);
    assert_eq!(reply.content.as_deref(), Some("Yes!"));

    // owner replies never mark the room unread
    assert_eq!(service.unread_count(&RoomFilter::default()).await.unwrap(), 0);
}

#[tokio::test]
async fn unread_counts_rooms_not_messages() {
    let service = service();
    let mut owner = owner(&service).await;

    let rooms = [
        ("p1-a@x.com", room_for("p1", "a@x.com")),
        ("p1-b@x.com", room_for("p1", "b@x.com")),
        ("p2-a@x.com", room_for("p2", "a@x.com")),
    ];
    for (_, room) in &rooms {
        service.get_or_create_room(room).await.unwrap();
    }
    for room_id in ["p1-a@x.com", "p1-a@x.com", "p1-b@x.com", "p1-b@x.com", "p2-a@x.com"] {
        service
            .send(SendRequest::text(room_id, Sender::Customer, "hello?"))
            .await
            .unwrap();
    }
    for _ in 0..5 {
        next_notification(&mut owner).await;
    }
    assert_eq!(owner.unread_count(), 3);

    owner.open_room("p1-b@x.com").await.unwrap();
    assert_eq!(owner.unread_count(), 2);

    // server agrees after a fresh listing
    owner.refresh().await.unwrap();
    assert_eq!(owner.unread_count(), 2);

    assert_eq!(owner.mark_all_read().await.unwrap(), 2);
    assert_eq!(owner.unread_count(), 0);
    assert_eq!(service.unread_count(&RoomFilter::default()).await.unwrap(), 0);
}

#[tokio::test]
async fn both_participants_see_the_same_order() {
    let service = service();
    let mut owner = owner(&service).await;
    let mut customer = customer(&service);

    customer.open_for_customer(&room_for("p1", "a@x.com")).await.unwrap();
    owner.refresh().await.unwrap();
    owner.open_room("p1-a@x.com").await.unwrap();

    for i in 0..3 {
        customer.send(&format!("c{i}")).await.unwrap();
        owner.reply(&format!("o{i}")).await.unwrap();
    }

    while customer.messages().len() < 6 {
        customer.next_update().await.unwrap();
    }
    while owner.messages().len() < 6 {
        owner.next_update().await.unwrap();
    }

    let ids = |messages: &[mealsync_chat::models::Message]| {
        messages.iter().map(|m| m.message_id).collect::<Vec<_>>()
    };
    let persisted = service.history("p1-a@x.com").await.unwrap();
    assert_eq!(ids(customer.messages()), ids(&persisted));
    assert_eq!(ids(owner.messages()), ids(&persisted));
}

#[tokio::test]
async fn deleted_room_comes_back_on_next_customer_message() {
    let service = service();
    let mut owner = owner(&service).await;
    let mut customer = customer(&service);

    customer.open_for_customer(&room_for("p1", "a@x.com")).await.unwrap();
    owner.refresh().await.unwrap();
    owner.delete_room("p1-a@x.com").await.unwrap();
    assert!(owner.rooms().is_empty());
    assert!(service.list_rooms(&RoomFilter::default()).await.unwrap().is_empty());

    customer.send("still there?").await.unwrap();
    next_notification(&mut owner).await;
    assert_eq!(owner.rooms().len(), 1);
    assert_eq!(owner.unread_count(), 1);

    owner.refresh().await.unwrap();
    assert_eq!(owner.rooms()[0].room_id, "p1-a@x.com");
}

#[tokio::test]
async fn notification_for_unlisted_room_adds_it() {
    let service = service();
    let mut owner = owner(&service).await;
    assert!(owner.rooms().is_empty());

    let room = room_for("p9", "new@x.com");
    service
        .send(
            SendRequest::text(room.room_id.clone(), Sender::Customer, "first contact")
                .with_context((&room).into()),
        )
        .await
        .unwrap();

    next_notification(&mut owner).await;
    let listed = &owner.rooms()[0];
    assert_eq!(listed.room_id, "p9-new@x.com");
    assert_eq!(listed.customer_email, "new@x.com");
    assert!(owner.is_unread("p9-new@x.com"));
}

#[tokio::test]
async fn admin_relay_reaches_every_owner_tab() {
    let service = service();
    let mut tabs = Vec::new();
    for _ in 0..3 {
        let conn = service.gateway().connect().await.unwrap();
        service.gateway().subscribe_admin(conn.id).await.unwrap();
        // each tab has a different room open
        service.gateway().join(conn.id, format!("other-{}", tabs.len())).await.unwrap();
        tabs.push(conn);
    }

    let room = room_for("p1", "a@x.com");
    service.get_or_create_room(&room).await.unwrap();
    service
        .send(SendRequest::text(room.room_id.clone(), Sender::Customer, "hi"))
        .await
        .unwrap();

    for conn in &mut tabs {
        match conn.events.recv().await.unwrap() {
            ServerEvent::NewMessageNotification(p) => assert_eq!(p.room_id, "p1-a@x.com"),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
