//! PgStore against a real database. Runs only when `TEST_DATABASE_URL` is set;
//! each test works in its own schema, dropped afterwards.

use diesel::connection::SimpleConnection;
use diesel::{Connection, PgConnection};
use uuid::Uuid;

use mealsync_chat::error::ChatError;
use mealsync_chat::models::{NewMessage, NewRoom, RoomFilter, Sender};
use mealsync_chat::store::{pg, AppendMode, MessageStore, PgStore, RoomDirectory};

const MIGRATION: &str = include_str!("../migrations/2025-01-01-000000_create_chat/up.sql");

struct TestDb {
    admin_url: String,
    schema: String,
    store: PgStore,
}

impl TestDb {
    fn setup() -> Option<Self> {
        let Ok(admin_url) = std::env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set, skipping postgres store test");
            return None;
        };
        let schema = format!("chat_test_{}", Uuid::new_v4().simple());
        let mut admin = PgConnection::establish(&admin_url).unwrap();
        admin.batch_execute(&format!("CREATE SCHEMA {schema}")).unwrap();

        let sep = if admin_url.contains('?') { '&' } else { '?' };
        let scoped_url = format!("{admin_url}{sep}options=-csearch_path%3D{schema}");
        let mut conn = PgConnection::establish(&scoped_url).unwrap();
        conn.batch_execute(MIGRATION).unwrap();

        let pool = pg::create_pool(&scoped_url, 2).unwrap();
        Some(Self { admin_url, schema, store: PgStore::new(pool) })
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        if let Ok(mut admin) = PgConnection::establish(&self.admin_url) {
            let _ = admin.batch_execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema));
        }
    }
}

fn room(product: &str, email: &str) -> NewRoom {
    NewRoom::for_customer(product, "Burger", "Ann", email, "rest-1")
}

#[tokio::test]
async fn upsert_is_idempotent_and_resurrects() {
    let Some(db) = TestDb::setup() else { return };
    let r = room("p1", "a@x.com");

    let first = db.store.get_or_create_room(&r).await.unwrap();
    let second = db.store.get_or_create_room(&r).await.unwrap();
    assert_eq!(first.created_at, second.created_at);
    assert_eq!(db.store.list_rooms(&RoomFilter::default()).await.unwrap().len(), 1);

    db.store.soft_delete_room(&r.room_id).await.unwrap();
    assert!(db.store.list_rooms(&RoomFilter::default()).await.unwrap().is_empty());

    db.store
        .append(
            NewMessage::text(&r.room_id, Sender::Customer, "still there?"),
            AppendMode::UpsertRoom(r.clone()),
        )
        .await
        .unwrap();
    let listed = db.store.list_rooms(&RoomFilter::for_restaurant("rest-1")).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(!listed[0].is_read);
    assert!(listed[0].last_message_at.is_some());
}

#[tokio::test]
async fn mark_all_read_rolls_back_on_unknown_room() {
    let Some(db) = TestDb::setup() else { return };
    let a = room("p1", "a@x.com");
    let b = room("p2", "b@x.com");
    db.store.get_or_create_room(&a).await.unwrap();
    db.store.get_or_create_room(&b).await.unwrap();
    let filter = RoomFilter::default();

    let err = db
        .store
        .mark_all_read(&[a.room_id.clone(), "ghost".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
    assert_eq!(db.store.unread_count(&filter).await.unwrap(), 2);

    let marked = db
        .store
        .mark_all_read(&[a.room_id.clone(), b.room_id.clone(), a.room_id.clone()])
        .await
        .unwrap();
    assert_eq!(marked, 2);
    assert_eq!(db.store.unread_count(&filter).await.unwrap(), 0);
}

#[tokio::test]
async fn history_is_ordered_and_hides_deleted() {
    let Some(db) = TestDb::setup() else { return };
    let r = room("p1", "a@x.com");
    db.store.get_or_create_room(&r).await.unwrap();

    let mut sent = Vec::new();
    for i in 0..5 {
        let sender = if i % 2 == 0 { Sender::Customer } else { Sender::Owner };
        let m = db
            .store
            .append(NewMessage::text(&r.room_id, sender, format!("m{i}")), AppendMode::Strict)
            .await
            .unwrap();
        sent.push(m);
    }
    db.store.soft_delete_message(sent[1].message_id).await.unwrap();

    let history = db.store.history(&r.room_id).await.unwrap();
    let bodies: Vec<_> = history.iter().filter_map(|m| m.content.as_deref()).collect();
    assert_eq!(bodies, ["m0", "m2", "m3", "m4"]);
    assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));

    let err = db
        .store
        .append(NewMessage::text("ghost", Sender::Owner, "hi"), AppendMode::Strict)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::NotFound(_)));
}
