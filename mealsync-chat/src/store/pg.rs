use async_trait::async_trait;
use chrono::Utc;
use diesel::dsl::count_star;
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use uuid::Uuid;

use super::{prepare_append, AppendMode, MessageStore, RoomDirectory};
use crate::error::{ChatError, ChatResult};
use crate::models::{ChatRoom, Message, MessageRow, NewMessage, NewMessageRow, NewRoom, RoomFilter, Sender};
use crate::schema::{chat_messages, chat_rooms};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_pool(database_url: &str, max_size: u32) -> ChatResult<DbPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size)
        .test_on_check_out(true)
        .build(manager)?;

    tracing::info!(max_size, "database connection pool created");
    Ok(pool)
}

/// PostgreSQL-backed directory and message log.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

type RoomQuery<'a> = chat_rooms::BoxedQuery<'a, Pg>;

/// Non-deleted rooms matching the filter.
fn visible_rooms(filter: &RoomFilter) -> RoomQuery<'static> {
    let mut query = chat_rooms::table
        .filter(chat_rooms::is_deleted.eq(false))
        .into_boxed();
    if let Some(restaurant_id) = &filter.restaurant_id {
        query = query.filter(chat_rooms::restaurant_id.eq(restaurant_id.clone()));
    }
    if let Some(needle) = filter.needle() {
        let pattern = format!("%{needle}%");
        query = query.filter(
            chat_rooms::customer_name
                .ilike(pattern.clone())
                .or(chat_rooms::customer_email.ilike(pattern.clone()))
                .or(chat_rooms::product_name.ilike(pattern)),
        );
    }
    query
}

fn upsert_room(conn: &mut PgConnection, room: &NewRoom) -> ChatResult<ChatRoom> {
    let room = diesel::insert_into(chat_rooms::table)
        .values(room)
        .on_conflict(chat_rooms::room_id)
        .do_update()
        .set(chat_rooms::is_deleted.eq(false))
        .returning(ChatRoom::as_returning())
        .get_result(conn)?;
    Ok(room)
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Run blocking diesel work off the async runtime.
    async fn run<T, F>(&self, work: F) -> ChatResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> ChatResult<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            work(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl RoomDirectory for PgStore {
    async fn list_rooms(&self, filter: &RoomFilter) -> ChatResult<Vec<ChatRoom>> {
        let filter = filter.clone();
        self.run(move |conn| {
            let mut rooms = visible_rooms(&filter)
                .select(ChatRoom::as_select())
                .load::<ChatRoom>(conn)?;
            rooms.sort_by(|a, b| b.activity_at().cmp(&a.activity_at()));
            Ok(rooms)
        })
        .await
    }

    async fn get_room(&self, room_id: &str) -> ChatResult<ChatRoom> {
        let room_id = room_id.to_string();
        self.run(move |conn| {
            chat_rooms::table
                .find(&room_id)
                .select(ChatRoom::as_select())
                .first(conn)
                .optional()?
                .ok_or_else(|| ChatError::room_not_found(room_id))
        })
        .await
    }

    async fn get_or_create_room(&self, room: &NewRoom) -> ChatResult<ChatRoom> {
        room.validate()?;
        let room = room.clone();
        self.run(move |conn| upsert_room(conn, &room)).await
    }

    async fn mark_read(&self, room_id: &str) -> ChatResult<()> {
        let room_id = room_id.to_string();
        self.run(move |conn| {
            let updated = diesel::update(chat_rooms::table.find(&room_id))
                .set(chat_rooms::is_read.eq(true))
                .execute(conn)?;
            if updated == 0 {
                return Err(ChatError::room_not_found(room_id));
            }
            Ok(())
        })
        .await
    }

    async fn mark_all_read(&self, room_ids: &[String]) -> ChatResult<usize> {
        let mut room_ids = room_ids.to_vec();
        room_ids.sort();
        room_ids.dedup();
        self.run(move |conn| {
            conn.transaction::<_, ChatError, _>(|conn| {
                let existing: Vec<String> = chat_rooms::table
                    .filter(chat_rooms::room_id.eq_any(&room_ids))
                    .select(chat_rooms::room_id)
                    .for_update()
                    .load(conn)?;
                if let Some(missing) = room_ids.iter().find(|id| !existing.contains(id)) {
                    return Err(ChatError::room_not_found(missing.clone()));
                }
                let changed = diesel::update(
                    chat_rooms::table
                        .filter(chat_rooms::room_id.eq_any(&room_ids))
                        .filter(chat_rooms::is_read.eq(false)),
                )
                .set(chat_rooms::is_read.eq(true))
                .execute(conn)?;
                Ok(changed)
            })
        })
        .await
    }

    async fn soft_delete_room(&self, room_id: &str) -> ChatResult<()> {
        let room_id = room_id.to_string();
        self.run(move |conn| {
            let updated = diesel::update(chat_rooms::table.find(&room_id))
                .set(chat_rooms::is_deleted.eq(true))
                .execute(conn)?;
            if updated == 0 {
                return Err(ChatError::room_not_found(room_id));
            }
            Ok(())
        })
        .await
    }

    async fn unread_count(&self, filter: &RoomFilter) -> ChatResult<u64> {
        let filter = filter.clone();
        self.run(move |conn| {
            let count: i64 = visible_rooms(&filter)
                .filter(chat_rooms::is_read.eq(false))
                .select(count_star())
                .first(conn)?;
            Ok(count as u64)
        })
        .await
    }

    async fn health_check(&self) -> ChatResult<()> {
        self.run(|conn| {
            diesel::sql_query("SELECT 1").execute(conn)?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl MessageStore for PgStore {
    async fn append(&self, message: NewMessage, mode: AppendMode) -> ChatResult<Message> {
        let message = prepare_append(message, &mode)?;
        self.run(move |conn| {
            conn.transaction::<_, ChatError, _>(|conn| {
                match &mode {
                    AppendMode::Strict => {
                        let exists = chat_rooms::table
                            .find(&message.room_id)
                            .select(chat_rooms::room_id)
                            .first::<String>(conn)
                            .optional()?;
                        if exists.is_none() {
                            return Err(ChatError::room_not_found(message.room_id.clone()));
                        }
                    }
                    AppendMode::UpsertRoom(room) => {
                        upsert_room(conn, room)?;
                    }
                }

                let created_at = Utc::now();
                let row = NewMessageRow {
                    message_id: Uuid::now_v7(),
                    room_id: &message.room_id,
                    sender: message.sender.as_str(),
                    content: message.content.as_deref(),
                    attachment: message.attachment.as_deref(),
                    kind: message.kind().as_str(),
                    nonce: message.nonce,
                    created_at,
                };
                let inserted: MessageRow = diesel::insert_into(chat_messages::table)
                    .values(&row)
                    .returning(MessageRow::as_returning())
                    .get_result(conn)?;

                diesel::update(chat_rooms::table.find(&message.room_id))
                    .set((
                        chat_rooms::last_message_at.eq(Some(created_at)),
                        chat_rooms::is_deleted.eq(false),
                    ))
                    .execute(conn)?;
                if message.sender == Sender::Customer {
                    diesel::update(chat_rooms::table.find(&message.room_id))
                        .set(chat_rooms::is_read.eq(false))
                        .execute(conn)?;
                }

                Message::try_from(inserted)
            })
        })
        .await
    }

    async fn history(&self, room_id: &str) -> ChatResult<Vec<Message>> {
        let room_id = room_id.to_string();
        self.run(move |conn| {
            let rows = chat_messages::table
                .filter(chat_messages::room_id.eq(&room_id))
                .filter(chat_messages::is_deleted.eq(false))
                .order((chat_messages::created_at.asc(), chat_messages::message_id.asc()))
                .select(MessageRow::as_select())
                .load::<MessageRow>(conn)?;
            rows.into_iter().map(Message::try_from).collect()
        })
        .await
    }

    async fn soft_delete_message(&self, message_id: Uuid) -> ChatResult<Message> {
        self.run(move |conn| {
            let row = diesel::update(chat_messages::table.find(message_id))
                .set(chat_messages::is_deleted.eq(true))
                .returning(MessageRow::as_returning())
                .get_result::<MessageRow>(conn)
                .optional()?
                .ok_or_else(|| ChatError::message_not_found(message_id))?;
            Message::try_from(row)
        })
        .await
    }
}
