//! SQLite implementation of [`ConversationStore`].

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use super::ConversationStore;
use crate::entities::{
    Conversation, ConversationSummary, Listing, ListingSummary, Message, Participant,
    ParticipantPair, ThreadKey,
};
use crate::types::{ConversationError, ConversationResult};

const MESSAGE_SELECT: &str = "SELECT m.id, m.public_id, m.conversation_id, c.public_id AS conversation_public_id,
        m.sender_id, u.public_id AS sender_public_id, m.content, m.is_read, m.created_at
     FROM messages m
     JOIN conversations c ON c.id = m.conversation_id
     JOIN users u ON u.id = m.sender_id";

const CONVERSATION_SELECT: &str = "SELECT id, public_id, listing_id, participant_low, participant_high, created_at, last_message_at
     FROM conversations";

#[derive(Clone)]
pub struct SqliteConversationStore {
    pool: SqlitePool,
}

impl SqliteConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Fixed width timestamps so `last_message_at` sorts lexically.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversation_from_row(row: &SqliteRow) -> ConversationResult<Conversation> {
    let low: i64 = row.try_get("participant_low")?;
    let high: i64 = row.try_get("participant_high")?;
    let participants = ParticipantPair::new(low, high)
        .ok_or_else(|| ConversationError::internal("conversation has a single participant"))?;

    Ok(Conversation {
        id: row.try_get("id")?,
        public_id: row.try_get("public_id")?,
        listing_id: row.try_get("listing_id")?,
        participants,
        created_at: row.try_get("created_at")?,
        last_message_at: row.try_get("last_message_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> ConversationResult<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        public_id: row.try_get("public_id")?,
        conversation_id: row.try_get("conversation_id")?,
        conversation_public_id: row.try_get("conversation_public_id")?,
        sender_id: row.try_get("sender_id")?,
        sender_public_id: row.try_get("sender_public_id")?,
        content: row.try_get("content")?,
        read: row.try_get("is_read")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Insert a message and bump the conversation's activity on an open
/// transaction. The insert goes first so the transaction takes the write lock
/// up front.
async fn insert_message(
    conn: &mut SqliteConnection,
    conversation: &Conversation,
    sender_id: i64,
    content: &str,
    now: &str,
) -> ConversationResult<Message> {
    let public_id = cuid2::create_id();

    let id = sqlx::query(
        "INSERT INTO messages (public_id, conversation_id, sender_id, content, is_read, created_at)
         VALUES (?, ?, ?, ?, 0, ?)",
    )
    .bind(&public_id)
    .bind(conversation.id)
    .bind(sender_id)
    .bind(content)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    sqlx::query("UPDATE conversations SET last_message_at = ? WHERE id = ?")
        .bind(now)
        .bind(conversation.id)
        .execute(&mut *conn)
        .await?;

    let sender_public_id: String = sqlx::query_scalar("SELECT public_id FROM users WHERE id = ?")
        .bind(sender_id)
        .fetch_one(&mut *conn)
        .await?;

    debug!(
        message_id = id,
        conversation_id = conversation.id,
        sender_id,
        "stored message"
    );

    Ok(Message {
        id,
        public_id,
        conversation_id: conversation.id,
        conversation_public_id: conversation.public_id.clone(),
        sender_id,
        sender_public_id,
        content: content.to_owned(),
        read: false,
        created_at: now.to_owned(),
    })
}

fn summary_from_row(row: &SqliteRow) -> ConversationResult<ConversationSummary> {
    let conversation_id: i64 = row.try_get("id")?;
    let conversation_public_id: String = row.try_get("public_id")?;

    let last_message = match row.try_get::<Option<i64>, _>("message_id")? {
        Some(message_id) => Some(Message {
            id: message_id,
            public_id: row.try_get("message_public_id")?,
            conversation_id,
            conversation_public_id: conversation_public_id.clone(),
            sender_id: row.try_get("message_sender_id")?,
            sender_public_id: row.try_get("message_sender_public_id")?,
            content: row.try_get("message_content")?,
            read: row.try_get("message_is_read")?,
            created_at: row.try_get("message_created_at")?,
        }),
        None => None,
    };

    Ok(ConversationSummary {
        conversation_id: conversation_public_id,
        listing: ListingSummary {
            id: row.try_get("listing_public_id")?,
            title: row.try_get("listing_title")?,
            price_cents: row.try_get("listing_price_cents")?,
            image_url: row.try_get("listing_image_url")?,
        },
        other_participant: Participant {
            id: row.try_get("other_public_id")?,
            display_name: row.try_get("other_display_name")?,
        },
        last_message,
        unread_count: row.try_get("unread_count")?,
        last_message_at: row.try_get("last_message_at")?,
    })
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn find_listing(&self, public_id: &str) -> ConversationResult<Option<Listing>> {
        let row = sqlx::query(
            "SELECT id, public_id, owner_id, title, price_cents, image_url, active
             FROM listings WHERE public_id = ?",
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Listing {
            id: row.try_get("id")?,
            public_id: row.try_get("public_id")?,
            owner_id: row.try_get("owner_id")?,
            title: row.try_get("title")?,
            price_cents: row.try_get("price_cents")?,
            image_url: row.try_get("image_url")?,
            active: row.try_get("active")?,
        }))
    }

    async fn find_conversation(&self, public_id: &str) -> ConversationResult<Option<Conversation>> {
        let row = sqlx::query(&format!("{CONVERSATION_SELECT} WHERE public_id = ?"))
            .bind(public_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn start_conversation(
        &self,
        thread: ThreadKey,
        sender_id: i64,
        content: &str,
    ) -> ConversationResult<(Conversation, Message, bool)> {
        let now = timestamp();
        let public_id = cuid2::create_id();

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO conversations (public_id, listing_id, participant_low, participant_high, created_at, last_message_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (listing_id, participant_low, participant_high) DO NOTHING",
        )
        .bind(&public_id)
        .bind(thread.listing_id)
        .bind(thread.participants.low())
        .bind(thread.participants.high())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let row = sqlx::query(&format!(
            "{CONVERSATION_SELECT} WHERE listing_id = ? AND participant_low = ? AND participant_high = ?"
        ))
        .bind(thread.listing_id)
        .bind(thread.participants.low())
        .bind(thread.participants.high())
        .fetch_one(&mut *tx)
        .await?;

        let mut conversation = conversation_from_row(&row)?;
        let message = insert_message(&mut tx, &conversation, sender_id, content, &now).await?;
        tx.commit().await?;

        conversation.last_message_at = now;
        let created = inserted == 1;
        if created {
            info!(
                conversation_id = conversation.id,
                listing_id = thread.listing_id,
                "created conversation"
            );
        }

        Ok((conversation, message, created))
    }

    async fn append_message(
        &self,
        conversation: &Conversation,
        sender_id: i64,
        content: &str,
    ) -> ConversationResult<Message> {
        let now = timestamp();

        let mut tx = self.pool.begin().await?;
        let message = insert_message(&mut tx, conversation, sender_id, content, &now).await?;
        tx.commit().await?;

        Ok(message)
    }

    async fn mark_read(&self, conversation_id: i64, reader_id: i64) -> ConversationResult<u64> {
        let updated = sqlx::query(
            "UPDATE messages SET is_read = 1
             WHERE conversation_id = ? AND sender_id != ? AND is_read = 0",
        )
        .bind(conversation_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated)
    }

    async fn recent_messages(
        &self,
        conversation_id: i64,
        limit: u32,
        offset: u64,
    ) -> ConversationResult<Vec<Message>> {
        let offset = i64::try_from(offset)
            .map_err(|_| ConversationError::validation("page out of range"))?;

        let rows = sqlx::query(&format!(
            "{MESSAGE_SELECT} WHERE m.conversation_id = ? ORDER BY m.id DESC LIMIT ? OFFSET ?"
        ))
        .bind(conversation_id)
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn summaries_for(&self, user_id: i64) -> ConversationResult<Vec<ConversationSummary>> {
        let rows = sqlx::query(
            "SELECT c.id, c.public_id, c.last_message_at,
                    l.public_id AS listing_public_id, l.title AS listing_title,
                    l.price_cents AS listing_price_cents, l.image_url AS listing_image_url,
                    other.public_id AS other_public_id, other.display_name AS other_display_name,
                    m.id AS message_id, m.public_id AS message_public_id, m.sender_id AS message_sender_id,
                    sender.public_id AS message_sender_public_id, m.content AS message_content,
                    m.is_read AS message_is_read, m.created_at AS message_created_at,
                    (SELECT COUNT(*) FROM messages unread
                      WHERE unread.conversation_id = c.id AND unread.is_read = 0 AND unread.sender_id != ?) AS unread_count
             FROM conversations c
             JOIN listings l ON l.id = c.listing_id
             JOIN users other ON other.id = CASE WHEN c.participant_low = ? THEN c.participant_high ELSE c.participant_low END
             LEFT JOIN messages m ON m.id = (SELECT MAX(id) FROM messages WHERE conversation_id = c.id)
             LEFT JOIN users sender ON sender.id = m.sender_id
             WHERE c.participant_low = ? OR c.participant_high = ?
             ORDER BY c.last_message_at DESC, c.id DESC",
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(summary_from_row).collect()
    }

    async fn unread_total(&self, user_id: i64) -> ConversationResult<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages m
             JOIN conversations c ON c.id = m.conversation_id
             WHERE (c.participant_low = ? OR c.participant_high = ?)
               AND m.sender_id != ? AND m.is_read = 0",
        )
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(total)
    }
}
