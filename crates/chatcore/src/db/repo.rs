//! Chat repository (§6.2).
//!
//! Function-per-operation style grounded on the teacher's
//! `data::postgres::repositories::membership` module: plain `sqlx::query`/
//! `query_as` over tuples (no compile-time-checked `query!` macros, since
//! those need a live `DATABASE_URL` at build time), mutations wrapped in a
//! transaction whenever more than one statement must commit atomically.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::error::RepoError;
use super::models::{Chat, ChatMember, ChatType, DeviceToken, Message, ReceiptStatus, Role};

pub struct ChatRepository {
    pool: PgPool,
}

type ChatRow = (i64, i16, Option<String>, DateTime<Utc>);
type MemberRow = (i64, i64, i16, i64, DateTime<Utc>);
type MessageRow = (
    i64,
    i64,
    i64,
    String,
    Option<String>,
    Option<i64>,
    String,
    DateTime<Utc>,
);
type DeviceTokenRow = (i64, String, String, DateTime<Utc>);

fn chat_from_row(row: ChatRow) -> Chat {
    Chat {
        id: row.0,
        chat_type: ChatType::from_i16(row.1),
        title: row.2,
        created_at: row.3,
    }
}

fn member_from_row(row: MemberRow) -> ChatMember {
    ChatMember {
        chat_id: row.0,
        user_id: row.1,
        role: Role::from_i16(row.2),
        last_read_msg_id: row.3,
        joined_at: row.4,
    }
}

fn message_from_row(row: MessageRow) -> Message {
    Message {
        id: row.0,
        chat_id: row.1,
        sender_id: row.2,
        body: row.3,
        media_ref: row.4,
        reply_to_msg_id: row.5,
        client_uuid: row.6,
        created_at: row.7,
    }
}

fn device_token_from_row(row: DeviceTokenRow) -> DeviceToken {
    DeviceToken {
        user_id: row.0,
        token: row.1,
        platform: row.2,
        updated_at: row.3,
    }
}

impl ChatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a group chat with `creator_id` installed as admin (§3 Chat).
    /// Transactional: the chat row and the creator's membership row commit
    /// together, never leaving a chat with zero members.
    pub async fn create_group_chat(
        &self,
        title: Option<&str>,
        creator_id: i64,
    ) -> Result<Chat, RepoError> {
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;

        let row: ChatRow = sqlx::query_as(
            "INSERT INTO chats (chat_type, title) VALUES ($1, $2)
             RETURNING id, chat_type, title, created_at",
        )
        .bind(ChatType::Group.as_i16())
        .bind(title)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO chat_members (chat_id, user_id, role) VALUES ($1, $2, $3)",
        )
        .bind(row.0)
        .bind(creator_id)
        .bind(Role::Admin.as_i16())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(chat_from_row(row))
    }

    /// Create (or return the existing) direct chat between two users
    /// (§3 Chat: "at most one [direct chat] exists per unordered pair").
    pub async fn create_or_get_direct_chat(
        &self,
        user_a: i64,
        user_b: i64,
    ) -> Result<Chat, RepoError> {
        if let Some(existing) = self.find_direct_chat(user_a, user_b).await? {
            return Ok(existing);
        }

        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;

        let row: ChatRow = sqlx::query_as(
            "INSERT INTO chats (chat_type, title) VALUES ($1, NULL)
             RETURNING id, chat_type, title, created_at",
        )
        .bind(ChatType::Direct.as_i16())
        .fetch_one(&mut *tx)
        .await?;

        for user_id in [user_a, user_b] {
            sqlx::query(
                "INSERT INTO chat_members (chat_id, user_id, role) VALUES ($1, $2, $3)",
            )
            .bind(row.0)
            .bind(user_id)
            .bind(Role::Member.as_i16())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(chat_from_row(row))
    }

    pub async fn get_chat(&self, chat_id: i64) -> Result<Option<Chat>, RepoError> {
        let row: Option<ChatRow> = sqlx::query_as(
            "SELECT id, chat_type, title, created_at FROM chats WHERE id = $1",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(chat_from_row))
    }

    /// Find the (at most one) direct chat between two users, by joining
    /// each user's direct-chat memberships against the other's.
    pub async fn find_direct_chat(&self, user_a: i64, user_b: i64) -> Result<Option<Chat>, RepoError> {
        let row: Option<ChatRow> = sqlx::query_as(
            r#"
            SELECT c.id, c.chat_type, c.title, c.created_at
            FROM chats c
            JOIN chat_members m1 ON m1.chat_id = c.id AND m1.user_id = $1
            JOIN chat_members m2 ON m2.chat_id = c.id AND m2.user_id = $2
            WHERE c.chat_type = $3
            LIMIT 1
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .bind(ChatType::Direct.as_i16())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(chat_from_row))
    }

    pub async fn list_user_chats(&self, user_id: i64) -> Result<Vec<Chat>, RepoError> {
        let rows: Vec<ChatRow> = sqlx::query_as(
            r#"
            SELECT c.id, c.chat_type, c.title, c.created_at
            FROM chats c
            JOIN chat_members m ON m.chat_id = c.id
            WHERE m.user_id = $1
            ORDER BY c.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(chat_from_row).collect())
    }

    pub async fn add_member(&self, chat_id: i64, user_id: i64, role: Role) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO chat_members (chat_id, user_id, role) VALUES ($1, $2, $3)
             ON CONFLICT (chat_id, user_id) DO UPDATE SET role = EXCLUDED.role",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(role.as_i16())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a member. Per §3 "removing a member deletes the membership
    /// but preserves their prior messages" — only `chat_members` is
    /// touched, `messages.sender_id` is untouched and has no FK to it.
    pub async fn remove_member(&self, chat_id: i64, user_id: i64) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM chat_members WHERE chat_id = $1 AND user_id = $2")
            .bind(chat_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn update_role(&self, chat_id: i64, user_id: i64, role: Role) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE chat_members SET role = $1 WHERE chat_id = $2 AND user_id = $3",
        )
        .bind(role.as_i16())
        .bind(chat_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_members(&self, chat_id: i64) -> Result<Vec<ChatMember>, RepoError> {
        let rows: Vec<MemberRow> = sqlx::query_as(
            "SELECT chat_id, user_id, role, last_read_msg_id, joined_at
             FROM chat_members WHERE chat_id = $1 ORDER BY user_id",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(member_from_row).collect())
    }

    /// Member user ids only — the hot path for push/broadcast fan-out,
    /// which never needs role or `last_read_msg_id`.
    pub async fn list_member_ids(&self, chat_id: i64) -> Result<Vec<i64>, RepoError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT user_id FROM chat_members WHERE chat_id = $1",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    pub async fn is_member(&self, chat_id: i64, user_id: i64) -> Result<bool, RepoError> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM chat_members WHERE chat_id = $1 AND user_id = $2",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn member_role(&self, chat_id: i64, user_id: i64) -> Result<Option<Role>, RepoError> {
        let row: Option<(i16,)> = sqlx::query_as(
            "SELECT role FROM chat_members WHERE chat_id = $1 AND user_id = $2",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Role::from_i16(r.0)))
    }

    /// Idempotent persist by `(chat_id, sender_id, client_uuid)` (§4.3
    /// step 2, invariant 1). `INSERT ... ON CONFLICT DO NOTHING` followed
    /// by a `SELECT` on conflict, rather than a read-before-write, so the
    /// common case (no conflict) is a single round trip.
    pub async fn create_message(
        &self,
        chat_id: i64,
        sender_id: i64,
        body: &str,
        client_uuid: &str,
        reply_to_msg_id: Option<i64>,
        media_ref: Option<&str>,
    ) -> Result<Message, RepoError> {
        let inserted: Option<MessageRow> = sqlx::query_as(
            r#"
            INSERT INTO messages (chat_id, sender_id, body, media_ref, reply_to_msg_id, client_uuid)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (chat_id, sender_id, client_uuid) DO NOTHING
            RETURNING id, chat_id, sender_id, body, media_ref, reply_to_msg_id, client_uuid, created_at
            "#,
        )
        .bind(chat_id)
        .bind(sender_id)
        .bind(body)
        .bind(media_ref)
        .bind(reply_to_msg_id)
        .bind(client_uuid)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(message_from_row(row));
        }

        let row: MessageRow = sqlx::query_as(
            r#"
            SELECT id, chat_id, sender_id, body, media_ref, reply_to_msg_id, client_uuid, created_at
            FROM messages WHERE chat_id = $1 AND sender_id = $2 AND client_uuid = $3
            "#,
        )
        .bind(chat_id)
        .bind(sender_id)
        .bind(client_uuid)
        .fetch_one(&self.pool)
        .await?;

        Ok(message_from_row(row))
    }

    /// History DESC by id (§6.2), `limit` clamped to 200.
    pub async fn fetch_history(
        &self,
        chat_id: i64,
        before_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Message>, RepoError> {
        let limit = limit.clamp(1, 200);
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, chat_id, sender_id, body, media_ref, reply_to_msg_id, client_uuid, created_at
            FROM messages
            WHERE chat_id = $1 AND ($2::BIGINT IS NULL OR id < $2)
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(chat_id)
        .bind(before_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(message_from_row).collect())
    }

    /// Upsert a receipt row. Status is monotonic per §3 — enforced with a
    /// `GREATEST()` update rather than a read-modify-write, so concurrent
    /// receipts for the same (message, user) can never regress it.
    pub async fn upsert_receipt(
        &self,
        message_id: i64,
        user_id: i64,
        status: ReceiptStatus,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO receipts (message_id, user_id, status, ts)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (message_id, user_id) DO UPDATE SET
                status = GREATEST(receipts.status, EXCLUDED.status),
                ts = now()
            "#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(status.as_i16())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Advance `last_read_msg_id` to `max(current, msg_id)` (§4.4 invariant
    /// 4: never decreases) via `GREATEST()`, returning the value now
    /// stored.
    pub async fn advance_last_read(
        &self,
        chat_id: i64,
        user_id: i64,
        msg_id: i64,
    ) -> Result<i64, RepoError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            UPDATE chat_members
            SET last_read_msg_id = GREATEST(last_read_msg_id, $1)
            WHERE chat_id = $2 AND user_id = $3
            RETURNING last_read_msg_id
            "#,
        )
        .bind(msg_id)
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepoError::NotFound)?;
        Ok(row.0)
    }

    pub async fn upsert_device_token(
        &self,
        user_id: i64,
        token: &str,
        platform: &str,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO device_tokens (user_id, token, platform, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (user_id, token) DO UPDATE SET
                platform = EXCLUDED.platform,
                updated_at = now()
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(platform)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_device_tokens(&self, user_id: i64) -> Result<Vec<DeviceToken>, RepoError> {
        let rows: Vec<DeviceTokenRow> = sqlx::query_as(
            "SELECT user_id, token, platform, updated_at FROM device_tokens WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(device_token_from_row).collect())
    }
}
