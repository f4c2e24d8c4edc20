//! `SQLite`-backed conversation store.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use super::{ConversationStore, StoreFuture};
use crate::conversation::core::config::StorageConfig;
use crate::conversation::core::conversation::{Conversation, normalize_title};
use crate::conversation::core::errors::{ConversationError, ConversationResult};
use crate::conversation::core::ids::{ConversationId, MessageId, ModelId};
use crate::conversation::core::message::{Message, Role};
use crate::conversation::core::params::{GenerationParams, ModelCatalog, ParameterPatch};

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        model TEXT NOT NULL,
        system_prompt TEXT NOT NULL DEFAULT '',
        temperature REAL NOT NULL,
        top_p REAL NOT NULL,
        frequency_penalty REAL NOT NULL,
        presence_penalty REAL NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversations_updated
        ON conversations (updated_at DESC);
    CREATE TABLE IF NOT EXISTS messages (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id TEXT NOT NULL REFERENCES conversations (id) ON DELETE CASCADE,
        id TEXT NOT NULL,
        role TEXT NOT NULL,
        text TEXT NOT NULL,
        sent_at INTEGER NOT NULL,
        UNIQUE (conversation_id, id)
    );
    CREATE INDEX IF NOT EXISTS idx_messages_conversation
        ON messages (conversation_id, seq);";

const SELECT_CONVERSATION: &str = "
    SELECT c.id, c.title, c.created_at, c.updated_at,
           c.model, c.system_prompt, c.temperature, c.top_p,
           c.frequency_penalty, c.presence_penalty,
           (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id)
    FROM conversations c";

/// Conversation row before timestamp decoding.
struct ConversationRow {
    id: ConversationId,
    title: String,
    created_at: i64,
    updated_at: i64,
    params: GenerationParams,
    message_count: u32,
}

impl ConversationRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
            params: GenerationParams {
                model: row.get::<_, ModelId>(4)?,
                system_prompt: row.get(5)?,
                temperature: row.get(6)?,
                top_p: row.get(7)?,
                frequency_penalty: row.get(8)?,
                presence_penalty: row.get(9)?,
            },
            message_count: row.get(10)?,
        })
    }

    fn into_conversation(self) -> ConversationResult<Conversation> {
        Ok(Conversation {
            id: self.id,
            title: self.title,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
            params: self.params,
            message_count: self.message_count,
        })
    }
}

/// Message row before role and timestamp decoding.
struct MessageRow {
    id: MessageId,
    role: String,
    text: String,
    sent_at: i64,
}

impl MessageRow {
    fn into_message(self) -> ConversationResult<Message> {
        let role = Role::from_str(&self.role)
            .map_err(|role| ConversationError::CorruptRecord(format!("invalid role: {role}")))?;
        Ok(Message {
            id: self.id,
            role,
            text: self.text,
            sent_at: from_millis(self.sent_at)?,
        })
    }
}

fn from_millis(ms: i64) -> ConversationResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| ConversationError::CorruptRecord(format!("invalid timestamp {ms}")))
}

fn conversation_exists(conn: &rusqlite::Connection, id: &str) -> rusqlite::Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM conversations WHERE id = ?1",
            rusqlite::params![id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn write_params(
    conn: &rusqlite::Connection,
    id: &str,
    params: &GenerationParams,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE conversations
         SET model = ?1, system_prompt = ?2, temperature = ?3, top_p = ?4,
             frequency_penalty = ?5, presence_penalty = ?6
         WHERE id = ?7",
        rusqlite::params![
            params.model,
            params.system_prompt,
            params.temperature,
            params.top_p,
            params.frequency_penalty,
            params.presence_penalty,
            id
        ],
    )
}

/// `SQLite` implementation of [`ConversationStore`].
///
/// All calls are serialized on the connection's worker thread, and every
/// mutation runs in one transaction.
pub struct SqliteConversationStore {
    conn: Connection,
    catalog: ModelCatalog,
}

impl SqliteConversationStore {
    /// Open (or create) the database at `config.sqlite_path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(config: &StorageConfig, catalog: ModelCatalog) -> ConversationResult<Self> {
        let conn = Connection::open(&config.sqlite_path).await?;
        info!("Opened conversation store at {}", config.sqlite_path.display());
        Self::new(conn, catalog).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be created.
    pub async fn open_in_memory(catalog: ModelCatalog) -> ConversationResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::new(conn, catalog).await
    }

    /// Initialize the store on an existing connection and create the tables.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn new(conn: Connection, catalog: ModelCatalog) -> ConversationResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, catalog })
    }

    async fn fetch(&self, id: ConversationId) -> ConversationResult<Conversation> {
        let id_str = id.to_string();
        let row = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!("{SELECT_CONVERSATION} WHERE c.id = ?1"),
                        rusqlite::params![id_str],
                        ConversationRow::read,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        row.ok_or(ConversationError::NotFound(id))?
            .into_conversation()
    }
}

impl ConversationStore for SqliteConversationStore {
    fn create_conversation(
        &self,
        defaults: &GenerationParams,
        title: Option<&str>,
    ) -> StoreFuture<'_, ConversationResult<Conversation>> {
        let defaults = defaults.clone();
        let title = title.map(str::to_string);
        Box::pin(async move {
            defaults.validate(&self.catalog)?;
            let mut conversation = Conversation::new(&defaults);
            if let Some(title) = title {
                conversation.title = normalize_title(conversation.id, &title);
            }
            let row = conversation.clone();

            self.conn
                .call(move |conn| {
                    conn.execute(
                        "INSERT INTO conversations
                         (id, title, created_at, updated_at, model, system_prompt,
                          temperature, top_p, frequency_penalty, presence_penalty)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                        rusqlite::params![
                            row.id,
                            row.title,
                            row.created_at.timestamp_millis(),
                            row.updated_at.timestamp_millis(),
                            row.params.model,
                            row.params.system_prompt,
                            row.params.temperature,
                            row.params.top_p,
                            row.params.frequency_penalty,
                            row.params.presence_penalty
                        ],
                    )?;
                    Ok(())
                })
                .await?;

            info!("Created conversation {}", conversation.id);
            Ok(conversation)
        })
    }

    fn get(&self, id: ConversationId) -> StoreFuture<'_, ConversationResult<Conversation>> {
        Box::pin(self.fetch(id))
    }

    fn list(&self) -> StoreFuture<'_, ConversationResult<Vec<Conversation>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(|conn| {
                    let mut stmt = conn.prepare(&format!(
                        "{SELECT_CONVERSATION} ORDER BY c.updated_at DESC, c.rowid DESC"
                    ))?;
                    let rows = stmt
                        .query_map([], ConversationRow::read)?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(rows)
                })
                .await?;

            rows.into_iter()
                .map(ConversationRow::into_conversation)
                .collect()
        })
    }

    fn messages(&self, id: ConversationId) -> StoreFuture<'_, ConversationResult<Vec<Message>>> {
        Box::pin(async move {
            let id_str = id.to_string();
            let rows = self
                .conn
                .call(move |conn| {
                    if !conversation_exists(conn, &id_str)? {
                        return Ok(None);
                    }
                    let mut stmt = conn.prepare(
                        "SELECT id, role, text, sent_at
                         FROM messages
                         WHERE conversation_id = ?1
                         ORDER BY seq",
                    )?;
                    let rows = stmt
                        .query_map(rusqlite::params![id_str], |row| {
                            Ok(MessageRow {
                                id: row.get(0)?,
                                role: row.get(1)?,
                                text: row.get(2)?,
                                sent_at: row.get(3)?,
                            })
                        })?
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Some(rows))
                })
                .await?
                .ok_or(ConversationError::NotFound(id))?;

            rows.into_iter().map(MessageRow::into_message).collect()
        })
    }

    fn append(
        &self,
        id: ConversationId,
        message: Message,
    ) -> StoreFuture<'_, ConversationResult<Message>> {
        Box::pin(async move {
            let id_str = id.to_string();
            let mut stored = message;
            let row = stored.clone();

            let outcome = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    if !conversation_exists(&tx, &id_str)? {
                        return Ok(Err(ConversationError::NotFound(id)));
                    }

                    let duplicate = tx
                        .query_row(
                            "SELECT 1 FROM messages WHERE conversation_id = ?1 AND id = ?2",
                            rusqlite::params![id_str, row.id],
                            |_| Ok(()),
                        )
                        .optional()?;
                    if duplicate.is_some() {
                        return Ok(Err(ConversationError::DuplicateMessage {
                            conversation_id: id,
                            message_id: row.id,
                        }));
                    }

                    let last: Option<i64> = tx.query_row(
                        "SELECT MAX(sent_at) FROM messages WHERE conversation_id = ?1",
                        rusqlite::params![id_str],
                        |r| r.get(0),
                    )?;
                    let sent_at = row.sent_at.timestamp_millis().max(last.unwrap_or(i64::MIN));

                    tx.execute(
                        "INSERT INTO messages (conversation_id, id, role, text, sent_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![id_str, row.id, row.role.as_str(), row.text, sent_at],
                    )?;
                    tx.execute(
                        "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                        rusqlite::params![sent_at, id_str],
                    )?;
                    tx.commit()?;
                    Ok(Ok(sent_at))
                })
                .await??;

            stored.sent_at = from_millis(outcome)?;
            debug!(
                "Appended {} message {} to conversation {}",
                stored.role, stored.id, id
            );
            Ok(stored)
        })
    }

    fn delete_conversation(&self, id: ConversationId) -> StoreFuture<'_, ConversationResult<()>> {
        Box::pin(async move {
            let id_str = id.to_string();
            let deleted = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(
                        "DELETE FROM messages WHERE conversation_id = ?1",
                        rusqlite::params![id_str],
                    )?;
                    let deleted = tx.execute(
                        "DELETE FROM conversations WHERE id = ?1",
                        rusqlite::params![id_str],
                    )?;
                    tx.commit()?;
                    Ok(deleted)
                })
                .await?;

            if deleted == 0 {
                return Err(ConversationError::NotFound(id));
            }
            info!("Deleted conversation {}", id);
            Ok(())
        })
    }

    fn reset_history(&self, id: ConversationId) -> StoreFuture<'_, ConversationResult<()>> {
        Box::pin(async move {
            let id_str = id.to_string();
            let removed = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    if !conversation_exists(&tx, &id_str)? {
                        return Ok(None);
                    }
                    let removed = tx.execute(
                        "DELETE FROM messages WHERE conversation_id = ?1",
                        rusqlite::params![id_str],
                    )?;
                    tx.commit()?;
                    Ok(Some(removed))
                })
                .await?
                .ok_or(ConversationError::NotFound(id))?;

            info!("Reset history of conversation {} ({} messages)", id, removed);
            Ok(())
        })
    }

    fn update_parameters(
        &self,
        id: ConversationId,
        patch: ParameterPatch,
    ) -> StoreFuture<'_, ConversationResult<Conversation>> {
        Box::pin(async move {
            if patch.is_empty() {
                return self.fetch(id).await;
            }
            let id_str = id.to_string();
            let catalog = self.catalog.clone();

            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let current = tx
                        .query_row(
                            &format!("{SELECT_CONVERSATION} WHERE c.id = ?1"),
                            rusqlite::params![id_str],
                            ConversationRow::read,
                        )
                        .optional()?;
                    let Some(current) = current else {
                        return Ok(Err(ConversationError::NotFound(id)));
                    };

                    let merged = current.params.merged(&patch);
                    if let Err(err) = merged.validate(&catalog) {
                        return Ok(Err(err));
                    }
                    write_params(&tx, &id_str, &merged)?;
                    tx.commit()?;
                    Ok(Ok(()))
                })
                .await??;

            debug!("Updated parameters of conversation {}", id);
            self.fetch(id).await
        })
    }

    fn reset_parameters(
        &self,
        id: ConversationId,
        defaults: &GenerationParams,
    ) -> StoreFuture<'_, ConversationResult<Conversation>> {
        let defaults = defaults.clone();
        Box::pin(async move {
            defaults.validate(&self.catalog)?;
            let id_str = id.to_string();
            let updated = self
                .conn
                .call(move |conn| Ok(write_params(conn, &id_str, &defaults)?))
                .await?;
            if updated == 0 {
                return Err(ConversationError::NotFound(id));
            }
            debug!("Reset parameters of conversation {}", id);
            self.fetch(id).await
        })
    }

    fn rename(
        &self,
        id: ConversationId,
        title: &str,
    ) -> StoreFuture<'_, ConversationResult<Conversation>> {
        let title = normalize_title(id, title);
        Box::pin(async move {
            let id_str = id.to_string();
            let updated = self
                .conn
                .call(move |conn| {
                    let updated = conn.execute(
                        "UPDATE conversations SET title = ?1 WHERE id = ?2",
                        rusqlite::params![title, id_str],
                    )?;
                    Ok(updated)
                })
                .await?;
            if updated == 0 {
                return Err(ConversationError::NotFound(id));
            }
            self.fetch(id).await
        })
    }
}
