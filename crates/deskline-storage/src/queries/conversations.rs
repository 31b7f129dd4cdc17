// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation CRUD and guarded status updates.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use deskline_core::types::{
    Conversation, ConversationId, ConversationStatus, NewConversation, StatusUpdate,
};
use deskline_core::DesklineError;

use super::{format_ts, parse_enum, parse_ts};
use crate::database::{Database, map_tr_err};

const COLUMNS: &str =
    "id, chatbot_id, customer_email, source, status, assigned_agent, created_at, updated_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let status: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    Ok(Conversation {
        id: ConversationId(row.get(0)?),
        chatbot_id: row.get(1)?,
        customer_email: row.get(2)?,
        source: row.get(3)?,
        status: parse_enum(4, &status)?,
        assigned_agent: row.get(5)?,
        created_at: parse_ts(6, &created_at)?,
        updated_at: parse_ts(7, &updated_at)?,
    })
}

pub(crate) fn select_conversation(
    conn: &rusqlite::Connection,
    id: &str,
) -> rusqlite::Result<Option<Conversation>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM conversations WHERE id = ?1"),
        params![id],
        from_row,
    )
    .optional()
}

/// Insert a new conversation in `AI_HANDLING`.
pub async fn create_conversation(
    db: &Database,
    new: NewConversation,
) -> Result<Conversation, DesklineError> {
    let now = Utc::now();
    let conversation = Conversation {
        id: ConversationId::generate(),
        chatbot_id: new.chatbot_id,
        customer_email: new.customer_email,
        source: new.source,
        status: ConversationStatus::AiHandling,
        assigned_agent: None,
        created_at: now,
        updated_at: now,
    };
    let row = conversation.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO conversations (id, chatbot_id, customer_email, source, status, \
                 assigned_agent, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    row.id.0,
                    row.chatbot_id,
                    row.customer_email,
                    row.source,
                    row.status.to_string(),
                    row.assigned_agent,
                    format_ts(row.created_at),
                    format_ts(row.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)?;
    Ok(conversation)
}

pub async fn get_conversation(
    db: &Database,
    id: &ConversationId,
) -> Result<Option<Conversation>, DesklineError> {
    let id = id.0.clone();
    db.connection()
        .call(move |conn| -> Result<Option<Conversation>, rusqlite::Error> {
            select_conversation(conn, &id)
        })
        .await
        .map_err(map_tr_err)
}

/// Conversations, optionally filtered by status, most recently updated first.
pub async fn list_conversations(
    db: &Database,
    status: Option<ConversationStatus>,
) -> Result<Vec<Conversation>, DesklineError> {
    let status = status.map(|s| s.to_string());
    db.connection()
        .call(move |conn| -> Result<Vec<Conversation>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM conversations \
                 WHERE (?1 IS NULL OR status = ?1) \
                 ORDER BY updated_at DESC, id ASC"
            ))?;
            let rows = stmt.query_map(params![status], from_row)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

enum StatusWrite {
    Missing,
    Stale {
        expected: ConversationStatus,
        actual: ConversationStatus,
    },
    Written(Conversation),
}

/// Writes status and assigned agent in one transaction.
///
/// With `update.expected` set, the write only happens if the stored status
/// still matches; otherwise [`DesklineError::Conflict`] is returned.
pub async fn set_conversation_status(
    db: &Database,
    id: &ConversationId,
    update: StatusUpdate,
) -> Result<Conversation, DesklineError> {
    let key = id.0.clone();
    let outcome = db
        .connection()
        .call(move |conn| -> Result<StatusWrite, rusqlite::Error> {
            let tx = conn.transaction()?;
            let Some(current) = select_conversation(&tx, &key)? else {
                return Ok(StatusWrite::Missing);
            };
            if let Some(expected) = update.expected {
                if expected != current.status {
                    return Ok(StatusWrite::Stale {
                        expected,
                        actual: current.status,
                    });
                }
            }
            let updated_at = Utc::now();
            tx.execute(
                "UPDATE conversations SET status = ?2, assigned_agent = ?3, updated_at = ?4 \
                 WHERE id = ?1",
                params![
                    key,
                    update.status.to_string(),
                    update.assigned_agent,
                    format_ts(updated_at),
                ],
            )?;
            tx.commit()?;
            Ok(StatusWrite::Written(Conversation {
                status: update.status,
                assigned_agent: update.assigned_agent,
                updated_at,
                ..current
            }))
        })
        .await
        .map_err(map_tr_err)?;

    match outcome {
        StatusWrite::Written(conversation) => Ok(conversation),
        StatusWrite::Missing => Err(DesklineError::NotFound {
            entity: "conversation",
            id: id.to_string(),
        }),
        StatusWrite::Stale { expected, actual } => {
            Err(DesklineError::Conflict { expected, actual })
        }
    }
}
