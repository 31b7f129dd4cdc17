// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message inserts, ordered reads, and idempotent delivery-status updates.

use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use deskline_core::types::{
    ConversationId, DeliveryStatus, DeliveryUpdate, Message, MessageId, NewMessage, Sentiment,
    plan_delivery_update,
};
use deskline_core::DesklineError;

use super::conversations::select_conversation;
use super::{format_ts, parse_enum, parse_ts};
use crate::database::{Database, map_tr_err};

const COLUMNS: &str = "id, conversation_id, role, content, image_ref, sentiment_label, \
                       sentiment_score, delivery_status, created_at";

fn from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let label: Option<String> = row.get(5)?;
    let score: Option<f64> = row.get(6)?;
    let delivery: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;
    Ok(Message {
        id: MessageId(row.get(0)?),
        conversation_id: ConversationId(row.get(1)?),
        role: parse_enum(2, &role)?,
        content: row.get(3)?,
        image_ref: row.get(4)?,
        sentiment: label.map(|label| Sentiment {
            label,
            score: score.unwrap_or_default() as f32,
        }),
        delivery_status: delivery.as_deref().map(|d| parse_enum(7, d)).transpose()?,
        created_at: parse_ts(8, &created_at)?,
    })
}

fn not_found_conversation(id: &ConversationId) -> DesklineError {
    DesklineError::NotFound {
        entity: "conversation",
        id: id.to_string(),
    }
}

/// Insert a message and bump the conversation's `updated_at`.
///
/// Agent messages are stored with delivery status `pending`.
pub async fn insert_message(db: &Database, new: NewMessage) -> Result<Message, DesklineError> {
    let conversation_id = new.conversation_id.clone();
    let message = new.into_message(MessageId::generate(), Utc::now());
    let row = message.clone();

    let inserted = db
        .connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let tx = conn.transaction()?;
            if select_conversation(&tx, &row.conversation_id.0)?.is_none() {
                return Ok(false);
            }
            let created_at = format_ts(row.created_at);
            tx.execute(
                &format!(
                    "INSERT INTO messages ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    row.id.0,
                    row.conversation_id.0,
                    row.role.to_string(),
                    row.content,
                    row.image_ref,
                    row.sentiment.as_ref().map(|s| s.label.clone()),
                    row.sentiment.as_ref().map(|s| f64::from(s.score)),
                    row.delivery_status.map(|d| d.to_string()),
                    created_at,
                ],
            )?;
            tx.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
                params![row.conversation_id.0, created_at],
            )?;
            tx.commit()?;
            Ok(true)
        })
        .await
        .map_err(map_tr_err)?;

    if !inserted {
        return Err(not_found_conversation(&conversation_id));
    }
    debug!(
        conversation_id = %message.conversation_id,
        message_id = %message.id,
        role = %message.role,
        "message inserted"
    );
    Ok(message)
}

/// Messages of a conversation in commit order, or `NotFound`.
pub async fn get_messages(
    db: &Database,
    conversation_id: &ConversationId,
) -> Result<Vec<Message>, DesklineError> {
    let key = conversation_id.0.clone();
    let messages = db
        .connection()
        .call(move |conn| -> Result<Option<Vec<Message>>, rusqlite::Error> {
            if select_conversation(conn, &key)?.is_none() {
                return Ok(None);
            }
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC"
            ))?;
            let rows = stmt.query_map(params![key], from_row)?;
            rows.collect::<Result<Vec<_>, _>>().map(Some)
        })
        .await
        .map_err(map_tr_err)?;

    messages.ok_or_else(|| not_found_conversation(conversation_id))
}

pub async fn get_message(db: &Database, id: &MessageId) -> Result<Option<Message>, DesklineError> {
    let key = id.0.clone();
    db.connection()
        .call(move |conn| -> Result<Option<Message>, rusqlite::Error> {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"),
                params![key],
                from_row,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Idempotent delivery-status write.
///
/// Read and write happen in one closure on the writer thread, so concurrent
/// duplicates resolve to exactly one `Applied`.
pub async fn update_delivery_status(
    db: &Database,
    id: &MessageId,
    status: DeliveryStatus,
) -> Result<DeliveryUpdate, DesklineError> {
    let key = id.0.clone();
    let outcome = db
        .connection()
        .call(move |conn| -> Result<Option<DeliveryUpdate>, rusqlite::Error> {
            let current: Option<Option<String>> = conn
                .query_row(
                    "SELECT delivery_status FROM messages WHERE id = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Ok(None);
            };
            let current = current
                .as_deref()
                .map(|raw| parse_enum::<DeliveryStatus>(0, raw))
                .transpose()?;

            let plan = plan_delivery_update(current, status);
            if plan == DeliveryUpdate::Applied {
                conn.execute(
                    "UPDATE messages SET delivery_status = ?2 \
                     WHERE id = ?1 AND delivery_status = 'pending'",
                    params![key, status.to_string()],
                )?;
            }
            Ok(Some(plan))
        })
        .await
        .map_err(map_tr_err)?;

    let outcome = outcome.ok_or_else(|| DesklineError::NotFound {
        entity: "message",
        id: id.to_string(),
    })?;
    debug!(message_id = %id, status = %status, outcome = ?outcome, "delivery status update");
    Ok(outcome)
}
