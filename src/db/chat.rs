use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::Database;
use crate::model::chat::ChatEntry;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct KnownPatient {
    pub nome_paciente: String,
    pub email_paciente: Option<String>,
    pub ultima_conversa: Option<DateTime<Utc>>,
}

impl Database {
    /// Session of the most recent message tied to `phone`, either through the
    /// `telefone` column or a phone embedded in the message payload.
    pub async fn latest_session_for_phone(&self, phone: &str) -> Result<Option<String>> {
        let session = sqlx::query_scalar::<_, String>(
            "SELECT session_id FROM n8n_chat_histories \
             WHERE telefone = $1 OR message->>'telefone' = $1 OR message->>'phone' = $1 \
             ORDER BY created_at DESC NULLS LAST, id DESC \
             LIMIT 1",
        )
        .bind(phone)
        .fetch_optional(self.pool()?)
        .await?;
        Ok(session)
    }

    pub async fn session_messages_since(
        &self,
        session_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ChatEntry>> {
        let rows: Vec<(Value, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT message, created_at FROM n8n_chat_histories \
             WHERE session_id = $1 AND created_at >= $2 \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id)
        .bind(since)
        .fetch_all(self.pool()?)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(message, created_at)| ChatEntry {
                message,
                created_at: created_at.map(|ts| ts.to_rfc3339()),
            })
            .collect())
    }

    pub async fn known_patient(&self, phone: &str) -> Result<Option<KnownPatient>> {
        let row = sqlx::query_as::<_, KnownPatient>(
            "SELECT nome_paciente, email_paciente, \
                    (SELECT MAX(created_at) FROM n8n_chat_histories WHERE telefone = $1) AS ultima_conversa \
             FROM n8n_chat_histories \
             WHERE telefone = $1 AND nome_paciente IS NOT NULL AND nome_paciente <> '' \
             ORDER BY created_at DESC NULLS LAST, id DESC \
             LIMIT 1",
        )
        .bind(phone)
        .fetch_optional(self.pool()?)
        .await?;
        Ok(row)
    }

    pub async fn latest_patient_name(&self, phone: &str) -> Result<Option<String>> {
        let name = sqlx::query_scalar::<_, String>(
            "SELECT nome_paciente FROM n8n_chat_histories \
             WHERE telefone = $1 AND nome_paciente IS NOT NULL AND nome_paciente <> '' \
             ORDER BY created_at DESC NULLS LAST, id DESC \
             LIMIT 1",
        )
        .bind(phone)
        .fetch_optional(self.pool()?)
        .await?;
        Ok(name)
    }

    pub async fn insert_chat_message(
        &self,
        session_id: &str,
        message: &Value,
        telefone: Option<&str>,
        nome_paciente: Option<&str>,
        email_paciente: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO n8n_chat_histories (session_id, message, telefone, nome_paciente, email_paciente) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(session_id)
        .bind(message)
        .bind(telefone)
        .bind(nome_paciente)
        .bind(email_paciente)
        .execute(self.pool()?)
        .await
        .with_context(|| format!("failed to save message for session {session_id}"))?;
        Ok(())
    }
}
