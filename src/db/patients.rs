use anyhow::Result;
use tracing::info;

use super::Database;

impl Database {
    /// Stores the patient's name in `documents`, one `paciente_info` row per phone.
    pub async fn save_patient_name(&self, phone: &str, name: &str) -> Result<()> {
        let mut tx = self.pool()?.begin().await?;

        let updated = sqlx::query(
            r#"UPDATE documents
            SET content = $2,
                metadata = jsonb_set(COALESCE(metadata, '{}'::jsonb), '{nome}', to_jsonb($2::text)),
                created_at = COALESCE(created_at, CURRENT_TIMESTAMP)
            WHERE id = (
                SELECT id FROM documents
                WHERE metadata->>'telefone' = $1 AND metadata->>'tipo' = 'paciente_info'
                ORDER BY id
                LIMIT 1
            )"#,
        )
        .bind(phone)
        .bind(name)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            sqlx::query(
                "INSERT INTO documents (content, metadata) \
                 VALUES ($2, jsonb_build_object('telefone', $1::text, 'nome', $2::text, 'tipo', 'paciente_info'))",
            )
            .bind(phone)
            .bind(name)
            .execute(&mut *tx)
            .await?;
            info!(telefone = %phone, "patient name stored");
        } else {
            info!(telefone = %phone, "patient name updated");
        }

        tx.commit().await?;
        Ok(())
    }

    /// `Some("")` means a record exists but carries no name.
    pub async fn find_patient_name(&self, phone: &str) -> Result<Option<String>> {
        let name = sqlx::query_scalar::<_, String>(
            "SELECT COALESCE(NULLIF(content, ''), metadata->>'nome', '') FROM documents \
             WHERE metadata->>'telefone' = $1 AND metadata->>'tipo' = 'paciente_info' \
             ORDER BY id \
             LIMIT 1",
        )
        .bind(phone)
        .fetch_optional(self.pool()?)
        .await?;
        Ok(name)
    }
}
