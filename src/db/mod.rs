use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{error, info, warn};

use crate::config::mask_url;

mod agenda;
mod appointments;
mod chat;
mod patients;

pub use chat::KnownPatient;

pub const NOT_CONNECTED: &str = "Banco de dados nao conectado";

const MAX_CONNECTIONS: u32 = 15;

/// Postgres handle that may be absent. Every caller checks `is_connected`
/// so the API keeps answering (with degraded payloads) without a database.
#[derive(Clone, Default)]
pub struct Database {
    pool: Option<PgPool>,
    url_configured: bool,
}

impl Database {
    pub async fn connect(url: Option<&str>) -> Self {
        let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
            warn!("DATABASE_URL/DIRECT_URL not configured, running without database");
            return Self::disconnected();
        };

        info!(url = %mask_url(url), "connecting to database");
        match Self::open(url).await {
            Ok(pool) => {
                info!("database connection established");
                Self {
                    pool: Some(pool),
                    url_configured: true,
                }
            }
            Err(err) => {
                error!(error = %format!("{err:#}"), "database connection failed");
                Self {
                    pool: None,
                    url_configured: true,
                }
            }
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    async fn open(url: &str) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
            .context("failed to open connection pool")?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("connection probe failed")?;

        ensure_schema(&pool).await?;
        Ok(pool)
    }

    pub fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    pub fn url_configured(&self) -> bool {
        self.url_configured
    }

    pub(crate) fn pool(&self) -> Result<&PgPool> {
        self.pool.as_ref().ok_or_else(|| anyhow!(NOT_CONNECTED))
    }
}

// ============================================================
// SCHEMA
// ============================================================

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS agenda_events (
        id SERIAL PRIMARY KEY,
        evento_id VARCHAR NOT NULL UNIQUE,
        titulo VARCHAR(500),
        descricao TEXT,
        data TIMESTAMP NOT NULL,
        data_atomic INTEGER,
        hora_inicio VARCHAR(10),
        hora_fim VARCHAR(10),
        hora_inicio_numero INTEGER,
        profissional VARCHAR(200),
        categoria VARCHAR(200),
        paciente_id VARCHAR(50),
        dentista_id VARCHAR(50),
        tipo VARCHAR(50),
        ocupado BOOLEAN NOT NULL DEFAULT FALSE,
        deletado BOOLEAN NOT NULL DEFAULT FALSE,
        dados_originais JSON,
        created_at TIMESTAMP NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMP NOT NULL DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS ix_agenda_events_data ON agenda_events (data)",
    "CREATE INDEX IF NOT EXISTS ix_agenda_events_data_atomic ON agenda_events (data_atomic)",
    "CREATE INDEX IF NOT EXISTS ix_agenda_events_ocupado ON agenda_events (ocupado)",
    r#"CREATE TABLE IF NOT EXISTS profissionais (
        id SERIAL PRIMARY KEY,
        profissional_id VARCHAR(50) NOT NULL UNIQUE,
        nome VARCHAR(200) NOT NULL,
        ativo BOOLEAN NOT NULL DEFAULT TRUE,
        dados_originais JSON,
        created_at TIMESTAMP NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMP NOT NULL DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS ix_profissionais_ativo ON profissionais (ativo)",
    r#"CREATE TABLE IF NOT EXISTS sync_history (
        id SERIAL PRIMARY KEY,
        timestamp TIMESTAMP NOT NULL,
        data_inicio TIMESTAMP NOT NULL,
        data_fim TIMESTAMP NOT NULL,
        total_eventos INTEGER DEFAULT 0,
        eventos_ocupados INTEGER DEFAULT 0,
        eventos_livres INTEGER DEFAULT 0,
        total_profissionais INTEGER DEFAULT 0,
        sucesso BOOLEAN DEFAULT TRUE,
        erro TEXT,
        created_at TIMESTAMP NOT NULL DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS ix_sync_history_timestamp ON sync_history (timestamp)",
    // n8n usually creates this table itself; the extra columns are ours.
    r#"CREATE TABLE IF NOT EXISTS n8n_chat_histories (
        id SERIAL PRIMARY KEY,
        session_id VARCHAR(255) NOT NULL,
        message JSONB NOT NULL
    )"#,
    "ALTER TABLE n8n_chat_histories ADD COLUMN IF NOT EXISTS created_at TIMESTAMPTZ DEFAULT NOW()",
    "ALTER TABLE n8n_chat_histories ADD COLUMN IF NOT EXISTS updated_at TIMESTAMPTZ DEFAULT NOW()",
    "ALTER TABLE n8n_chat_histories ADD COLUMN IF NOT EXISTS telefone VARCHAR(20)",
    "ALTER TABLE n8n_chat_histories ADD COLUMN IF NOT EXISTS contexto JSONB DEFAULT '{}'::jsonb",
    "ALTER TABLE n8n_chat_histories ADD COLUMN IF NOT EXISTS nome_paciente VARCHAR(255)",
    "ALTER TABLE n8n_chat_histories ADD COLUMN IF NOT EXISTS email_paciente VARCHAR(255)",
    "CREATE INDEX IF NOT EXISTS idx_chat_histories_session_id ON n8n_chat_histories (session_id)",
    "CREATE INDEX IF NOT EXISTS idx_chat_histories_created_at ON n8n_chat_histories (created_at)",
    "CREATE INDEX IF NOT EXISTS idx_chat_histories_telefone ON n8n_chat_histories (telefone)",
    r#"CREATE TABLE IF NOT EXISTS documents (
        id BIGSERIAL PRIMARY KEY,
        content TEXT,
        metadata JSONB DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_documents_metadata ON documents USING GIN (metadata)",
    r#"CREATE TABLE IF NOT EXISTS agendamentos (
        id SERIAL PRIMARY KEY,
        data_agendamento DATE NOT NULL,
        hora_inicio VARCHAR(10) NOT NULL,
        hora_fim VARCHAR(10) NOT NULL,
        profissional_nome TEXT,
        procedimento TEXT,
        status VARCHAR(50) DEFAULT 'confirmado',
        metadata JSONB DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_agendamentos_metadata ON agendamentos USING GIN (metadata)",
    "CREATE INDEX IF NOT EXISTS idx_agendamentos_data_hora ON agendamentos (data_agendamento, hora_inicio)",
];

/// Idempotent DDL, safe to run on every start.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("schema statement failed: {}", first_line(statement)))?;
    }
    Ok(())
}

fn first_line(sql: &str) -> &str {
    sql.lines().next().unwrap_or_default().trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_url_means_disconnected() {
        let db = Database::connect(None).await;
        assert!(!db.is_connected());
        assert!(!db.url_configured());
        assert!(db.pool().is_err());

        let db = Database::connect(Some("   ")).await;
        assert!(!db.is_connected());
    }

    #[test]
    fn schema_covers_every_table() {
        let ddl = SCHEMA.join("\n");
        for table in [
            "agenda_events",
            "profissionais",
            "sync_history",
            "n8n_chat_histories",
            "documents",
            "agendamentos",
        ] {
            assert!(
                ddl.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "missing {table}"
            );
        }
    }
}
