use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info};

use super::Database;
use crate::model::agenda::{
    occupancy_rate, AgendaEventRecord, AgendaStatistics, BusyEvent, BusyFreeCount, EventFilter,
    LastSync, Professional, StoredEvent, StoredProfessional, SyncHistoryEntry, UpcomingWeek,
};

const EVENT_COLUMNS: &str = "id, evento_id, titulo, descricao, data, data_atomic, hora_inicio, \
     hora_fim, hora_inicio_numero, profissional, categoria, paciente_id, dentista_id, tipo, \
     ocupado, deletado, created_at, updated_at";

impl Database {
    /// Inserts or refreshes events keyed by their Clinicorp id. Events without
    /// an id or a start date cannot be stored and are skipped.
    pub async fn upsert_events(
        &self,
        events: &[AgendaEventRecord],
        now: NaiveDateTime,
    ) -> Result<usize> {
        let pool = self.pool()?;
        let mut tx = pool.begin().await?;
        let mut saved = 0;

        for event in events {
            let (Some(evento_id), Some(data)) = (event.id.as_deref(), event.data) else {
                debug!(id = ?event.id, "skipping event without id or date");
                continue;
            };

            sqlx::query(
                r#"INSERT INTO agenda_events (
                    evento_id, titulo, descricao, data, data_atomic, hora_inicio, hora_fim,
                    hora_inicio_numero, profissional, categoria, paciente_id, dentista_id, tipo,
                    ocupado, deletado, dados_originais, created_at, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16::json, $17, $17)
                ON CONFLICT (evento_id) DO UPDATE SET
                    titulo = EXCLUDED.titulo,
                    descricao = EXCLUDED.descricao,
                    data = EXCLUDED.data,
                    data_atomic = EXCLUDED.data_atomic,
                    hora_inicio = EXCLUDED.hora_inicio,
                    hora_fim = EXCLUDED.hora_fim,
                    hora_inicio_numero = EXCLUDED.hora_inicio_numero,
                    profissional = EXCLUDED.profissional,
                    categoria = EXCLUDED.categoria,
                    paciente_id = EXCLUDED.paciente_id,
                    dentista_id = EXCLUDED.dentista_id,
                    tipo = EXCLUDED.tipo,
                    ocupado = EXCLUDED.ocupado,
                    deletado = EXCLUDED.deletado,
                    dados_originais = EXCLUDED.dados_originais,
                    updated_at = EXCLUDED.updated_at"#,
            )
            .bind(evento_id)
            .bind(&event.titulo)
            .bind(&event.descricao)
            .bind(data)
            .bind(event.data_atomic)
            .bind(event.hora_inicio.as_deref())
            .bind(event.hora_fim.as_deref())
            .bind(event.hora_inicio_numero)
            .bind(&event.profissional)
            .bind(&event.categoria)
            .bind(event.paciente_id.as_deref())
            .bind(event.dentista_id.as_deref())
            .bind(&event.tipo)
            .bind(event.ocupado)
            .bind(event.deletado)
            .bind(&event.dados_originais)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to save event {evento_id}"))?;

            saved += 1;
        }

        tx.commit().await?;

        let free_in_db: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM agenda_events WHERE ocupado = FALSE AND deletado = FALSE",
        )
        .fetch_one(pool)
        .await?;
        info!(saved, free_in_db, "events persisted");

        Ok(saved)
    }

    /// Upserts the active professionals and marks every other stored one inactive.
    pub async fn upsert_professionals(
        &self,
        professionals: &[Professional],
        now: NaiveDateTime,
    ) -> Result<usize> {
        let pool = self.pool()?;
        let mut tx = pool.begin().await?;
        let mut ids = Vec::with_capacity(professionals.len());

        for prof in professionals {
            if prof.id.is_empty() {
                continue;
            }
            sqlx::query(
                r#"INSERT INTO profissionais (profissional_id, nome, ativo, dados_originais, created_at, updated_at)
                VALUES ($1, $2, TRUE, $3::json, $4, $4)
                ON CONFLICT (profissional_id) DO UPDATE SET
                    nome = EXCLUDED.nome,
                    ativo = TRUE,
                    dados_originais = EXCLUDED.dados_originais,
                    updated_at = EXCLUDED.updated_at"#,
            )
            .bind(&prof.id)
            .bind(&prof.nome)
            .bind(&prof.dados_originais)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to save professional {}", prof.id))?;
            ids.push(prof.id.clone());
        }

        // An empty batch says nothing about who left the clinic.
        if !ids.is_empty() {
            let deactivated = sqlx::query(
                "UPDATE profissionais SET ativo = FALSE, updated_at = $2 \
                 WHERE ativo = TRUE AND NOT (profissional_id = ANY($1))",
            )
            .bind(&ids)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if deactivated > 0 {
                info!(deactivated, "professionals marked inactive");
            }
        }

        tx.commit().await?;
        Ok(ids.len())
    }

    pub async fn record_sync(&self, entry: &SyncHistoryEntry) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO sync_history (
                timestamp, data_inicio, data_fim, total_eventos, eventos_ocupados,
                eventos_livres, total_profissionais, sucesso, erro
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
        )
        .bind(entry.timestamp)
        .bind(entry.data_inicio)
        .bind(entry.data_fim)
        .bind(entry.total_eventos)
        .bind(entry.eventos_ocupados)
        .bind(entry.eventos_livres)
        .bind(entry.total_profissionais)
        .bind(entry.sucesso)
        .bind(entry.erro.as_deref())
        .execute(self.pool()?)
        .await
        .context("failed to record sync history")?;
        Ok(())
    }

    pub async fn list_events(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM agenda_events \
             WHERE deletado = FALSE \
               AND ($1::boolean IS NULL OR ocupado = $1) \
               AND ($2::timestamp IS NULL OR data >= $2) \
               AND ($3::timestamp IS NULL OR data <= $3) \
             ORDER BY data \
             LIMIT $4"
        );
        let events = sqlx::query_as::<_, StoredEvent>(&sql)
            .bind(filter.ocupado)
            .bind(filter.data_inicio)
            .bind(filter.data_fim)
            .bind(filter.limit)
            .fetch_all(self.pool()?)
            .await?;
        Ok(events)
    }

    /// Busy, non-deleted events starting in `[start, end]`, optionally for one dentist.
    pub async fn busy_events_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        dentist: Option<&str>,
    ) -> Result<Vec<BusyEvent>> {
        let events = sqlx::query_as::<_, BusyEvent>(
            "SELECT data, hora_fim FROM agenda_events \
             WHERE deletado = FALSE AND ocupado = TRUE \
               AND data >= $1 AND data <= $2 \
               AND ($3::varchar IS NULL OR dentista_id = $3) \
             ORDER BY data",
        )
        .bind(start)
        .bind(end)
        .bind(dentist)
        .fetch_all(self.pool()?)
        .await?;
        Ok(events)
    }

    pub async fn active_professionals(&self) -> Result<Vec<StoredProfessional>> {
        let rows = sqlx::query_as::<_, StoredProfessional>(
            "SELECT profissional_id, nome FROM profissionais WHERE ativo = TRUE ORDER BY nome",
        )
        .fetch_all(self.pool()?)
        .await?;
        Ok(rows)
    }

    pub async fn statistics(&self, today: NaiveDateTime) -> Result<AgendaStatistics> {
        let pool = self.pool()?;

        let (total, busy): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE ocupado) \
             FROM agenda_events WHERE deletado = FALSE",
        )
        .fetch_one(pool)
        .await?;

        let active: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM profissionais WHERE ativo = TRUE")
                .fetch_one(pool)
                .await?;

        let per_dentist: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT dentista_id, COUNT(*) FILTER (WHERE ocupado), COUNT(*) FILTER (WHERE NOT ocupado) \
             FROM agenda_events \
             WHERE deletado = FALSE AND dentista_id IS NOT NULL AND dentista_id <> '' \
             GROUP BY dentista_id",
        )
        .fetch_all(pool)
        .await?;

        let (week_total, week_busy): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE ocupado) \
             FROM agenda_events WHERE deletado = FALSE AND data >= $1 AND data <= $2",
        )
        .bind(today)
        .bind(today + Duration::days(7))
        .fetch_one(pool)
        .await?;

        let last: Option<(NaiveDateTime, Option<bool>, Option<i32>, Option<i32>, Option<String>)> =
            sqlx::query_as(
                "SELECT timestamp, sucesso, total_eventos, total_profissionais, erro \
                 FROM sync_history ORDER BY timestamp DESC LIMIT 1",
            )
            .fetch_optional(pool)
            .await?;

        let ultima_sincronizacao = match last {
            Some((timestamp, sucesso, total_eventos, total_profissionais, erro)) => LastSync {
                timestamp: Some(timestamp),
                sucesso,
                total_eventos,
                total_profissionais,
                erro: erro.filter(|e| !e.is_empty()),
            },
            None => LastSync::default(),
        };

        let eventos_por_profissional: BTreeMap<String, BusyFreeCount> = per_dentist
            .into_iter()
            .map(|(id, ocupados, livres)| (id, BusyFreeCount { ocupados, livres }))
            .collect();

        Ok(AgendaStatistics {
            total_eventos: total,
            eventos_ocupados: busy,
            eventos_livres: total - busy,
            taxa_ocupacao: occupancy_rate(busy, total),
            total_profissionais_ativos: active,
            eventos_por_profissional,
            proximos_7_dias: UpcomingWeek {
                total_eventos: week_total,
                eventos_ocupados: week_busy,
                eventos_disponiveis: week_total - week_busy,
            },
            ultima_sincronizacao,
        })
    }
}
