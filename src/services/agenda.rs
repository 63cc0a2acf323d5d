use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::clinicorp::{ClinicorpClient, HourWindow};
use crate::db::{Database, NOT_CONNECTED};
use crate::model::agenda::{
    AgendaStatistics, EventFilter, Professional, ProfessionalSummary, StoredEvent, SyncHistoryEntry,
    SyncReport,
};
use crate::model::appointment::{AppointmentResult, NewAppointment};
use crate::services::slots::{available_slots, Slot};

const SYNC_DAYS_AHEAD: i64 = 30;
pub const MAX_EVENT_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct DayAgenda {
    pub data: String,
    pub total_disponiveis: usize,
    pub agendas: Vec<Slot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfessionalAgenda {
    pub id: String,
    pub nome: String,
    pub total_dias_com_disponibilidade: usize,
    pub agendas_por_dia: Vec<DayAgenda>,
}

/// Keeps the local agenda mirror in step with Clinicorp and answers
/// availability questions from it.
pub struct AgendaService {
    db: Database,
    clinicorp: Arc<ClinicorpClient>,
    sync_lock: Mutex<()>,
    offset: FixedOffset,
}

impl AgendaService {
    pub fn new(db: Database, clinicorp: Arc<ClinicorpClient>, offset: FixedOffset) -> Self {
        Self {
            db,
            clinicorp,
            sync_lock: Mutex::new(()),
            offset,
        }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    // ============================================================
    // SYNC
    // ============================================================

    /// Pulls professionals and the next 30 days of agenda into the database.
    /// Concurrent calls queue behind each other.
    pub async fn sync(&self) -> SyncReport {
        let _guard = self.sync_lock.lock().await;
        let now = self.now();
        let timestamp = now.to_rfc3339();

        if !self.db.is_connected() {
            warn!("database not connected, skipping sync");
            return SyncReport::failed(timestamp, NOT_CONNECTED);
        }

        info!("starting agenda sync");
        match self.run_sync(now).await {
            Ok(report) => report,
            Err(err) => {
                let message = format!("{err:#}");
                error!(error = %message, "agenda sync failed");
                let entry = self.history_entry(now, 0, 0, 0, 0, Some(message.clone()));
                if let Err(err) = self.db.record_sync(&entry).await {
                    error!(error = %err, "could not record failed sync");
                }
                SyncReport::failed(self.now().to_rfc3339(), message)
            }
        }
    }

    async fn run_sync(&self, now: DateTime<FixedOffset>) -> Result<SyncReport> {
        let stamp = now.naive_local();

        let professionals = self.clinicorp.list_professionals().await?;
        let professionals_saved = self.db.upsert_professionals(&professionals, stamp).await?;
        info!(saved = professionals_saved, "professionals updated");

        let today = now.date_naive();
        let events = self
            .clinicorp
            .list_appointments(today, today + Duration::days(SYNC_DAYS_AHEAD), HourWindow::default())
            .await?;

        let mut per_dentist: HashMap<&str, (usize, usize)> = HashMap::new();
        for event in &events {
            if let Some(dentist) = event.dentista_id.as_deref() {
                let counts = per_dentist.entry(dentist).or_default();
                if event.ocupado {
                    counts.0 += 1;
                } else {
                    counts.1 += 1;
                }
            }
        }
        for prof in &professionals {
            let (busy, free) = per_dentist.get(prof.id.as_str()).copied().unwrap_or_default();
            info!(nome = %prof.nome, ocupados = busy, livres = free, "professional agenda");
        }

        let busy = events.iter().filter(|e| e.ocupado).count();
        let free = events.len() - busy;
        for event in events.iter().filter(|e| !e.ocupado).take(5) {
            info!(
                data = ?event.data,
                hora = event.hora_inicio.as_deref().unwrap_or("N/A"),
                titulo = %event.titulo,
                "free block"
            );
        }

        let saved = self.db.upsert_events(&events, stamp).await?;

        let entry = self.history_entry(
            now,
            events.len(),
            busy,
            free,
            professionals.len(),
            None,
        );
        self.db.record_sync(&entry).await?;

        info!(
            profissionais = professionals.len(),
            eventos = events.len(),
            ocupados = busy,
            livres = free,
            "agenda sync finished"
        );

        Ok(SyncReport {
            timestamp: now.to_rfc3339(),
            sucesso: true,
            erro: None,
            total_profissionais: Some(professionals.len()),
            profissionais_salvos: Some(professionals_saved),
            total_eventos: Some(events.len()),
            eventos_ocupados: Some(busy),
            eventos_livres: Some(free),
            eventos_salvos: Some(saved),
        })
    }

    fn history_entry(
        &self,
        now: DateTime<FixedOffset>,
        total: usize,
        busy: usize,
        free: usize,
        professionals: usize,
        erro: Option<String>,
    ) -> SyncHistoryEntry {
        let today = now.date_naive();
        SyncHistoryEntry {
            timestamp: now.naive_local(),
            data_inicio: today.and_time(NaiveTime::MIN),
            data_fim: (today + Duration::days(SYNC_DAYS_AHEAD)).and_time(NaiveTime::MIN),
            total_eventos: total as i32,
            eventos_ocupados: busy as i32,
            eventos_livres: free as i32,
            total_profissionais: professionals as i32,
            sucesso: erro.is_none(),
            erro,
        }
    }

    // ============================================================
    // QUERIES
    // ============================================================

    pub async fn events(&self, filter: EventFilter) -> Vec<StoredEvent> {
        if !self.db.is_connected() {
            return Vec::new();
        }
        let filter = EventFilter {
            limit: filter.limit.clamp(1, MAX_EVENT_LIMIT),
            ..filter
        };
        self.db.list_events(&filter).await.unwrap_or_else(|err| {
            error!(error = %err, "failed to list events");
            Vec::new()
        })
    }

    /// `None` when the database is unavailable.
    pub async fn statistics(&self) -> Option<AgendaStatistics> {
        if !self.db.is_connected() {
            error!(url_configured = self.db.url_configured(), "database not connected, no statistics");
            return None;
        }
        let today = self.today().and_time(NaiveTime::MIN);
        match self.db.statistics(today).await {
            Ok(stats) => Some(stats),
            Err(err) => {
                error!(error = %err, "failed to compute statistics");
                None
            }
        }
    }

    pub async fn available_slots(
        &self,
        day: NaiveDate,
        hora_inicio: u32,
        hora_fim: u32,
        professional: Option<&str>,
    ) -> Vec<Slot> {
        if !self.db.is_connected() {
            error!("database not connected, no available slots");
            return Vec::new();
        }

        let start = day.and_time(NaiveTime::MIN);
        let end = start + Duration::days(1) - Duration::seconds(1);
        let busy = match self.db.busy_events_between(start, end, professional).await {
            Ok(busy) => busy,
            Err(err) => {
                error!(error = %err, "failed to load busy events");
                return Vec::new();
            }
        };

        let now = self.now().naive_local();
        let slots = available_slots(day, hora_inicio, hora_fim, &busy, now);
        info!(
            %day,
            profissional = professional.unwrap_or("-"),
            ocupados = busy.len(),
            disponiveis = slots.len(),
            "available slots computed"
        );
        slots
    }

    // ============================================================
    // PROFESSIONALS
    // ============================================================

    /// Active professionals. The cached table is used unless refresh is forced,
    /// and refreshed first when it holds names that look like agenda titles.
    pub async fn professionals(&self, use_cache: bool, force_refresh: bool) -> Vec<ProfessionalSummary> {
        if force_refresh {
            info!("forcing professionals refresh from Clinicorp");
            return self.fetch_professionals().await;
        }

        if use_cache && self.db.is_connected() {
            match self.db.active_professionals().await {
                Ok(rows) if !rows.is_empty() => {
                    let suspicious = rows.iter().filter(|p| has_suspicious_name(&p.nome)).count();
                    if suspicious > 0 {
                        warn!(suspicious, "cached professionals with bad names, refreshing");
                        if !self.fetch_professionals().await.is_empty() {
                            match self.db.active_professionals().await {
                                Ok(fresh) => return fresh.into_iter().map(Into::into).collect(),
                                Err(err) => warn!(error = %err, "failed to reload professionals"),
                            }
                        }
                    }
                    info!(total = rows.len(), "professionals from database");
                    return rows.into_iter().map(Into::into).collect();
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "failed to read cached professionals"),
            }
        }

        self.fetch_professionals().await
    }

    async fn fetch_professionals(&self) -> Vec<ProfessionalSummary> {
        let professionals: Vec<Professional> = match self.clinicorp.list_professionals().await {
            Ok(list) => list,
            Err(err) => {
                error!(error = %err, "failed to list professionals");
                return Vec::new();
            }
        };

        if self.db.is_connected() && !professionals.is_empty() {
            let stamp: NaiveDateTime = self.now().naive_local();
            if let Err(err) = self.db.upsert_professionals(&professionals, stamp).await {
                error!(error = %err, "failed to persist professionals");
            }
        }

        professionals.into_iter().map(Into::into).collect()
    }

    /// Every professional with free slots for `days_ahead` days starting at `start`.
    /// Professionals without availability are still listed.
    pub async fn professionals_with_slots(
        &self,
        start: NaiveDate,
        hora_inicio: u32,
        hora_fim: u32,
        use_cache: bool,
        days_ahead: u32,
    ) -> Vec<ProfessionalAgenda> {
        let professionals = self.professionals(use_cache, false).await;
        let mut result = Vec::with_capacity(professionals.len());

        for prof in professionals {
            let mut days = Vec::with_capacity(days_ahead as usize);
            for offset in 0..days_ahead {
                let day = start + Duration::days(offset as i64);
                let agendas = self
                    .available_slots(day, hora_inicio, hora_fim, Some(&prof.id))
                    .await;
                days.push(DayAgenda {
                    data: day.format("%Y-%m-%d").to_string(),
                    total_disponiveis: agendas.len(),
                    agendas,
                });
            }

            result.push(ProfessionalAgenda {
                total_dias_com_disponibilidade: days.iter().filter(|d| d.total_disponiveis > 0).count(),
                id: prof.id,
                nome: prof.nome,
                agendas_por_dia: days,
            });
        }

        info!(total = result.len(), days_ahead, "professionals with agenda");
        result
    }

    // ============================================================
    // APPOINTMENTS
    // ============================================================

    pub async fn create_appointment(&self, request: &NewAppointment) -> AppointmentResult {
        let result = match self.clinicorp.create_appointment(request).await {
            Ok(result) => result,
            Err(err) => {
                error!(error = %err, "failed to create appointment");
                return AppointmentResult::failed(err.to_string());
            }
        };

        if result.sucesso && self.db.is_connected() {
            if let Err(err) = self
                .db
                .record_appointment(
                    request,
                    result.agendamento_id.as_ref(),
                    result.paciente_id.as_ref(),
                )
                .await
            {
                warn!(error = %format!("{err:#}"), "appointment created but not recorded locally");
            }
        }
        result
    }
}

/// Names that come from agenda titles rather than the person registry.
pub fn has_suspicious_name(nome: &str) -> bool {
    let lower = nome.to_lowercase();
    nome.starts_with("Profissional ")
        || lower == "folga"
        || lower == "niver bella <3"
        || nome.trim().chars().count() < 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{clinic_offset, Config};

    fn service() -> AgendaService {
        let cfg = Config::from_lookup(|key| match key {
            "CLINICORP_API_URL" => Some("http://127.0.0.1:9".to_string()),
            "CLINICORP_BASE_URL" => Some("http://127.0.0.1:9".to_string()),
            _ => None,
        });
        let client = ClinicorpClient::new(cfg.clinicorp.clone(), cfg.utc_offset_minutes).unwrap();
        AgendaService::new(Database::disconnected(), Arc::new(client), clinic_offset(-180))
    }

    #[test]
    fn suspicious_names() {
        assert!(has_suspicious_name("Profissional 123"));
        assert!(has_suspicious_name("FOLGA"));
        assert!(has_suspicious_name("Niver Bella <3"));
        assert!(has_suspicious_name("Jo"));
        assert!(!has_suspicious_name("Dra. Bella Martins"));
    }

    #[tokio::test]
    async fn disconnected_database_degrades() {
        let svc = service();
        let report = svc.sync().await;
        assert!(!report.sucesso);
        assert_eq!(report.erro.as_deref(), Some(NOT_CONNECTED));

        assert!(svc.events(EventFilter { limit: 100, ..Default::default() }).await.is_empty());
        assert!(svc.statistics().await.is_none());
        assert!(svc.available_slots(svc.today(), 9, 18, None).await.is_empty());
    }
}
