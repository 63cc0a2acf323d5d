use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One appointment/time block as read from Clinicorp, normalised.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgendaEventRecord {
    pub id: Option<String>,
    pub titulo: String,
    pub descricao: String,
    pub data: Option<NaiveDateTime>,
    pub data_atomic: Option<i32>,
    pub hora_inicio: Option<String>,
    pub hora_fim: Option<String>,
    pub hora_inicio_numero: Option<i32>,
    pub profissional: String,
    pub categoria: String,
    pub paciente_id: Option<String>,
    pub dentista_id: Option<String>,
    pub tipo: String,
    pub ocupado: bool,
    pub deletado: bool,
    #[serde(skip_serializing)]
    pub dados_originais: Value,
}

/// Row of `agenda_events`.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredEvent {
    pub id: i32,
    pub evento_id: String,
    pub titulo: Option<String>,
    pub descricao: Option<String>,
    pub data: NaiveDateTime,
    pub data_atomic: Option<i32>,
    pub hora_inicio: Option<String>,
    pub hora_fim: Option<String>,
    pub hora_inicio_numero: Option<i32>,
    pub profissional: Option<String>,
    pub categoria: Option<String>,
    pub paciente_id: Option<String>,
    pub dentista_id: Option<String>,
    pub tipo: Option<String>,
    pub ocupado: bool,
    pub deletado: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Busy block used for slot computation.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BusyEvent {
    pub data: NaiveDateTime,
    pub hora_fim: Option<String>,
}

/// Active dentist as returned by Clinicorp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Professional {
    pub id: String,
    pub nome: String,
    pub email: String,
    pub telefone: String,
    pub cor: String,
    pub horarios_ocupados: Value,
    #[serde(skip_serializing)]
    pub dados_originais: Value,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredProfessional {
    pub profissional_id: String,
    pub nome: String,
}

/// `{id, nome}` where `id` is always the Clinicorp person id.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProfessionalSummary {
    pub id: String,
    pub nome: String,
}

impl From<Professional> for ProfessionalSummary {
    fn from(p: Professional) -> Self {
        Self { id: p.id, nome: p.nome }
    }
}

impl From<StoredProfessional> for ProfessionalSummary {
    fn from(p: StoredProfessional) -> Self {
        Self {
            id: p.profissional_id,
            nome: p.nome,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub ocupado: Option<bool>,
    pub data_inicio: Option<NaiveDateTime>,
    pub data_fim: Option<NaiveDateTime>,
    pub limit: i64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SyncReport {
    pub timestamp: String,
    pub sucesso: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erro: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_profissionais: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profissionais_salvos: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_eventos: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eventos_ocupados: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eventos_livres: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eventos_salvos: Option<usize>,
}

impl SyncReport {
    pub fn failed(timestamp: String, erro: impl Into<String>) -> Self {
        Self {
            timestamp,
            sucesso: false,
            erro: Some(erro.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncHistoryEntry {
    pub timestamp: NaiveDateTime,
    pub data_inicio: NaiveDateTime,
    pub data_fim: NaiveDateTime,
    pub total_eventos: i32,
    pub eventos_ocupados: i32,
    pub eventos_livres: i32,
    pub total_profissionais: i32,
    pub sucesso: bool,
    pub erro: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct BusyFreeCount {
    pub ocupados: i64,
    pub livres: i64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct UpcomingWeek {
    pub total_eventos: i64,
    pub eventos_ocupados: i64,
    pub eventos_disponiveis: i64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct LastSync {
    pub timestamp: Option<NaiveDateTime>,
    pub sucesso: Option<bool>,
    pub total_eventos: Option<i32>,
    pub total_profissionais: Option<i32>,
    pub erro: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct AgendaStatistics {
    pub total_eventos: i64,
    pub eventos_ocupados: i64,
    pub eventos_livres: i64,
    pub taxa_ocupacao: f64,
    pub total_profissionais_ativos: i64,
    pub eventos_por_profissional: BTreeMap<String, BusyFreeCount>,
    pub proximos_7_dias: UpcomingWeek,
    pub ultima_sincronizacao: LastSync,
}

/// Occupancy in percent rounded to two decimals.
pub fn occupancy_rate(busy: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (busy as f64 / total as f64 * 10_000.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::occupancy_rate;

    #[test]
    fn occupancy_is_rounded_percent() {
        assert_eq!(occupancy_rate(0, 0), 0.0);
        assert_eq!(occupancy_rate(1, 3), 33.33);
        assert_eq!(occupancy_rate(2, 3), 66.67);
        assert_eq!(occupancy_rate(5, 5), 100.0);
    }
}
