use axum::{extract::rejection::JsonRejection, Json};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::clinicorp::{agenda::parse_time, jwt::value_to_id};
use crate::error::{ApiError, ApiResult};
use crate::model::appointment::NewAppointment;

pub const DEFAULT_HORA_INICIO: u32 = 9;
pub const DEFAULT_HORA_FIM: u32 = 18;
pub const DEFAULT_EVENT_LIMIT: i64 = 100;
pub const DEFAULT_DIAS_FUTUROS: u32 = 3;
pub const MAX_DIAS_FUTUROS: u32 = 31;

const INVALID_DATE: &str = "Formato de data invalido. Use YYYY-MM-DD";
const NEW_PATIENT_NEEDS_PHONE: &str =
    "Campo \"telefone\" e obrigatorio para cadastrar novo paciente (sem \"paciente_id\")";
const WHATSAPP_PATIENT_HINT: &str = "Para agendamentos via WhatsApp, é necessário ter o paciente \
     cadastrado no sistema primeiro. Entre em contato com o suporte para cadastro.";

#[derive(Debug, Default, Deserialize)]
pub struct PhoneQuery {
    pub telefone: Option<String>,
}

impl PhoneQuery {
    pub fn required(&self) -> ApiResult<String> {
        required_phone(self.telefone.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub telefone: Option<String>,
    pub dias: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub ocupado: Option<String>,
    pub data_inicio: Option<String>,
    pub data_fim: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SlotsQuery {
    pub data: Option<String>,
    pub hora_inicio: Option<String>,
    pub hora_fim: Option<String>,
    pub profissional_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProfessionalsQuery {
    pub usar_cache: Option<String>,
    pub forcar_atualizacao: Option<String>,
    pub com_agendas: Option<String>,
    pub data: Option<String>,
    pub dias_futuros: Option<String>,
    pub hora_inicio: Option<String>,
    pub hora_fim: Option<String>,
}

/// Body of `POST /api/agenda/criar`. Ids arrive as strings or numbers.
#[derive(Debug, Default, Deserialize)]
pub struct CreateAppointmentBody {
    #[serde(default)]
    pub paciente_id: Value,
    #[serde(default)]
    pub nome_paciente: Option<String>,
    #[serde(default)]
    pub profissional_id: Value,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub hora_inicio: Option<String>,
    #[serde(default)]
    pub hora_fim: Option<String>,
    #[serde(default)]
    pub observacoes: Option<String>,
    #[serde(default)]
    pub procedimentos: Vec<Value>,
    #[serde(default)]
    pub telefone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SaveNameBody {
    #[serde(default)]
    pub telefone: Option<String>,
    #[serde(default)]
    pub nome: Option<String>,
}

/// Unwraps a JSON body, turning any extractor rejection into the usual 400.
pub fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    body.map(|Json(inner)| inner)
        .map_err(|_| ApiError::bad_request("Body JSON e obrigatorio"))
}

pub fn required_phone(value: Option<&str>) -> ApiResult<String> {
    trimmed(value).ok_or_else(|| ApiError::missing_param("telefone"))
}

/// `"10"` or `"10:00"` → 10; anything else → `default`.
pub fn parse_hour_param(value: Option<&str>, default: u32) -> u32 {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return default;
    };
    value
        .split(':')
        .next()
        .and_then(|hour| hour.trim().parse().ok())
        .unwrap_or(default)
}

/// Only a case-insensitive `"true"` is true; absent means `default`.
pub fn parse_flag(value: Option<&str>, default: bool) -> bool {
    match value {
        Some(v) => v.trim().eq_ignore_ascii_case("true"),
        None => default,
    }
}

pub fn parse_day(value: &str) -> ApiResult<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| ApiError::bad_request(INVALID_DATE))
}

/// ISO date (`2025-11-25`) or datetime (`2025-11-25T10:00:00`).
pub fn parse_datetime_param(value: &str) -> ApiResult<NaiveDateTime> {
    let value = value.trim();
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|d| d.and_time(NaiveTime::MIN))
        .map_err(|_| ApiError::bad_request(INVALID_DATE))
}

pub fn parse_limit(value: Option<&str>) -> ApiResult<i64> {
    match trimmed(value) {
        None => Ok(DEFAULT_EVENT_LIMIT),
        Some(v) => v
            .parse()
            .map_err(|_| ApiError::bad_request("Parametro \"limit\" deve ser numerico")),
    }
}

pub fn parse_days(value: Option<&str>, default: u32) -> ApiResult<u32> {
    match trimmed(value) {
        None => Ok(default),
        Some(v) => v
            .parse::<u32>()
            .map(|d| d.clamp(1, MAX_DIAS_FUTUROS))
            .map_err(|_| ApiError::bad_request("Parametro \"dias_futuros\" deve ser numerico")),
    }
}

impl CreateAppointmentBody {
    /// Checks required fields in the order the API documents them.
    pub fn validate(self) -> ApiResult<NewAppointment> {
        let paciente_id = value_to_id(&self.paciente_id);
        let nome_paciente = trimmed(self.nome_paciente.as_deref());
        let telefone = trimmed(self.telefone.as_deref()).unwrap_or_default();

        if paciente_id.is_none() && nome_paciente.is_none() {
            if telefone.is_empty() {
                return Err(ApiError::missing_field("paciente_id"));
            }
            let mut extra = Map::new();
            extra.insert("detalhes".into(), Value::String(WHATSAPP_PATIENT_HINT.into()));
            extra.insert("telefone_informado".into(), Value::String(telefone));
            return Err(ApiError::BadRequestWith {
                message: "Campo \"paciente_id\" e obrigatorio".into(),
                extra,
            });
        }
        if paciente_id.is_none() && telefone.is_empty() {
            return Err(ApiError::bad_request(NEW_PATIENT_NEEDS_PHONE));
        }

        let profissional_id =
            value_to_id(&self.profissional_id).ok_or_else(|| ApiError::missing_field("profissional_id"))?;
        let data = trimmed(self.data.as_deref())
            .ok_or_else(|| ApiError::bad_request("Campo \"data\" e obrigatorio (formato: YYYY-MM-DD)"))?;
        let hora_inicio = required_time(self.hora_inicio.as_deref(), "hora_inicio")?;
        let hora_fim = required_time(self.hora_fim.as_deref(), "hora_fim")?;
        let data = NaiveDate::parse_from_str(&data, "%Y-%m-%d")
            .map_err(|err| ApiError::bad_request(format!("Formato de data invalido: {err}")))?;

        Ok(NewAppointment {
            paciente_id,
            nome_paciente,
            profissional_id,
            data,
            hora_inicio,
            hora_fim,
            observacoes: self.observacoes.unwrap_or_default(),
            procedimentos: self.procedimentos.iter().filter_map(value_to_id).collect(),
            telefone,
            email: trimmed(self.email.as_deref()).unwrap_or_default(),
        })
    }
}

fn required_time(value: Option<&str>, field: &str) -> ApiResult<String> {
    trimmed(value)
        .filter(|v| parse_time(v).is_some())
        .ok_or_else(|| ApiError::bad_request(format!("Campo \"{field}\" e obrigatorio (formato: HH:MM)")))
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
