use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{jwt, ClinicorpClient, ClinicorpError, ClinicorpResult, SESSION_ACTIVE};
use crate::config::clinic_offset;
use crate::model::agenda::{AgendaEventRecord, Professional};
use crate::model::appointment::{AppointmentResult, NewAppointment};

const APPOINTMENT_LIST: &str = "/solution/api/appointment/list";
const APPOINTMENT_CREATE: &str = "/solution/api/appointment/create";
const PERSON_LIST_BY_TYPE: &str = "/solution/api/core/person/list_by_type";
const PATIENT_SEARCH: &str = "/solution/api/patient/search";
const USER_ME: &str = "/security/user/me";

const USER_ME_CLINIC_PATHS: &[&[&str]] = &[
    &["clinic_id"],
    &["ClinicId"],
    &["user", "clinic_id"],
    &["user", "ClinicId"],
    &["user", "NamespaceId"],
];

/// Opening hours filter: events must start in `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl Default for HourWindow {
    fn default() -> Self {
        Self { start: 9, end: 18 }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PatientMatch {
    pub id: Option<String>,
    pub nome: String,
    pub telefone: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub dados_originais: Value,
}

impl PatientMatch {
    fn from_raw(raw: &Value) -> Self {
        Self {
            id: raw.get("id").and_then(jwt::value_to_id),
            nome: str_field(raw, "Name"),
            telefone: str_field(raw, "MobilePhone"),
            email: str_field(raw, "Email"),
            dados_originais: raw.clone(),
        }
    }
}

impl ClinicorpClient {
    /// Appointments and time blocks between two days (inclusive), limited to `window`.
    pub async fn list_appointments(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        window: HourWindow,
    ) -> ClinicorpResult<Vec<AgendaEventRecord>> {
        let clinic_id = self.clinic_id().await?;
        info!(%from, %to, start = window.start, end = window.end, "fetching Clinicorp agenda");

        let query = [
            ("from", from.format("%Y-%m-%d").to_string()),
            ("to", to.format("%Y-%m-%d").to_string()),
            ("clinic_id", clinic_id),
            ("canceled", String::new()),
            ("__caller", "AppointmentBook.getAppointments".to_string()),
            ("_AccessPath", "*.Calendar.Use".to_string()),
            ("without_status", "X".to_string()),
        ];
        let data: Value = self
            .get(APPOINTMENT_LIST, &query)
            .await?
            .error_for_status()?
            .json()?;

        let events: Vec<AgendaEventRecord> = list_items(&data, &["list", "data", "appointments", "events"])
            .iter()
            .filter_map(|raw| parse_appointment(raw, window))
            .collect();
        info!(eventos = events.len(), "agenda events parsed");
        Ok(events)
    }

    /// Active dentists, with their busy-slot hints.
    pub async fn list_professionals(&self) -> ClinicorpResult<Vec<Professional>> {
        let query = [
            ("type", "DENTIST".to_string()),
            ("professionalToBeDefined", "X".to_string()),
        ];
        let data: Value = self
            .get(PERSON_LIST_BY_TYPE, &query)
            .await?
            .error_for_status()?
            .json()?;

        let professionals: Vec<Professional> = list_items(&data, &["list"])
            .iter()
            .filter_map(parse_professional)
            .collect();

        info!(total = professionals.len(), "active professionals fetched");
        for prof in professionals.iter().take(5) {
            debug!(id = %prof.id, nome = %prof.nome, "professional");
        }
        Ok(professionals)
    }

    pub async fn search_patients(&self, name: &str) -> ClinicorpResult<Vec<PatientMatch>> {
        let name = name.trim();
        if name.chars().count() < 2 {
            warn!("patient search term too short");
            return Ok(Vec::new());
        }
        let patients = self.patient_search(name).await?;
        info!(total = patients.len(), "patients found by name");
        Ok(patients)
    }

    /// Patient whose mobile or landline number matches `phone`, comparing digits only.
    pub async fn find_patient_by_phone(&self, phone: &str) -> ClinicorpResult<Option<PatientMatch>> {
        let digits = only_digits(phone);
        if digits.is_empty() {
            warn!("empty phone for patient search");
            return Ok(None);
        }

        let found = self
            .patient_search(&digits)
            .await?
            .into_iter()
            .find(|patient| phone_matches(&digits, &patient.dados_originais));

        match &found {
            Some(patient) => info!(id = ?patient.id, nome = %patient.nome, "patient found by phone"),
            None => info!(telefone = %phone, "no patient for phone"),
        }
        Ok(found)
    }

    async fn patient_search(&self, term: &str) -> ClinicorpResult<Vec<PatientMatch>> {
        let query = [("name", term.to_string()), ("onlyPatient", "true".to_string())];
        let data: Value = self
            .get(PATIENT_SEARCH, &query)
            .await?
            .error_for_status()?
            .json()?;
        Ok(list_items(&data, &["list", "data"])
            .iter()
            .filter(|raw| raw.is_object())
            .map(PatientMatch::from_raw)
            .collect())
    }

    /// Configured clinic id, else the token's, else `/security/user/me`.
    pub async fn clinic_id(&self) -> ClinicorpResult<String> {
        if let Some(id) = self.config.clinic_id.as_ref() {
            return Ok(id.clone());
        }

        if let Some(id) = self.token_claims().await.as_ref().and_then(jwt::clinic_id) {
            debug!(clinic_id = %id, "clinic id from token");
            return Ok(id);
        }

        let me: Value = self.get(USER_ME, &[]).await?.error_for_status()?.json()?;
        let from_me = USER_ME_CLINIC_PATHS.iter().find_map(|path| {
            path.iter()
                .try_fold(&me, |node, key| node.get(*key))
                .and_then(jwt::value_to_id)
        });

        match from_me {
            Some(id) => {
                info!(clinic_id = %id, "clinic id from user profile");
                Ok(id)
            }
            None => Err(ClinicorpError::MissingIdentity("clinic_id")),
        }
    }

    /// User recorded as the appointment creator.
    pub async fn user_id(&self) -> ClinicorpResult<i64> {
        if let Some(id) = self.token_claims().await.as_ref().and_then(jwt::user_id) {
            return Ok(id);
        }
        self.config
            .user_id
            .ok_or(ClinicorpError::MissingIdentity("user_id"))
    }

    async fn token_claims(&self) -> Option<jwt::Claims> {
        let token = match self.cached_token().await {
            Some(token) => token,
            None => self.current_token().await.ok()?,
        };
        if token == SESSION_ACTIVE {
            return None;
        }
        jwt::decode_claims(&token)
    }

    /// Books a slot. Without `paciente_id` a patient matching the phone is reused,
    /// otherwise Clinicorp registers a new patient from name and phone.
    pub async fn create_appointment(
        &self,
        request: &NewAppointment,
    ) -> ClinicorpResult<AppointmentResult> {
        let clinic_id = self.clinic_id().await?;
        let user_id = self.user_id().await?;

        let start = parse_time(&request.hora_inicio).ok_or_else(|| {
            ClinicorpError::InvalidRequest(format!("hora_inicio invalida: {}", request.hora_inicio))
        })?;
        let local = NaiveDateTime::new(request.data, start);
        let to_test_date = clinic_offset(self.tz_offset_minutes)
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.with_timezone(&Utc).to_rfc3339())
            .ok_or_else(|| ClinicorpError::InvalidRequest("data invalida".to_string()))?;

        let dentist: i64 = request.profissional_id.trim().parse().map_err(|_| {
            ClinicorpError::InvalidRequest(format!(
                "profissional_id invalido: {}",
                request.profissional_id
            ))
        })?;

        let nome = request.nome_paciente.as_deref().unwrap_or_default().trim();
        let mut paciente_id = request.paciente_id.clone().filter(|id| !id.trim().is_empty());
        let mut is_new = paciente_id.is_none() && !nome.is_empty() && !request.telefone.is_empty();

        if is_new {
            match self.find_patient_by_phone(&request.telefone).await {
                Ok(Some(found)) if found.id.is_some() => {
                    info!(id = ?found.id, nome = %found.nome, "reusing existing patient");
                    paciente_id = found.id;
                    is_new = false;
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "patient lookup by phone failed, creating new patient"),
            }
        }

        let mut payload = json!({
            "Slots": [{
                "fromTime": request.hora_inicio,
                "toTime": request.hora_fim,
                "ScheduleToId": dentist,
                "Name": "",
                "Color": "",
                "Dentist_PersonId": dentist,
            }],
            "ScheduleToType": "PROFESSIONAL",
            "ScheduleToId": dentist,
            "AtomicDate": atomic_date(request.data),
            "Clinic_BusinessId": numeric_or_string(&clinic_id),
            "AddInfo": {"AddInfo1": "Confirmation,"},
            "AlertInfo": {
                "ConfirmSchedule": "1D",
                "AlertSchedule": "0H",
                "ConfirmWhats": "",
                "ConfirmSms": "X",
                "AlertWhats": "",
                "AlertSms": "",
                "AlertCliniMe": "",
                "ConfirmCliniMe": "",
            },
            "Email": request.email,
            "MobilePhone": request.telefone,
            "CreateUserId": user_id,
            "ToTestDate": to_test_date,
            "ProceduresDuration": 0,
            "CreatedBy": "WEB",
            "_AccessPath": "*.Calendar.Appointment.Create",
        });

        match (&paciente_id, is_new) {
            (Some(id), _) => {
                payload["Patient_PersonId"] = numeric_or_string(id);
                info!(paciente_id = %id, profissional = dentist, data = %request.data, hora = %request.hora_inicio, "creating appointment");
            }
            (None, true) => {
                payload["isNew"] = json!("X");
                payload["Name"] = json!(nome);
                info!(nome = %nome, telefone = %request.telefone, profissional = dentist, data = %request.data, "creating appointment with new patient");
            }
            (None, false) if nome.is_empty() => {
                return Err(ClinicorpError::InvalidRequest(
                    "Nome do paciente é obrigatório para criar novo paciente".to_string(),
                ));
            }
            (None, false) => {
                return Err(ClinicorpError::InvalidRequest(
                    "Telefone do paciente é obrigatório para criar novo paciente".to_string(),
                ));
            }
        }

        let response = self.post(APPOINTMENT_CREATE, &payload).await?.error_for_status()?;

        let Ok(resultado) = serde_json::from_str::<Value>(&response.body) else {
            info!("appointment created (non-JSON response)");
            return Ok(AppointmentResult {
                sucesso: true,
                resultado: Some(Value::String(response.body)),
                ..Default::default()
            });
        };

        let created_patient = first_present(&resultado, &["PatientId", "patient_id"]);
        let paciente_nome = first_str(&resultado, &["PatientName", "patient_name"])
            .or_else(|| (!nome.is_empty()).then(|| nome.to_string()));
        let agendamento_id = first_present(&resultado, &["id", "AppointmentId"]);

        info!(agendamento_id = ?agendamento_id, "appointment created");
        Ok(AppointmentResult {
            sucesso: true,
            agendamento_id,
            paciente_id: created_patient.or_else(|| paciente_id.map(Value::String)),
            paciente_nome,
            resultado: Some(resultado),
            erro: None,
        })
    }
}

/// Turns one raw Clinicorp appointment into a record, or `None` when it is
/// not an object or starts outside `window`.
pub fn parse_appointment(raw: &Value, window: HourWindow) -> Option<AgendaEventRecord> {
    if !raw.is_object() {
        return None;
    }

    let atomic = first_present(raw, &["AtomicDate", "atomicDate"]);
    let from_time = first_str(raw, &["fromTime", "FromTime"]);
    let to_time = first_str(raw, &["toTime", "ToTime"]);

    let mut data = None;
    let mut hora_numero = None;
    if let (Some(atomic), Some(from)) = (atomic.as_ref().and_then(jwt::value_to_id), from_time.as_deref()) {
        match (parse_atomic_date(&atomic), parse_time(from)) {
            (Some(day), Some(time)) => {
                let hour = time.hour();
                if hour < window.start || hour >= window.end {
                    return None;
                }
                data = Some(NaiveDateTime::new(day, time));
                hora_numero = Some(hour as i32);
            }
            _ => debug!(atomic = %atomic, from, "unparseable event date"),
        }
    }

    let deletado = raw.get("Deleted").and_then(Value::as_str) == Some("X");
    let has_patient = raw.get("Patient_PersonId").is_some_and(|v| !v.is_null());

    Some(AgendaEventRecord {
        id: raw.get("id").and_then(jwt::value_to_id),
        titulo: first_str(raw, &["PatientName", "Name", "title", "Title"])
            .unwrap_or_else(|| "Sem título".to_string()),
        descricao: first_str(
            raw,
            &["Notes", "notes", "Procedures", "CategoryDescription", "description"],
        )
        .unwrap_or_default(),
        data,
        data_atomic: atomic
            .as_ref()
            .and_then(jwt::value_to_id)
            .and_then(|a| a.parse().ok()),
        hora_inicio: from_time,
        hora_fim: to_time,
        hora_inicio_numero: hora_numero,
        profissional: first_str(raw, &["DentistName", "Name"]).unwrap_or_default(),
        categoria: first_str(raw, &["CategoryDescription"]).unwrap_or_default(),
        paciente_id: raw.get("Patient_PersonId").and_then(jwt::value_to_id),
        dentista_id: raw.get("Dentist_PersonId").and_then(jwt::value_to_id),
        tipo: first_str(raw, &["Type"]).unwrap_or_default(),
        ocupado: has_patient && !deletado,
        deletado,
        dados_originais: raw.clone(),
    })
}

fn parse_professional(raw: &Value) -> Option<Professional> {
    if raw.get("Active").and_then(Value::as_str) != Some("X") {
        return None;
    }
    let id = raw.get("id").and_then(jwt::value_to_id)?;
    let nome = str_field(raw, "Name").trim().to_string();
    if nome.is_empty() {
        return None;
    }
    Some(Professional {
        id,
        nome,
        email: str_field(raw, "Email"),
        telefone: str_field(raw, "MobilePhone"),
        cor: str_field(raw, "Color"),
        horarios_ocupados: raw
            .get("DentistBusyScheduleSlots")
            .cloned()
            .unwrap_or_else(|| json!([])),
        dados_originais: raw.clone(),
    })
}

/// First non-empty array under `keys`, else the body itself when it is an array.
fn list_items<'a>(data: &'a Value, keys: &[&str]) -> &'a [Value] {
    if let Some(items) = data.as_array() {
        return items;
    }
    keys.iter()
        .filter_map(|key| data.get(*key).and_then(Value::as_array))
        .find(|items| !items.is_empty())
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn phone_matches(digits: &str, patient: &Value) -> bool {
    ["MobilePhone", "Phone"].iter().any(|key| {
        let candidate = only_digits(&patient.get(*key).map(value_text).unwrap_or_default());
        !candidate.is_empty() && (candidate.contains(digits) || digits.contains(&candidate))
    })
}

pub fn only_digits(text: &str) -> String {
    text.chars().filter(char::is_ascii_digit).collect()
}

/// "HH:MM" or "HH:MM:SS".
pub fn parse_time(text: &str) -> Option<NaiveTime> {
    let mut parts = text.trim().split(':');
    let hour = parts.next()?.trim().parse().ok()?;
    let minute = parts.next().map(|m| m.trim().parse()).unwrap_or(Ok(0)).ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn parse_atomic_date(atomic: &str) -> Option<NaiveDate> {
    if atomic.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(atomic, "%Y%m%d").ok()
}

fn atomic_date(day: NaiveDate) -> i64 {
    day.format("%Y%m%d").to_string().parse().unwrap_or_default()
}

fn numeric_or_string(id: &str) -> Value {
    id.trim()
        .parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(id.to_string()))
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn str_field(raw: &Value, key: &str) -> String {
    raw.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn first_str(raw: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        raw.get(*key)
            .map(value_text)
            .filter(|text| !text.trim().is_empty())
    })
}

fn first_present(raw: &Value, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|key| {
        raw.get(*key)
            .filter(|v| !v.is_null() && v.as_str() != Some(""))
            .cloned()
    })
}
