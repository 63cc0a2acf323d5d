use chrono::{DateTime, TimeDelta, Utc};
use tracing::{error, info, warn};

use crate::db::{Database, KnownPatient};
use crate::model::chat::{non_empty, ChatEntry, PatientLookup, SaveMessage};

const SUMMARY_MAX_MESSAGES: usize = 10;

/// Read/write access to the n8n chat memory table, keyed by phone number.
#[derive(Clone)]
pub struct ChatService {
    db: Database,
    default_days: i64,
}

impl ChatService {
    pub fn new(db: Database, default_days: i64) -> Self {
        Self { db, default_days }
    }

    pub fn default_days(&self) -> i64 {
        self.default_days
    }

    /// Messages of the phone's most recent session newer than `days` days.
    pub async fn history_by_phone(&self, phone: &str, days: i64) -> Vec<ChatEntry> {
        let phone = phone.trim();
        if phone.is_empty() || !self.db.is_connected() {
            return Vec::new();
        }

        let session = match self.db.latest_session_for_phone(phone).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                info!(telefone = phone, "no chat history");
                return Vec::new();
            }
            Err(err) => {
                error!(error = %err, telefone = phone, "failed to look up chat session");
                return Vec::new();
            }
        };

        match self.db.session_messages_since(&session, history_cutoff(days)).await {
            Ok(messages) => {
                info!(telefone = phone, total = messages.len(), "chat history loaded");
                messages
            }
            Err(err) => {
                error!(error = %err, session = %session, "failed to load chat history");
                Vec::new()
            }
        }
    }

    pub async fn previous_conversations_summary(&self, phone: &str, days: i64) -> String {
        let history = self.history_by_phone(phone, days).await;
        render_summary(&history, days)
    }

    pub async fn verify_patient(&self, phone: &str) -> PatientLookup {
        let phone = phone.trim();
        if phone.is_empty() || !self.db.is_connected() {
            return PatientLookup::unknown(phone);
        }

        match self.db.known_patient(phone).await {
            Ok(Some(patient)) => {
                info!(telefone = phone, nome = %patient.nome_paciente, "known patient");
                known_lookup(phone, patient)
            }
            Ok(None) => PatientLookup::unknown(phone),
            Err(err) => {
                error!(error = %err, telefone = phone, "failed to verify patient");
                PatientLookup {
                    erro: Some(format!("{err:#}")),
                    ..PatientLookup::unknown(phone)
                }
            }
        }
    }

    pub async fn patient_name(&self, phone: &str) -> Option<String> {
        let phone = phone.trim();
        if phone.is_empty() || !self.db.is_connected() {
            return None;
        }
        self.db.latest_patient_name(phone).await.unwrap_or_else(|err| {
            error!(error = %err, telefone = phone, "failed to read patient name");
            None
        })
    }

    /// Appends one message to the chat memory. `false` when it could not be stored.
    pub async fn save_message(&self, message: &SaveMessage) -> bool {
        if !self.db.is_connected() {
            warn!("database not connected, message dropped");
            return false;
        }

        let telefone = non_empty(message.telefone.as_deref());
        let nome = non_empty(message.nome_paciente.as_deref());
        let email = non_empty(message.email_paciente.as_deref());
        let result = self
            .db
            .insert_chat_message(
                message.session_id.trim(),
                &message.message_json(),
                telefone.as_deref(),
                nome.as_deref(),
                email.as_deref(),
            )
            .await;

        match result {
            Ok(()) => true,
            Err(err) => {
                error!(error = %format!("{err:#}"), "failed to save chat message");
                false
            }
        }
    }

    /// Text block describing the patient for the assistant prompt.
    pub async fn patient_context(&self, phone: &str) -> String {
        let lookup = self.verify_patient(phone).await;
        if !lookup.conhecido {
            info!(telefone = phone, "new patient");
            return new_patient_context(phone);
        }
        let summary = self
            .previous_conversations_summary(phone, self.default_days)
            .await;
        render_context(&lookup, &summary)
    }
}

/// Start of the history window; windows past chrono's range reach back to its minimum.
fn history_cutoff(days: i64) -> DateTime<Utc> {
    TimeDelta::try_days(days.max(1))
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn known_lookup(phone: &str, patient: KnownPatient) -> PatientLookup {
    PatientLookup {
        conhecido: true,
        telefone: phone.to_string(),
        nome: Some(patient.nome_paciente),
        email: Some(patient.email_paciente.unwrap_or_default()),
        ultima_conversa: patient.ultima_conversa.map(|ts| ts.to_rfc3339()),
        erro: None,
    }
}

pub fn new_patient_context(phone: &str) -> String {
    format!("Este é um novo paciente. Telefone: {phone}")
}

/// Last ten patient messages of `history`, or "" when the patient never wrote.
pub fn render_summary(history: &[ChatEntry], days: i64) -> String {
    let topics: Vec<String> = history
        .iter()
        .filter(|entry| entry.is_from_patient())
        .map(|entry| format!("- {}", entry.content().unwrap_or_default()))
        .collect();
    if topics.is_empty() {
        return String::new();
    }

    let last = history
        .last()
        .and_then(|entry| entry.created_at.as_deref())
        .unwrap_or("Desconhecida");
    let recent = &topics[topics.len().saturating_sub(SUMMARY_MAX_MESSAGES)..];

    format!(
        "📝 HISTÓRICO DE CONVERSAS ANTERIORES (últimos {days} dias):\n\
         Última conversa: {last}\n\
         \n\
         Tópicos discutidos:\n\
         {}\n",
        recent.join("\n")
    )
}

pub fn render_context(lookup: &PatientLookup, summary: &str) -> String {
    let nome = lookup.nome.as_deref().unwrap_or("Desconhecido");
    let email = lookup
        .email
        .as_deref()
        .filter(|e| !e.is_empty())
        .unwrap_or("Não informado");
    let ultima = lookup.ultima_conversa.as_deref().unwrap_or("Desconhecida");

    format!(
        "🔍 CONTEXTO DO PACIENTE:\n\
         - Nome: {nome}\n\
         - Telefone: {}\n\
         - Email: {email}\n\
         - Última conversa: {ultima}\n\
         \n\
         {summary}",
        lookup.telefone
    )
}
