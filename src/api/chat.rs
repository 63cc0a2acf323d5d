use axum::{
    extract::{rejection::JsonRejection, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use super::types::{json_body, required_phone, HistoryQuery, PhoneQuery};
use super::AppState;
use crate::error::{ApiError, ApiResult};
use crate::model::chat::{PatientLookup, SaveMessage};

const MAX_HISTORY_DAYS: i64 = 3650;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat/verificar-paciente", get(verify_patient))
        .route("/chat/contexto", get(context))
        .route("/chat/historico", get(history))
        .route("/chat/salvar-mensagem", post(save_message))
        .route("/chat/nome-paciente", get(patient_name))
}

async fn verify_patient(
    State(state): State<AppState>,
    Query(query): Query<PhoneQuery>,
) -> ApiResult<Json<PatientLookup>> {
    let telefone = query.required()?;
    Ok(Json(state.chat.verify_patient(&telefone).await))
}

async fn context(
    State(state): State<AppState>,
    Query(query): Query<PhoneQuery>,
) -> ApiResult<Json<Value>> {
    let telefone = query.required()?;
    let contexto = state.chat.patient_context(&telefone).await;
    Ok(Json(json!({
        "telefone": telefone,
        "contexto": contexto,
    })))
}

async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Value>> {
    let telefone = required_phone(query.telefone.as_deref())?;
    let dias = match query.dias.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(d) => d
            .parse::<i64>()
            .ok()
            .filter(|d| (1..=MAX_HISTORY_DAYS).contains(d))
            .ok_or_else(|| {
                ApiError::bad_request(format!(
                    "Parametro \"dias\" deve ser um numero entre 1 e {MAX_HISTORY_DAYS}"
                ))
            })?,
        None => state.chat.default_days(),
    };

    let historico = state.chat.history_by_phone(&telefone, dias).await;
    Ok(Json(json!({
        "telefone": telefone,
        "dias": dias,
        "total": historico.len(),
        "historico": historico,
    })))
}

async fn save_message(
    State(state): State<AppState>,
    body: Result<Json<SaveMessage>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let message = json_body(body)?;
    if message.session_id.trim().is_empty() {
        return Err(ApiError::missing_field("session_id"));
    }
    if !message.has_message() {
        return Err(ApiError::missing_field("mensagem"));
    }

    let sucesso = state.chat.save_message(&message).await;
    Ok(Json(json!({ "sucesso": sucesso })))
}

async fn patient_name(
    State(state): State<AppState>,
    Query(query): Query<PhoneQuery>,
) -> ApiResult<Json<Value>> {
    let telefone = query.required()?;
    let nome = state.chat.patient_name(&telefone).await;
    Ok(Json(json!({
        "telefone": telefone,
        "encontrado": nome.is_some(),
        "nome": nome,
    })))
}
