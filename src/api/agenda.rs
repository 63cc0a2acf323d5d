use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::types::{
    json_body, parse_datetime_param, parse_day, parse_days, parse_flag, parse_hour_param,
    parse_limit, CreateAppointmentBody, EventsQuery, ProfessionalsQuery, SlotsQuery,
    DEFAULT_DIAS_FUTUROS, DEFAULT_HORA_FIM, DEFAULT_HORA_INICIO,
};
use super::AppState;
use crate::error::{ApiError, ApiResult};
use crate::model::agenda::{EventFilter, SyncReport};
use crate::model::appointment::AppointmentResult;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agenda/sync", post(sync))
        .route("/agenda/eventos", get(events))
        .route("/agenda/estatisticas", get(statistics))
        .route("/agenda/disponiveis", get(available))
        .route("/agenda/profissionais", get(professionals))
        .route("/agenda/criar", post(create_appointment))
}

async fn sync(State(state): State<AppState>) -> Json<SyncReport> {
    info!("manual sync requested");
    Json(state.agenda.sync().await)
}

async fn events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Value>> {
    let filter = EventFilter {
        ocupado: query.ocupado.as_deref().map(|v| parse_flag(Some(v), false)),
        data_inicio: query
            .data_inicio
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(parse_datetime_param)
            .transpose()?,
        data_fim: query
            .data_fim
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(parse_datetime_param)
            .transpose()?,
        limit: parse_limit(query.limit.as_deref())?,
    };

    let eventos = state.agenda.events(filter).await;
    Ok(Json(json!({
        "total": eventos.len(),
        "eventos": eventos,
    })))
}

async fn statistics(State(state): State<AppState>) -> Json<Value> {
    match state.agenda.statistics().await {
        Some(stats) => Json(json!(stats)),
        None => Json(json!({})),
    }
}

async fn available(
    State(state): State<AppState>,
    Query(query): Query<SlotsQuery>,
) -> ApiResult<Json<Value>> {
    let data = query
        .data
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request("Parametro \"data\" e obrigatorio (formato: YYYY-MM-DD)"))?;
    let day = parse_day(data)?;
    let hora_inicio = parse_hour_param(query.hora_inicio.as_deref(), DEFAULT_HORA_INICIO);
    let hora_fim = parse_hour_param(query.hora_fim.as_deref(), DEFAULT_HORA_FIM);
    let profissional_id = query
        .profissional_id
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let agendas = state
        .agenda
        .available_slots(day, hora_inicio, hora_fim, profissional_id)
        .await;

    Ok(Json(json!({
        "data": data,
        "hora_inicio": hora_inicio,
        "hora_fim": hora_fim,
        "profissional_id": profissional_id,
        "total_disponiveis": agendas.len(),
        "agendas": agendas,
    })))
}

async fn professionals(
    State(state): State<AppState>,
    Query(query): Query<ProfessionalsQuery>,
) -> ApiResult<Json<Value>> {
    let force = parse_flag(query.forcar_atualizacao.as_deref(), false);
    let use_cache = parse_flag(query.usar_cache.as_deref(), true) && !force;

    if !parse_flag(query.com_agendas.as_deref(), false) {
        let profissionais = state.agenda.professionals(use_cache, force).await;
        return Ok(Json(json!({
            "total": profissionais.len(),
            "profissionais": profissionais,
        })));
    }

    let start = match query.data.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(data) => parse_day(data)?,
        None => state.agenda.today(),
    };
    let hora_inicio = parse_hour_param(query.hora_inicio.as_deref(), DEFAULT_HORA_INICIO);
    let hora_fim = parse_hour_param(query.hora_fim.as_deref(), DEFAULT_HORA_FIM);
    let dias_futuros = parse_days(query.dias_futuros.as_deref(), DEFAULT_DIAS_FUTUROS)?;

    let profissionais = state
        .agenda
        .professionals_with_slots(start, hora_inicio, hora_fim, use_cache, dias_futuros)
        .await;

    Ok(Json(json!({
        "data_inicio": start.format("%Y-%m-%d").to_string(),
        "dias_futuros": dias_futuros,
        "hora_inicio": hora_inicio,
        "hora_fim": hora_fim,
        "total": profissionais.len(),
        "profissionais": profissionais,
    })))
}

async fn create_appointment(
    State(state): State<AppState>,
    body: Result<Json<CreateAppointmentBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<AppointmentResult>)> {
    let request = match json_body(body)?.validate() {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "rejected appointment request");
            return Err(err);
        }
    };

    let result = state.agenda.create_appointment(&request).await;
    let status = if result.sucesso {
        StatusCode::CREATED
    } else {
        StatusCode::BAD_REQUEST
    };
    Ok((status, Json(result)))
}
