use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::types::{json_body, PhoneQuery, SaveNameBody};
use super::AppState;
use crate::db::NOT_CONNECTED;
use crate::error::{ApiError, ApiResult};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/paciente/salvar-nome", post(save_name))
        .route("/paciente/buscar-nome", get(find_name))
}

async fn save_name(
    State(state): State<AppState>,
    body: Result<Json<SaveNameBody>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let body = json_body(body)?;
    let telefone = body.telefone.unwrap_or_default().trim().to_string();
    let nome = body.nome.unwrap_or_default().trim().to_string();
    if telefone.is_empty() {
        return Err(ApiError::missing_field("telefone"));
    }
    if nome.is_empty() {
        return Err(ApiError::missing_field("nome"));
    }

    if !state.db.is_connected() {
        warn!("database not connected, patient name not saved");
        return Ok((
            StatusCode::OK,
            Json(json!({
                "sucesso": false,
                "erro": NOT_CONNECTED,
                "nome": nome,
                "telefone": telefone,
            })),
        ));
    }

    if let Err(err) = state.db.save_patient_name(&telefone, &nome).await {
        error!(error = %format!("{err:#}"), telefone = %telefone, "failed to save patient name");
        return Ok((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "sucesso": false,
                "erro": format!("Erro ao salvar no banco: {err}"),
                "nome": nome,
                "telefone": telefone,
            })),
        ));
    }

    info!(telefone = %telefone, nome = %nome, "patient name saved");
    Ok((
        StatusCode::OK,
        Json(json!({
            "sucesso": true,
            "nome": nome,
            "telefone": telefone,
            "mensagem": "Nome salvo com sucesso",
        })),
    ))
}

async fn find_name(
    State(state): State<AppState>,
    Query(query): Query<PhoneQuery>,
) -> ApiResult<Json<Value>> {
    let telefone = query.required()?;

    if !state.db.is_connected() {
        return Ok(Json(json!({
            "nome": null,
            "telefone": telefone,
            "encontrado": false,
        })));
    }

    let body = match state.db.find_patient_name(&telefone).await {
        Ok(Some(nome)) => json!({
            "nome": nome,
            "telefone": telefone,
            "encontrado": true,
        }),
        Ok(None) => json!({
            "nome": null,
            "telefone": telefone,
            "encontrado": false,
        }),
        Err(err) => {
            error!(error = %err, telefone = %telefone, "failed to read patient name");
            json!({
                "nome": null,
                "telefone": telefone,
                "encontrado": false,
                "erro": err.to_string(),
            })
        }
    };
    Ok(Json(body))
}
