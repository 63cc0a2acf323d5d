use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::db::Database;
use crate::services::{AgendaService, ChatService};

pub mod agenda;
pub mod chat;
pub mod patient;
pub mod types;

pub const SERVICE_NAME: &str = "clinicorp-agenda-sync";

#[derive(Clone)]
pub struct AppState {
    pub agenda: Arc<AgendaService>,
    pub chat: Arc<ChatService>,
    pub db: Database,
}

/// Every route of the service, mounted under `/api`.
pub fn router() -> Router<AppState> {
    let api = Router::new()
        .route("/health", get(health))
        .merge(agenda::router())
        .merge(patient::router())
        .merge(chat::router());

    Router::new().nest("/api", api)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let database = if state.db.is_connected() {
        "conectado"
    } else {
        "desconectado"
    };
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "database": database,
    }))
}
