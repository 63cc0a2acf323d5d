use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};

/// Errors surfaced by the HTTP handlers. Rendered as `{"erro": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// 400 carrying additional JSON fields next to `erro`.
    #[error("{message}")]
    BadRequestWith {
        message: String,
        extra: Map<String, Value>,
    },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn missing_param(name: &str) -> Self {
        Self::BadRequest(format!("Parametro \"{name}\" e obrigatorio"))
    }

    pub fn missing_field(name: &str) -> Self {
        Self::BadRequest(format!("Campo \"{name}\" e obrigatorio"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::BadRequestWith { .. } => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::BadRequestWith { message, mut extra } => {
                extra.insert("erro".into(), Value::String(message));
                Value::Object(extra)
            }
            other => json!({ "erro": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_erro_with_extra_fields() {
        let mut extra = Map::new();
        extra.insert("telefone_informado".into(), json!("5511"));
        let err = ApiError::BadRequestWith {
            message: "Campo \"paciente_id\" e obrigatorio".into(),
            extra,
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let internal: ApiError = anyhow::anyhow!("pool closed").into();
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.to_string(), "pool closed");
        assert_eq!(
            ApiError::missing_param("data").to_string(),
            "Parametro \"data\" e obrigatorio"
        );
    }
}
