use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Answer to "has this phone number talked to us before?".
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PatientLookup {
    pub conhecido: bool,
    pub telefone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ultima_conversa: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erro: Option<String>,
}

impl PatientLookup {
    pub fn unknown(telefone: &str) -> Self {
        Self {
            conhecido: false,
            telefone: telefone.to_string(),
            nome: None,
            email: None,
            ultima_conversa: None,
            erro: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatEntry {
    pub message: Value,
    pub created_at: Option<String>,
}

impl ChatEntry {
    /// True for messages written by the patient (`role: user` or n8n's `type: human`).
    pub fn is_from_patient(&self) -> bool {
        let role = self.message.get("role").and_then(Value::as_str);
        let kind = self.message.get("type").and_then(Value::as_str);
        role == Some("user") || kind == Some("human")
    }

    pub fn content(&self) -> Option<&str> {
        self.message.get("content").and_then(Value::as_str)
    }
}

/// Body of `POST /api/chat/salvar-mensagem`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SaveMessage {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub mensagem: Value,
    #[serde(default)]
    pub telefone: Option<String>,
    #[serde(default)]
    pub nome_paciente: Option<String>,
    #[serde(default)]
    pub email_paciente: Option<String>,
    /// n8n message type (`human` / `ai`), used when `mensagem` is plain text.
    #[serde(default)]
    pub tipo: Option<String>,
}

impl SaveMessage {
    pub fn has_message(&self) -> bool {
        match &self.mensagem {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        }
    }

    /// JSON stored in `n8n_chat_histories.message`.
    pub fn message_json(&self) -> Value {
        match &self.mensagem {
            Value::Object(_) => self.mensagem.clone(),
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(obj @ Value::Object(_)) => obj,
                _ => self.wrap(text),
            },
            other => self.wrap(&other.to_string()),
        }
    }

    fn wrap(&self, content: &str) -> Value {
        let kind = self
            .tipo
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("human");
        json!({
            "type": kind,
            "content": content,
            "additional_kwargs": {},
            "response_metadata": {},
        })
    }
}

/// Trims and drops empty optional strings.
pub fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_wrapped_in_n8n_shape() {
        let msg = SaveMessage {
            session_id: "s1".into(),
            mensagem: json!("Quero marcar uma limpeza"),
            ..Default::default()
        };
        let stored = msg.message_json();
        assert_eq!(stored["type"], "human");
        assert_eq!(stored["content"], "Quero marcar uma limpeza");
        assert!(stored["additional_kwargs"].is_object());
    }

    #[test]
    fn json_objects_are_kept() {
        let msg = SaveMessage {
            mensagem: json!(r#"{"type":"ai","content":"Olá!"}"#),
            ..Default::default()
        };
        assert_eq!(msg.message_json(), json!({"type": "ai", "content": "Olá!"}));

        let msg = SaveMessage {
            mensagem: json!({"role": "user", "content": "oi"}),
            ..Default::default()
        };
        assert_eq!(msg.message_json()["role"], "user");
    }

    #[test]
    fn tipo_overrides_default_type() {
        let msg = SaveMessage {
            mensagem: json!("Temos horário às 10h"),
            tipo: Some("ai".into()),
            ..Default::default()
        };
        assert_eq!(msg.message_json()["type"], "ai");
    }

    #[test]
    fn blank_message_is_missing() {
        let msg = SaveMessage {
            mensagem: json!("   "),
            ..Default::default()
        };
        assert!(!msg.has_message());
        assert!(!SaveMessage::default().has_message());
    }

    #[test]
    fn patient_messages_are_detected() {
        let user = ChatEntry {
            message: json!({"role": "user", "content": "oi"}),
            created_at: None,
        };
        let human = ChatEntry {
            message: json!({"type": "human", "content": "oi"}),
            created_at: None,
        };
        let ai = ChatEntry {
            message: json!({"type": "ai", "content": "olá"}),
            created_at: None,
        };
        assert!(user.is_from_patient());
        assert!(human.is_from_patient());
        assert!(!ai.is_from_patient());
    }

    #[test]
    fn unknown_lookup_serializes_minimal_shape() {
        let body = serde_json::to_value(PatientLookup::unknown("5511999999999")).unwrap();
        assert_eq!(body, json!({"conhecido": false, "telefone": "5511999999999"}));
    }
}
