use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub paciente_id: Option<String>,
    pub nome_paciente: Option<String>,
    pub profissional_id: String,
    pub data: NaiveDate,
    pub hora_inicio: String,
    pub hora_fim: String,
    pub observacoes: String,
    pub procedimentos: Vec<String>,
    pub telefone: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct AppointmentResult {
    pub sucesso: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agendamento_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paciente_id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paciente_nome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resultado: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erro: Option<String>,
}

impl AppointmentResult {
    pub fn failed(erro: impl Into<String>) -> Self {
        Self {
            sucesso: false,
            erro: Some(erro.into()),
            ..Default::default()
        }
    }
}
