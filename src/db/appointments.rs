use anyhow::{Context, Result};
use serde_json::{json, Value};

use super::Database;
use crate::model::appointment::NewAppointment;

impl Database {
    /// Local ledger entry for an appointment already accepted by Clinicorp.
    pub async fn record_appointment(
        &self,
        request: &NewAppointment,
        agendamento_id: Option<&Value>,
        paciente_id: Option<&Value>,
    ) -> Result<()> {
        let procedimento = if request.procedimentos.is_empty() {
            None
        } else {
            Some(request.procedimentos.join(", "))
        };
        let metadata = json!({
            "telefone": request.telefone,
            "email": request.email,
            "paciente_id": paciente_id.cloned().unwrap_or(Value::Null),
            "paciente_nome": request.nome_paciente,
            "profissional_id": request.profissional_id,
            "agendamento_id": agendamento_id.cloned().unwrap_or(Value::Null),
            "observacoes": request.observacoes,
        });

        sqlx::query(
            "INSERT INTO agendamentos \
                (data_agendamento, hora_inicio, hora_fim, profissional_nome, procedimento, status, metadata) \
             VALUES ($1, $2, $3, (SELECT nome FROM profissionais WHERE profissional_id = $4), $5, 'confirmado', $6)",
        )
        .bind(request.data)
        .bind(&request.hora_inicio)
        .bind(&request.hora_fim)
        .bind(&request.profissional_id)
        .bind(procedimento)
        .bind(&metadata)
        .execute(self.pool()?)
        .await
        .context("failed to record appointment")?;
        Ok(())
    }
}
