use agenda_sync::clinicorp::{ClinicorpClient, TokenStore, SESSION_ACTIVE};
use agenda_sync::config::ClinicorpConfig;
use agenda_sync::model::appointment::NewAppointment;
use chrono::NaiveDate;
use httpmock::prelude::*;
use serde_json::json;
use tempfile::TempDir;

const JSON: &str = "application/json";

fn config(server: &MockServer, dir: &TempDir) -> ClinicorpConfig {
    ClinicorpConfig {
        base_url: server.base_url(),
        api_url: server.base_url(),
        username: "recepcao".into(),
        password: "segredo".into(),
        clinic_id: Some("99".into()),
        user_id: Some(7),
        client_id: "client".into(),
        token_file: dir.path().join("token.json"),
    }
}

async fn mock_login<'a>(server: &'a MockServer, token: &str) -> httpmock::Mock<'a> {
    mock_login_reply(server, json!({ "token": token }).to_string()).await
}

async fn mock_login_reply(server: &MockServer, body: String) -> httpmock::Mock<'_> {
    server
        .mock_async(|when, then| {
            when.method(GET).path("/login/");
            then.status(200).body("<html></html>");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/security/user/login")
                .json_body_includes(r#"{"username":"recepcao","password":"segredo","tzoffset":-180}"#);
            then.status(200).header("content-type", JSON).body(body);
        })
        .await
}

fn professionals_body() -> String {
    json!({
        "list": [
            {"id": 101, "Name": "Dra. Ana Souza", "Active": "X", "Email": "ana@clinica.com"},
            {"id": 102, "Name": "Dr. Inativo", "Active": ""},
            {"id": 103, "Name": "Dr. Bruno Lima", "Active": "X"}
        ]
    })
    .to_string()
}

#[tokio::test]
async fn logs_in_once_and_reuses_the_token() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let login = mock_login(&server, "tok-1").await;
    let list = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/solution/api/core/person/list_by_type")
                .query_param("type", "DENTIST")
                .header("authorization", "Bearer tok-1");
            then.status(200).header("content-type", JSON).body(professionals_body());
        })
        .await;

    let client = ClinicorpClient::new(config(&server, &dir), -180).unwrap();
    let first = client.list_professionals().await.unwrap();
    let second = client.list_professionals().await.unwrap();

    assert_eq!(first, second);
    let names: Vec<&str> = first.iter().map(|p| p.nome.as_str()).collect();
    assert_eq!(names, vec!["Dra. Ana Souza", "Dr. Bruno Lima"]);
    assert_eq!(first[0].id, "101");

    login.assert_hits_async(1).await;
    list.assert_hits_async(2).await;

    let stored = TokenStore::new(dir.path().join("token.json")).load().await;
    assert_eq!(stored.as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn stored_token_is_used_without_login() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    TokenStore::new(dir.path().join("token.json"))
        .save("stored", Some(3600))
        .await
        .unwrap();
    let login = mock_login(&server, "fresh").await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/solution/api/core/person/list_by_type")
                .header("authorization", "Bearer stored");
            then.status(200).header("content-type", JSON).body(professionals_body());
        })
        .await;

    let client = ClinicorpClient::new(config(&server, &dir), -180).unwrap();
    assert_eq!(client.list_professionals().await.unwrap().len(), 2);
    login.assert_hits_async(0).await;
}

#[tokio::test]
async fn rejected_session_triggers_one_relogin() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    TokenStore::new(dir.path().join("token.json"))
        .save("old", Some(3600))
        .await
        .unwrap();
    let login = mock_login(&server, "new").await;
    let rejected = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/solution/api/core/person/list_by_type")
                .header("authorization", "Bearer old");
            then.status(401).body("unauthorized");
        })
        .await;
    let accepted = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/solution/api/core/person/list_by_type")
                .header("authorization", "Bearer new");
            then.status(200).header("content-type", JSON).body(professionals_body());
        })
        .await;

    let client = ClinicorpClient::new(config(&server, &dir), -180).unwrap();
    let professionals = client.list_professionals().await.unwrap();

    assert_eq!(professionals.len(), 2);
    rejected.assert_hits_async(1).await;
    accepted.assert_hits_async(1).await;
    login.assert_hits_async(1).await;
    assert_eq!(client.cached_token().await.as_deref(), Some("new"));
}

#[tokio::test]
async fn login_screen_in_body_triggers_relogin() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    TokenStore::new(dir.path().join("token.json"))
        .save("old", Some(3600))
        .await
        .unwrap();
    let login = mock_login(&server, "new").await;
    let login_page = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/solution/api/core/person/list_by_type")
                .header("authorization", "Bearer old");
            then.status(200)
                .header("content-type", "text/html")
                .body(r#"<html><div class="login__login_screen"></div></html>"#);
        })
        .await;
    let accepted = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/solution/api/core/person/list_by_type")
                .header("authorization", "Bearer new");
            then.status(200).header("content-type", JSON).body(professionals_body());
        })
        .await;

    let client = ClinicorpClient::new(config(&server, &dir), -180).unwrap();
    assert_eq!(client.list_professionals().await.unwrap().len(), 2);

    login_page.assert_hits_async(1).await;
    accepted.assert_hits_async(1).await;
    login.assert_hits_async(1).await;
}

#[tokio::test]
async fn tokenless_login_uses_the_cookie_session() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    let login = mock_login_reply(&server, json!({"ok": true, "user": {"name": "recepcao"}}).to_string()).await;
    let list = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/solution/api/core/person/list_by_type")
                .header_missing("authorization");
            then.status(200).header("content-type", JSON).body(professionals_body());
        })
        .await;

    let client = ClinicorpClient::new(config(&server, &dir), -180).unwrap();
    assert_eq!(client.list_professionals().await.unwrap().len(), 2);

    login.assert_hits_async(1).await;
    list.assert_hits_async(1).await;
    assert_eq!(client.cached_token().await.as_deref(), Some(SESSION_ACTIVE));
}

#[tokio::test]
async fn clinic_id_comes_from_the_user_profile() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_login(&server, "opaque-token").await;
    let me = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/security/user/me")
                .header("authorization", "Bearer opaque-token");
            then.status(200)
                .header("content-type", JSON)
                .body(json!({"user": {"name": "recepcao", "ClinicId": 4242}}).to_string());
        })
        .await;

    let client = ClinicorpClient::new(
        ClinicorpConfig {
            clinic_id: None,
            ..config(&server, &dir)
        },
        -180,
    )
    .unwrap();

    assert_eq!(client.clinic_id().await.unwrap(), "4242");
    me.assert_hits_async(1).await;
}

#[tokio::test]
async fn failed_login_is_an_error() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    server
        .mock_async(|when, then| {
            when.method(GET).path("/login/");
            then.status(200).body("<html></html>");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/security/user/login");
            then.status(403).body("Invalid credentials");
        })
        .await;

    let client = ClinicorpClient::new(config(&server, &dir), -180).unwrap();
    let err = client.list_professionals().await.unwrap_err();
    assert!(err.to_string().contains("login failed"), "{err}");
}

#[tokio::test]
async fn patients_are_found_by_name_and_phone() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_login(&server, "tok").await;
    let patients = json!({
        "list": [
            {"id": 501, "Name": "Maria Silva", "MobilePhone": "(11) 99999-8888", "Email": "maria@x.com"},
            {"id": 502, "Name": "Mariana Costa", "MobilePhone": "11 97777-6666"}
        ]
    })
    .to_string();
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/solution/api/patient/search")
                .query_param("onlyPatient", "true");
            then.status(200).header("content-type", JSON).body(patients);
        })
        .await;

    let client = ClinicorpClient::new(config(&server, &dir), -180).unwrap();

    let by_name = client.search_patients("Mari").await.unwrap();
    assert_eq!(by_name.len(), 2);
    assert_eq!(by_name[0].id.as_deref(), Some("501"));
    assert!(client.search_patients("M").await.unwrap().is_empty());

    let by_phone = client
        .find_patient_by_phone("+55 11 97777-6666")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_phone.nome, "Mariana Costa");
}

fn appointment() -> NewAppointment {
    NewAppointment {
        paciente_id: Some("501".into()),
        nome_paciente: None,
        profissional_id: "101".into(),
        data: NaiveDate::from_ymd_opt(2025, 11, 25).unwrap(),
        hora_inicio: "10:00".into(),
        hora_fim: "10:30".into(),
        observacoes: String::new(),
        procedimentos: Vec::new(),
        telefone: "5511999998888".into(),
        email: String::new(),
    }
}

#[tokio::test]
async fn appointment_creation_sends_clinic_payload() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_login(&server, "tok").await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/solution/api/appointment/create")
                .json_body_includes(
                    r#"{
                        "Patient_PersonId": 501,
                        "ScheduleToId": 101,
                        "AtomicDate": 20251125,
                        "Clinic_BusinessId": 99,
                        "CreateUserId": 7,
                        "ToTestDate": "2025-11-25T13:00:00+00:00"
                    }"#,
                );
            then.status(200)
                .header("content-type", JSON)
                .body(json!({"id": 9001, "PatientId": 501}).to_string());
        })
        .await;

    let client = ClinicorpClient::new(config(&server, &dir), -180).unwrap();
    let result = client.create_appointment(&appointment()).await.unwrap();

    create.assert_hits_async(1).await;
    assert!(result.sucesso);
    assert_eq!(result.agendamento_id, Some(json!(9001)));
    assert_eq!(result.paciente_id, Some(json!(501)));
}

#[tokio::test]
async fn appointment_rejection_keeps_status_and_body() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_login(&server, "tok").await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/solution/api/appointment/create");
            then.status(400).body("slot taken");
        })
        .await;

    let client = ClinicorpClient::new(config(&server, &dir), -180).unwrap();
    let err = client.create_appointment(&appointment()).await.unwrap_err();
    assert_eq!(err.to_string(), "Status 400: slot taken");
}

#[tokio::test]
async fn new_patient_without_name_is_refused_before_sending() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_login(&server, "tok").await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST).path("/solution/api/appointment/create");
            then.status(200).header("content-type", JSON).body("{}");
        })
        .await;

    let client = ClinicorpClient::new(config(&server, &dir), -180).unwrap();
    let request = NewAppointment {
        paciente_id: None,
        ..appointment()
    };
    let err = client.create_appointment(&request).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Nome do paciente é obrigatório para criar novo paciente"
    );
    create.assert_hits_async(0).await;
}

fn new_patient() -> NewAppointment {
    NewAppointment {
        paciente_id: None,
        nome_paciente: Some("Joana Prado".into()),
        ..appointment()
    }
}

#[tokio::test]
async fn unknown_phone_registers_a_new_patient() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_login(&server, "tok").await;
    let search = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/solution/api/patient/search")
                .query_param("name", "5511999998888");
            then.status(200).header("content-type", JSON).body(r#"{"list": []}"#);
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/solution/api/appointment/create")
                .json_body_includes(
                    r#"{"isNew": "X", "Name": "Joana Prado", "MobilePhone": "5511999998888"}"#,
                );
            then.status(200)
                .header("content-type", JSON)
                .body(json!({"id": 9002, "PatientId": 880}).to_string());
        })
        .await;

    let client = ClinicorpClient::new(config(&server, &dir), -180).unwrap();
    let result = client.create_appointment(&new_patient()).await.unwrap();

    search.assert_hits_async(1).await;
    create.assert_hits_async(1).await;
    assert!(result.sucesso);
    assert_eq!(result.paciente_id, Some(json!(880)));
}

#[tokio::test]
async fn known_phone_reuses_the_existing_patient() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_login(&server, "tok").await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/solution/api/patient/search");
            then.status(200).header("content-type", JSON).body(
                json!({"list": [{"id": 777, "Name": "Joana P.", "MobilePhone": "(11) 99999-8888"}]})
                    .to_string(),
            );
        })
        .await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/solution/api/appointment/create")
                .json_body_includes(r#"{"Patient_PersonId": 777}"#);
            then.status(200)
                .header("content-type", JSON)
                .body(json!({"id": 9003, "PatientId": 777}).to_string());
        })
        .await;

    let client = ClinicorpClient::new(config(&server, &dir), -180).unwrap();
    let result = client.create_appointment(&new_patient()).await.unwrap();

    create.assert_hits_async(1).await;
    assert_eq!(result.paciente_id, Some(json!(777)));
}

#[tokio::test]
async fn new_patient_without_phone_is_refused_before_sending() {
    let server = MockServer::start_async().await;
    let dir = tempfile::tempdir().unwrap();
    mock_login(&server, "tok").await;
    let create = server
        .mock_async(|when, then| {
            when.method(POST).path("/solution/api/appointment/create");
            then.status(200).header("content-type", JSON).body("{}");
        })
        .await;

    let client = ClinicorpClient::new(config(&server, &dir), -180).unwrap();
    let request = NewAppointment {
        telefone: String::new(),
        ..new_patient()
    };
    let err = client.create_appointment(&request).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Telefone do paciente é obrigatório para criar novo paciente"
    );
    create.assert_hits_async(0).await;
}
