use std::time::Duration;

use reqwest::{
    header::{self, HeaderMap, HeaderValue},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::ClinicorpConfig;

pub mod agenda;
mod auth;
pub mod jwt;
pub mod token;

pub use agenda::{parse_appointment, HourWindow, PatientMatch};
pub use token::{TokenStore, SESSION_ACTIVE};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const LOGIN_SCREEN_MARKER: &str = "login__login_screen";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

#[derive(Debug, thiserror::Error)]
pub enum ClinicorpError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("login failed: {0}")]
    Login(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0} not available; configure it or check the login token")]
    MissingIdentity(&'static str),

    #[error("token store: {0}")]
    TokenStore(String),
}

pub type ClinicorpResult<T> = Result<T, ClinicorpError>;

#[derive(Debug, Clone)]
pub struct ClinicorpResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub body: String,
}

impl ClinicorpResponse {
    pub fn is_json(&self) -> bool {
        self.content_type.to_lowercase().contains("json")
    }

    fn needs_login(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED || self.body.contains(LOGIN_SCREEN_MARKER)
    }

    pub fn error_for_status(self) -> ClinicorpResult<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ClinicorpError::Status {
                status: self.status.as_u16(),
                body: preview(&self.body, 500),
            })
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> ClinicorpResult<T> {
        if !self.is_json() {
            return Err(ClinicorpError::InvalidResponse(format!(
                "expected JSON, got content-type {:?}",
                self.content_type
            )));
        }
        serde_json::from_str(&self.body)
            .map_err(|err| ClinicorpError::InvalidResponse(err.to_string()))
    }
}

/// Authenticated access to the Clinicorp web API.
///
/// The token is fetched lazily: memory, then the token file, then a fresh
/// login. Callers racing on an expired session share a single re-login.
pub struct ClinicorpClient {
    http: reqwest::Client,
    config: ClinicorpConfig,
    tz_offset_minutes: i32,
    store: TokenStore,
    token: RwLock<Option<String>>,
    login_lock: Mutex<()>,
}

impl ClinicorpClient {
    pub fn new(config: ClinicorpConfig, tz_offset_minutes: i32) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(header::ORIGIN, HeaderValue::from_str(&config.base_url)?);
        headers.insert(
            header::REFERER,
            HeaderValue::from_str(&format!("{}/", config.base_url))?,
        );

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let store = TokenStore::new(config.token_file.clone());

        Ok(Self {
            http,
            config,
            tz_offset_minutes,
            store,
            token: RwLock::new(None),
            login_lock: Mutex::new(()),
        })
    }

    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> ClinicorpResult<ClinicorpResponse> {
        self.request(Method::GET, path, query, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> ClinicorpResult<ClinicorpResponse> {
        self.request(Method::POST, path, &[], Some(body)).await
    }

    /// Sends an authenticated request to the API origin. A 401 or the login
    /// screen in the body triggers exactly one re-login and retry.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> ClinicorpResult<ClinicorpResponse> {
        let token = self.current_token().await?;
        let response = self.send(method.clone(), path, query, body, &token).await?;
        if !response.needs_login() {
            return Ok(response);
        }

        warn!(path, status = %response.status, "session rejected, logging in again");
        let token = self.refresh_token(&token).await?;
        self.send(method, path, query, body, &token).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        token: &str,
    ) -> ClinicorpResult<ClinicorpResponse> {
        let url = format!("{}{}", self.config.api_url, path);
        debug!(%method, %url, "clinicorp request");

        let mut builder = self.http.request(method, url).query(query);
        if token != SESSION_ACTIVE {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await?;

        Ok(ClinicorpResponse {
            status,
            content_type,
            body,
        })
    }

    async fn current_token(&self) -> ClinicorpResult<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }

        let _guard = self.login_lock.lock().await;
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }

        let token = match self.store.load().await {
            Some(token) => {
                info!("using stored Clinicorp token");
                token
            }
            None => self.login().await?,
        };
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    async fn refresh_token(&self, stale: &str) -> ClinicorpResult<String> {
        let _guard = self.login_lock.lock().await;
        if let Some(token) = self.token.read().await.clone() {
            if token != stale {
                return Ok(token);
            }
        }

        *self.token.write().await = None;
        if let Err(err) = self.store.delete().await {
            warn!(error = %err, "could not remove stale token file");
        }

        let token = self.login().await?;
        *self.token.write().await = Some(token.clone());
        Ok(token)
    }

    /// Token currently in use, without triggering a login.
    pub async fn cached_token(&self) -> Option<String> {
        match self.token.read().await.clone() {
            Some(token) => Some(token),
            None => self.store.load().await,
        }
    }
}

pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, content_type: &str, body: &str) -> ClinicorpResponse {
        ClinicorpResponse {
            status: StatusCode::from_u16(status).unwrap(),
            content_type: content_type.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn login_screen_requires_new_session() {
        assert!(response(401, "application/json", "{}").needs_login());
        assert!(response(200, "text/html", "<div id=\"login__login_screen\">").needs_login());
        assert!(!response(200, "application/json", "{}").needs_login());
    }

    #[test]
    fn json_requires_json_content_type() {
        let ok = response(200, "application/json; charset=utf-8", r#"{"list":[]}"#);
        assert!(ok.json::<Value>().is_ok());

        let html = response(200, "text/html", r#"{"list":[]}"#);
        assert!(matches!(
            html.json::<Value>(),
            Err(ClinicorpError::InvalidResponse(_))
        ));
    }

    #[test]
    fn error_for_status_keeps_body_preview() {
        let err = response(500, "text/plain", "boom").error_for_status().unwrap_err();
        assert_eq!(err.to_string(), "Status 500: boom");
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("ação", 2), "aç...");
        assert_eq!(preview("abc", 10), "abc");
    }
}
