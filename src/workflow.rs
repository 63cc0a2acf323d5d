//! Rewrites exported n8n workflows that still call the API through a tunnel.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub const SKIP_WARNING_HEADER: &str = "ngrok-skip-browser-warning";

const API_ROUTES: &[&str] = &[
    "/api/agenda/profissionais",
    "/api/agenda/disponiveis",
    "/api/agenda/criar",
    "/api/agenda/sync",
    "/api/agenda/eventos",
    "/api/paciente/salvar-nome",
    "/api/paciente/buscar-nome",
    "/api/chat/",
];

static TUNNEL_ORIGIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://[A-Za-z0-9.-]+\.(?:ngrok-free\.app|ngrok\.io)").expect("static regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Url {
        from: String,
        to: String,
        api_route: bool,
    },
    HeaderRemoved,
}

/// Rewrites `workflow` in place and returns what changed.
pub fn rewrite(workflow: &mut Value, base_url: &str) -> Vec<Change> {
    let mut changes = Vec::new();
    visit(workflow, base_url.trim_end_matches('/'), &mut changes);
    changes
}

fn visit(node: &mut Value, base_url: &str, changes: &mut Vec<Change>) {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(url)) = map.get_mut("url") {
                if let Some(change) = rewrite_url(url, base_url) {
                    changes.push(change);
                }
            }

            if let Some(Value::Array(headers)) = map
                .get_mut("parametersHeaders")
                .and_then(|h| h.get_mut("values"))
            {
                let before = headers.len();
                headers.retain(|h| h.get("name").and_then(Value::as_str) != Some(SKIP_WARNING_HEADER));
                changes.extend((headers.len()..before).map(|_| Change::HeaderRemoved));
            }

            for value in map.values_mut() {
                visit(value, base_url, changes);
            }
        }
        Value::Array(items) => {
            for item in items {
                visit(item, base_url, changes);
            }
        }
        _ => {}
    }
}

fn rewrite_url(url: &mut String, base_url: &str) -> Option<Change> {
    let origin = TUNNEL_ORIGIN.find(url)?;
    let (prefix, rest) = (&url[..origin.start()], &url[origin.end()..]);
    let api_route = API_ROUTES.iter().any(|route| rest.starts_with(route));
    let new_url = format!("{prefix}{base_url}{rest}");
    let change = Change::Url {
        from: std::mem::replace(url, new_url.clone()),
        to: new_url,
        api_route,
    };
    Some(change)
}

/// `workflow.json` → `workflow_backup.json` next to it.
pub fn backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workflow".to_string());
    path.with_file_name(format!("{stem}_backup.json"))
}

/// Backs up the original file and writes the rewritten workflow over it.
pub fn rewrite_file(path: &Path, base_url: &str) -> Result<Vec<Change>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let mut workflow: Value =
        serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))?;

    let changes = rewrite(&mut workflow, base_url);

    let backup = backup_path(path);
    std::fs::write(&backup, &raw).with_context(|| format!("cannot write {}", backup.display()))?;

    let pretty = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(path, pretty).with_context(|| format!("cannot write {}", path.display()))?;
    Ok(changes)
}
