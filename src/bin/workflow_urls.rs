use std::{path::PathBuf, process::ExitCode};

use agenda_sync::workflow::{self, Change};

const USAGE: &str = "Usage: workflow-urls <workflow.json> <host> [port]\n\n\
Examples:\n  workflow-urls workflow_n8n_completo.json 123.45.67.89\n  \
workflow-urls workflow_n8n_completo.json 123.45.67.89 8000";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        eprintln!("{USAGE}");
        return ExitCode::from(1);
    }

    let path = PathBuf::from(&args[0]);
    let host = &args[1];
    let port: u16 = match args.get(2).map(|p| p.parse()) {
        None => 5000,
        Some(Ok(port)) => port,
        Some(Err(_)) => {
            eprintln!("❌ invalid port: {}\n\n{USAGE}", args[2]);
            return ExitCode::from(1);
        }
    };

    let base_url = format!("http://{host}:{port}");
    println!("🔄 Updating URLs to: {base_url}");
    println!("{}", "-".repeat(60));

    let changes = match workflow::rewrite_file(&path, &base_url) {
        Ok(changes) => changes,
        Err(err) => {
            eprintln!("❌ {err:#}");
            return ExitCode::from(1);
        }
    };

    for change in &changes {
        match change {
            Change::Url { from, to, .. } => println!("✅ {from} → {to}"),
            Change::HeaderRemoved => println!("✅ removed header {}", workflow::SKIP_WARNING_HEADER),
        }
    }

    println!("💾 Backup: {}", workflow::backup_path(&path).display());
    println!("💾 Updated: {}", path.display());
    println!("{}", "-".repeat(60));
    println!("✅ Done! {} change(s)", changes.len());
    ExitCode::SUCCESS
}
