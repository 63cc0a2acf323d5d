use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{error, info, warn};

use crate::model::agenda::SyncReport;
use crate::services::AgendaService;

/// Runs a sync right away and then every `every`, until `shutdown` flips to true.
pub fn spawn(
    agenda: Arc<AgendaService>,
    every: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    run_every(every, shutdown, move || {
        let agenda = agenda.clone();
        async move { agenda.sync().await }
    })
}

/// A sync still in flight when shutdown arrives is dropped.
fn run_every<F, Fut>(
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut sync: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = SyncReport> + Send,
{
    tokio::spawn(async move {
        info!(interval_secs = every.as_secs(), "agenda scheduler started");
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        report = sync() => log_report(&report),
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                warn!("shutdown requested, abandoning running sync");
                                break;
                            }
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("agenda scheduler stopped");
    })
}

fn log_report(report: &SyncReport) {
    if report.sucesso {
        info!(
            eventos = report.total_eventos.unwrap_or_default(),
            profissionais = report.total_profissionais.unwrap_or_default(),
            "scheduled sync done"
        );
    } else {
        error!(erro = report.erro.as_deref().unwrap_or("unknown"), "scheduled sync failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clinicorp::ClinicorpClient;
    use crate::config::{clinic_offset, Config};
    use crate::db::Database;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn stops_on_shutdown() {
        let cfg = Config::from_lookup(|_| None);
        let client = ClinicorpClient::new(cfg.clinicorp.clone(), cfg.utc_offset_minutes).unwrap();
        let agenda = Arc::new(AgendaService::new(
            Database::disconnected(),
            Arc::new(client),
            clinic_offset(-180),
        ));

        let (tx, rx) = watch::channel(false);
        let handle = spawn(agenda, Duration::from_secs(3600), rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_running_sync() {
        let started = Arc::new(AtomicUsize::new(0));
        let calls = started.clone();
        let (tx, rx) = watch::channel(false);
        let handle = run_every(Duration::from_secs(3600), rx, move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<SyncReport>()
        });

        while started.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }
}
