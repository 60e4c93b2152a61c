//! Wires stores, engine, and service, then walks one report through its life.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{info, warn};

use reportdesk_core::{AggregateRoot, Entity};
use reportdesk_infra::tasks::{
    InMemoryTaskStore, TaskEngine, TaskEngineHandle, TaskHandlers, TaskQueue, TaskStats,
};
use reportdesk_infra::{Clock, InMemoryEntityStore, MutationError, ReportService};
use reportdesk_reports::{Entry, NewReport, Priority, Report, ReportPatch, ReportStatus, Role, User};

use crate::config::AppConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

type Service = ReportService<
    Arc<InMemoryEntityStore<Report>>,
    Arc<InMemoryEntityStore<User>>,
    TaskQueue<Arc<InMemoryTaskStore>>,
>;

/// Run the scripted scenario and return the settled queue statistics.
pub async fn run(config: &AppConfig, clock: Arc<dyn Clock>) -> anyhow::Result<TaskStats> {
    let reports = InMemoryEntityStore::<Report>::arc();
    let users = InMemoryEntityStore::<User>::arc();

    let engine = TaskEngine::new(
        InMemoryTaskStore::arc(),
        clock.clone(),
        TaskHandlers::simulated(config.fault_injector(), reports.clone()),
        config.engine_config(),
    );
    let service: Service = ReportService::new(reports, users, engine.queue(), clock.clone());
    let handle = engine.spawn();

    let outcome = walk_through(&service, clock.as_ref());
    let settled = wait_until_settled(&handle, config.settle_timeout).await;

    let stats = handle.stats().context("reading task stats")?;
    for dead in handle.engine().dead_letters().context("reading dead letters")? {
        warn!(
            task_id = %dead.task.id,
            kind = %dead.task.kind(),
            attempts = dead.task.attempts,
            error = dead.task.last_error.as_deref().unwrap_or(""),
            "dead-lettered task"
        );
    }
    info!(stats = %serde_json::to_string(&stats)?, "task queue settled");
    handle.shutdown().await;

    outcome?;
    if !settled {
        bail!("task queue did not settle within {:?}", config.settle_timeout);
    }
    Ok(stats)
}

fn walk_through(service: &Service, clock: &dyn Clock) -> anyhow::Result<()> {
    let admin = service.register_user("admin", Role::Admin)?;
    let editor = service.register_user("editor", Role::Editor)?;
    let viewer = service.register_user("viewer", Role::Viewer)?;

    let now = clock.now();
    let new = NewReport {
        description: "Post-incident findings".to_string(),
        status: Some(ReportStatus::Published),
        entries: vec![
            Entry::new("Primary database failover took 4 minutes", Priority::High, now),
            Entry::new("Alerting paged the wrong rotation", Priority::High, now),
            Entry::new("Status page updated late", Priority::Low, now),
        ],
        ..NewReport::titled("Quarterly incident review")
    };
    let report = service.create_as(editor.id, new)?;
    let id = *report.id();
    info!(report_id = %id, version = report.version(), "report published");

    if let Err(e) = service.create_as(viewer.id, NewReport::titled("Not allowed")) {
        log_rejection("viewer create", &e);
    }

    let archive = ReportPatch {
        status: Some(ReportStatus::Archived),
        ..Default::default()
    };
    match service.update_as(admin.id, id, Some(report.version()), &archive) {
        Err(e) => log_rejection("early archive", &e),
        Ok(_) => bail!("archive with two high-priority entries should be refused"),
    }

    let mut entries = report.entries().to_vec();
    entries.push(Entry::new("Runbook missing for cache warmup", Priority::High, clock.now()));
    let extended = service.update_as(
        editor.id,
        id,
        Some(report.version()),
        &ReportPatch {
            entries: Some(entries),
            ..Default::default()
        },
    )?;

    let archived = service.update_as(admin.id, id, Some(extended.version()), &archive)?;
    info!(report_id = %id, version = archived.version(), status = %archived.status(), "report archived");

    let stale = ReportPatch {
        title: Some("Renamed by a stale client".to_string()),
        ..Default::default()
    };
    if let Err(e) = service.update(id, Some(report.version()), &stale) {
        log_rejection("stale update", &e);
    }

    Ok(())
}

fn log_rejection(step: &str, error: &MutationError) {
    let payload = serde_json::to_string(&error.to_payload()).unwrap_or_default();
    info!(step, code = error.code(), payload = %payload, "request rejected");
}

async fn wait_until_settled(
    handle: &TaskEngineHandle<Arc<InMemoryTaskStore>>,
    timeout: Duration,
) -> bool {
    let poll = async {
        loop {
            match handle.stats() {
                Ok(stats) if stats.is_settled() => return,
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to read task stats"),
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };
    tokio::time::timeout(timeout, poll).await.is_ok()
}
