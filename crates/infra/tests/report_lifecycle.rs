//! End-to-end: service → stores → task engine → handlers.
//!
//! Verifies:
//! - The archive rule against a real mutation sequence
//! - Conflicts never write
//! - Creation side effects settle, including retries and dead letters

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use reportdesk_core::{AggregateRoot, Entity};
use reportdesk_infra::tasks::{
    EngineConfig, FaultInjector, FaultMode, InMemoryTaskStore, TaskEngine, TaskHandlers, TaskKind,
    TaskQueue, TaskStatus,
};
use reportdesk_infra::{
    EntityStore, InMemoryEntityStore, ManualClock, MutationError, ReportService,
};
use reportdesk_reports::{
    Entry, NewReport, Priority, Report, ReportPatch, ReportStatus, Role, TransitionError, User,
};

type Service = ReportService<
    Arc<InMemoryEntityStore<Report>>,
    Arc<InMemoryEntityStore<User>>,
    TaskQueue<Arc<InMemoryTaskStore>>,
>;

struct World {
    service: Service,
    engine: TaskEngine<Arc<InMemoryTaskStore>>,
    reports: Arc<InMemoryEntityStore<Report>>,
    faults: Arc<FaultInjector>,
    clock: Arc<ManualClock>,
    owner: User,
}

fn world() -> World {
    let reports = InMemoryEntityStore::<Report>::arc();
    let users = InMemoryEntityStore::<User>::arc();
    let clock = Arc::new(ManualClock::default());
    let faults = FaultInjector::arc();

    let engine = TaskEngine::new(
        InMemoryTaskStore::arc(),
        clock.clone(),
        TaskHandlers::simulated(faults.clone(), reports.clone()),
        EngineConfig::default(),
    );
    let service = ReportService::new(reports.clone(), users, engine.queue(), clock.clone());
    let owner = service.register_user("analyst", Role::Editor).unwrap();

    World {
        service,
        engine,
        reports,
        faults,
        clock,
        owner,
    }
}

fn entry(priority: Priority) -> Entry {
    Entry::new("observation", priority, Utc::now())
}

fn published_with(w: &World, entries: Vec<Entry>) -> Report {
    let new = NewReport {
        entries,
        status: Some(ReportStatus::Published),
        ..NewReport::titled("Incident review")
    };
    w.service.create(w.owner.id, new).unwrap()
}

#[test]
fn archive_needs_three_high_priority_entries() {
    let w = world();
    let report = published_with(
        &w,
        vec![entry(Priority::High), entry(Priority::High), entry(Priority::Low)],
    );
    let id = *report.id();
    let archive = ReportPatch {
        status: Some(ReportStatus::Archived),
        ..Default::default()
    };

    let err = w.service.update(id, Some(1), &archive).unwrap_err();
    assert_eq!(
        err,
        MutationError::BusinessRule(TransitionError::InsufficientHighPriorityEntries { count: 2 })
    );
    assert_eq!(w.service.get(id).unwrap().version(), 1);

    let mut entries = report.entries().to_vec();
    entries.push(entry(Priority::High));
    let added = w
        .service
        .update(
            id,
            Some(1),
            &ReportPatch {
                entries: Some(entries),
                ..Default::default()
            },
        )
        .unwrap();

    let archived = w.service.update(id, Some(added.version()), &archive).unwrap();
    assert_eq!(archived.status(), ReportStatus::Archived);
    assert_eq!(archived.version(), report.version() + 2);
}

#[test]
fn stale_writer_gets_conflict_and_store_is_untouched() {
    let w = world();
    let report = published_with(&w, vec![entry(Priority::High)]);
    let id = *report.id();

    let rename = |title: &str| ReportPatch {
        title: Some(title.to_string()),
        ..Default::default()
    };
    let first = w.service.update(id, Some(1), &rename("first")).unwrap();

    let err = w.service.update(id, Some(1), &rename("second")).unwrap_err();
    assert_eq!(err, MutationError::Conflict { expected: 1, actual: 2 });

    let payload = err.to_payload();
    assert_eq!(payload.code, "conflict");
    assert_eq!(payload.details.unwrap()["current_version"], 2);

    assert_eq!(EntityStore::<Report>::get(&w.reports, &id).unwrap(), Some(first));
}

#[tokio::test]
async fn creation_side_effects_settle() {
    let w = world();
    let report = published_with(&w, vec![entry(Priority::Medium)]);

    let pending = w.engine.stats().unwrap();
    assert_eq!(pending.pending, 3);
    assert!(!pending.processing);

    assert_eq!(w.engine.drain().await, 3);

    let completed = w.engine.completed().unwrap();
    let mut kinds: Vec<_> = completed.iter().map(|t| t.kind().as_str()).collect();
    kinds.sort_unstable();
    assert_eq!(kinds, vec!["generate-preview", "invalidate-cache", "notify"]);
    assert!(completed.iter().all(|t| t.payload.report_id() == *report.id()));

    let stats = w.engine.stats().unwrap();
    assert!(stats.is_settled());
    assert_eq!(stats.dead_letter, 0);
}

#[tokio::test]
async fn failing_side_effect_is_dead_lettered_without_touching_report() {
    let w = world();
    w.faults.set(TaskKind::InvalidateCache, FaultMode::Always);
    w.faults.set(TaskKind::Notify, FaultMode::FailNext(1));

    let report = published_with(&w, vec![entry(Priority::High)]);
    w.engine.drain().await;

    let dls = w.engine.dead_letters().unwrap();
    assert_eq!(dls.len(), 1);
    assert_eq!(dls[0].task.kind(), TaskKind::InvalidateCache);
    assert_eq!(dls[0].task.attempts, 2);

    // notify: one retry (2s); cache: one retry (2s) then dead letter.
    assert_eq!(
        w.clock.sleeps(),
        vec![Duration::from_secs(2), Duration::from_secs(2)]
    );

    let stats = w.engine.stats().unwrap();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.dead_letter, 1);
    assert_eq!(w.service.get(*report.id()).unwrap(), report);
}

#[tokio::test]
async fn preview_of_deleted_report_still_completes() {
    let w = world();
    let report = published_with(&w, vec![entry(Priority::Low)]);
    w.service.delete(*report.id()).unwrap();

    w.engine.drain().await;

    let tasks = w.engine.completed().unwrap();
    assert_eq!(tasks.len(), 3);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
}
