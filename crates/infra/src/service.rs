//! Report mutation pipeline.
//!
//! Every write follows the same shape:
//!
//! ```text
//! (authorize) → load → version check → validate → decide next state → put
//! ```
//!
//! Writes are serialized by a service-wide mutation lock so that the version
//! check and the `put` form one compare-and-swap. Creation additionally
//! enqueues the side-effect tasks; their failures never reach the caller.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use reportdesk_core::{AggregateRoot, AttachmentId, Entity, ExpectedVersion, ReportId, UserId};
use reportdesk_reports::{
    authorize, NewReport, Permission, Report, ReportPatch, Role, User,
};

use crate::clock::Clock;
use crate::error::{MutationError, MutationResult};
use crate::store::EntityStore;
use crate::tasks::{
    CacheInvalidationPayload, NotifyPayload, PreviewPayload, Task, TaskPayload, TaskSink,
};

/// Inbound update as received from a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub report_id: ReportId,
    #[serde(default)]
    pub caller_version: Option<u64>,
    #[serde(default)]
    pub patch: ReportPatch,
}

/// Report operations over injected stores and task sink.
pub struct ReportService<R, U, Q> {
    reports: R,
    users: U,
    tasks: Q,
    clock: Arc<dyn Clock>,
    mutation_lock: Mutex<()>,
}

impl<R, U, Q> ReportService<R, U, Q> {
    pub fn new(reports: R, users: U, tasks: Q, clock: Arc<dyn Clock>) -> Self {
        Self {
            reports,
            users,
            tasks,
            clock,
            mutation_lock: Mutex::new(()),
        }
    }

    // Nothing panics while holding the lock, so a poisoned guard is still sound.
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R, U, Q> ReportService<R, U, Q>
where
    R: EntityStore<Report>,
    U: EntityStore<User>,
    Q: TaskSink,
{
    pub fn register_user(&self, username: impl Into<String>, role: Role) -> MutationResult<User> {
        let username = username.into();
        if username.trim().is_empty() {
            return Err(MutationError::validation("username must not be empty"));
        }
        let user = User::new(username, role, self.clock.now());
        let user = self.users.put(user.id, user)?;
        debug!(user_id = %user.id, role = ?user.role, "user registered");
        Ok(user)
    }

    pub fn user(&self, user_id: UserId) -> MutationResult<User> {
        self.users
            .get(&user_id)?
            .ok_or_else(|| MutationError::not_found(format!("user {user_id}")))
    }

    pub fn get(&self, report_id: ReportId) -> MutationResult<Report> {
        self.reports
            .get(&report_id)?
            .ok_or_else(|| MutationError::not_found(format!("report {report_id}")))
    }

    /// All reports, oldest first.
    pub fn list(&self) -> MutationResult<Vec<Report>> {
        let mut reports = self.reports.list_all()?;
        reports.sort_by_key(|r| (r.created_at(), *r.id().as_uuid()));
        Ok(reports)
    }

    /// Create a report owned by `owner_id` and schedule its side effects.
    pub fn create(&self, owner_id: UserId, new: NewReport) -> MutationResult<Report> {
        let _guard = self.lock();

        self.user(owner_id)?;
        new.validate()?;

        let report = Report::create(owner_id, new, self.clock.now());
        report.check_initial_status()?;

        let report = self.reports.put(*report.id(), report)?;
        info!(report_id = %report.id(), owner_id = %owner_id, "report created");

        self.schedule_side_effects(&report);
        Ok(report)
    }

    fn schedule_side_effects(&self, report: &Report) {
        let report_id = *report.id();
        let now = self.clock.now();
        let payloads = [
            TaskPayload::Notify(NotifyPayload {
                report_id,
                recipient_id: report.owner_id(),
                title: report.title().to_string(),
            }),
            TaskPayload::InvalidateCache(CacheInvalidationPayload {
                report_id,
                keys: vec!["reports:list".to_string(), format!("reports:{report_id}")],
            }),
            TaskPayload::GeneratePreview(PreviewPayload { report_id }),
        ];

        for payload in payloads {
            let kind = payload.kind();
            if let Err(e) = self.tasks.enqueue(Task::new(payload, now)) {
                error!(report_id = %report_id, kind = %kind, error = %e, "failed to enqueue task");
            }
        }
    }

    /// Optimistic-lock update.
    ///
    /// Order of checks: report exists, version supplied, version matches,
    /// patch well-formed, status transition allowed.
    pub fn update(
        &self,
        report_id: ReportId,
        caller_version: Option<u64>,
        patch: &ReportPatch,
    ) -> MutationResult<Report> {
        let _guard = self.lock();

        let current = self.checked(report_id, caller_version)?;
        patch.validate()?;
        let next = current.apply(patch, self.clock.now())?;

        let next = self.reports.put(report_id, next)?;
        debug!(report_id = %report_id, version = next.version(), "report updated");
        Ok(next)
    }

    pub fn submit(&self, request: &UpdateRequest) -> MutationResult<Report> {
        self.update(request.report_id, request.caller_version, &request.patch)
    }

    pub fn attach(
        &self,
        report_id: ReportId,
        caller_version: Option<u64>,
        attachment: AttachmentId,
    ) -> MutationResult<Report> {
        let _guard = self.lock();

        let current = self.checked(report_id, caller_version)?;
        let next = current.with_attachment(attachment, self.clock.now());

        let next = self.reports.put(report_id, next)?;
        debug!(report_id = %report_id, attachment_id = %attachment, "attachment added");
        Ok(next)
    }

    pub fn detach(
        &self,
        report_id: ReportId,
        caller_version: Option<u64>,
        attachment: AttachmentId,
    ) -> MutationResult<Report> {
        let _guard = self.lock();

        let current = self.checked(report_id, caller_version)?;
        let next = current.without_attachment(attachment, self.clock.now())?;

        let next = self.reports.put(report_id, next)?;
        debug!(report_id = %report_id, attachment_id = %attachment, "attachment removed");
        Ok(next)
    }

    /// Remove a report. Tasks already queued for it still run.
    pub fn delete(&self, report_id: ReportId) -> MutationResult<()> {
        let _guard = self.lock();

        if !self.reports.delete(&report_id)? {
            return Err(MutationError::not_found(format!("report {report_id}")));
        }
        info!(report_id = %report_id, "report deleted");
        Ok(())
    }

    /// Steps shared by every versioned mutation.
    fn checked(&self, report_id: ReportId, caller_version: Option<u64>) -> MutationResult<Report> {
        let current = self.get(report_id)?;
        let Some(version) = caller_version else {
            return Err(MutationError::validation("version is required"));
        };
        ExpectedVersion(version).check_against(&current)?;
        Ok(current)
    }

    pub fn get_as(&self, actor_id: UserId, report_id: ReportId) -> MutationResult<Report> {
        let actor = self.user(actor_id)?;
        authorize(&actor, Permission::ReadReport)?;
        self.get(report_id)
    }

    pub fn create_as(&self, actor_id: UserId, new: NewReport) -> MutationResult<Report> {
        let actor = self.user(actor_id)?;
        authorize(&actor, Permission::CreateReport)?;
        self.create(actor.id, new)
    }

    pub fn update_as(
        &self,
        actor_id: UserId,
        report_id: ReportId,
        caller_version: Option<u64>,
        patch: &ReportPatch,
    ) -> MutationResult<Report> {
        let actor = self.user(actor_id)?;
        if !actor.role.allows(Permission::UpdateOwnReport) {
            authorize(&actor, Permission::UpdateAnyReport)?;
        }
        let report = self.get(report_id)?;
        authorize(&actor, Permission::update_for(&actor, &report))?;
        self.update(report_id, caller_version, patch)
    }

    pub fn delete_as(&self, actor_id: UserId, report_id: ReportId) -> MutationResult<()> {
        let actor = self.user(actor_id)?;
        authorize(&actor, Permission::DeleteReport)?;
        self.delete(report_id)
    }
}
