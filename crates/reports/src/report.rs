use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reportdesk_core::{
    AggregateRoot, AttachmentId, CommentId, DomainError, DomainResult, Entity, EntryId, ReportId,
    UserId,
};

use crate::transition::{TransitionError, validate_transition};

/// Report status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Draft,
    Published,
    Archived,
}

impl core::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ReportStatus::Draft => "draft",
            ReportStatus::Published => "published",
            ReportStatus::Archived => "archived",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidentiality {
    Public,
    #[default]
    Internal,
    Confidential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub author_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(author_id: UserId, text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: CommentId::new(),
            author_id,
            text: text.into(),
            created_at: now,
        }
    }
}

/// A unit of report content.
///
/// Entries are value-like from the report's point of view: an update replaces
/// the whole sequence, it never edits one entry in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub content: String,
    pub priority: Priority,
    pub tags: BTreeSet<String>,
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    pub fn new(content: impl Into<String>, priority: Priority, now: DateTime<Utc>) -> Self {
        Self {
            id: EntryId::new(),
            content: content.into(),
            priority,
            tags: BTreeSet::new(),
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_comment(mut self, comment: Comment) -> Self {
        self.comments.push(comment);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub department: String,
    pub confidentiality: Confidentiality,
    pub estimated_read_minutes: u32,
    pub last_reviewed_by: Option<UserId>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

/// Field-by-field metadata update; `None` keeps the stored value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetadataPatch {
    pub department: Option<String>,
    pub confidentiality: Option<Confidentiality>,
    pub estimated_read_minutes: Option<u32>,
    pub last_reviewed_by: Option<UserId>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

impl MetadataPatch {
    fn merge_into(&self, metadata: &mut Metadata) {
        if let Some(department) = &self.department {
            metadata.department = department.clone();
        }
        if let Some(confidentiality) = self.confidentiality {
            metadata.confidentiality = confidentiality;
        }
        if let Some(minutes) = self.estimated_read_minutes {
            metadata.estimated_read_minutes = minutes;
        }
        if let Some(reviewer) = self.last_reviewed_by {
            metadata.last_reviewed_by = Some(reviewer);
        }
        if let Some(at) = self.last_reviewed_at {
            metadata.last_reviewed_at = Some(at);
        }
    }
}

/// Input for creating a report.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewReport {
    pub title: String,
    pub description: String,
    /// Initial status; `None` means draft.
    pub status: Option<ReportStatus>,
    pub entries: Vec<Entry>,
    pub metadata: Metadata,
}

impl NewReport {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.title.trim().is_empty() {
            return Err(DomainError::validation("title must not be empty"));
        }
        validate_entries(&self.entries)
    }
}

/// Partial report update. Absent fields keep their stored values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<ReportStatus>,
    pub metadata: Option<MetadataPatch>,
    /// Replaces the whole entry sequence when present.
    pub entries: Option<Vec<Entry>>,
}

impl ReportPatch {
    pub fn validate(&self) -> DomainResult<()> {
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(DomainError::validation("title must not be empty"));
            }
        }
        if let Some(entries) = &self.entries {
            validate_entries(entries)?;
        }
        Ok(())
    }
}

fn validate_entries(entries: &[Entry]) -> DomainResult<()> {
    if let Some(idx) = entries.iter().position(|e| e.content.trim().is_empty()) {
        return Err(DomainError::validation(format!(
            "entry {idx} has empty content"
        )));
    }
    Ok(())
}

/// Aggregate root: Report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    id: ReportId,
    title: String,
    description: String,
    status: ReportStatus,
    owner_id: UserId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
    entries: Vec<Entry>,
    metadata: Metadata,
    attachments: BTreeSet<AttachmentId>,
}

impl Report {
    /// Build a fresh report at version 1.
    ///
    /// Input validation and the initial status rule are the caller's job (see
    /// `NewReport::validate` and `Report::check_initial_status`).
    pub fn create(owner_id: UserId, new: NewReport, now: DateTime<Utc>) -> Self {
        Self {
            id: ReportId::new(),
            title: new.title,
            description: new.description,
            status: new.status.unwrap_or(ReportStatus::Draft),
            owner_id,
            created_at: now,
            updated_at: now,
            version: 1,
            entries: new.entries,
            metadata: new.metadata,
            attachments: BTreeSet::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> ReportStatus {
        self.status
    }

    pub fn owner_id(&self) -> UserId {
        self.owner_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn attachments(&self) -> &BTreeSet<AttachmentId> {
        &self.attachments
    }

    /// A new report is judged as if it moved out of `draft`.
    pub fn check_initial_status(&self) -> Result<(), TransitionError> {
        let mut baseline = self.clone();
        baseline.status = ReportStatus::Draft;
        validate_transition(&baseline, &self.entries, self.status)
    }

    /// Decide the next state for `patch` without touching `self`.
    ///
    /// A status change is validated against the patched entries. On success the
    /// returned report carries `version + 1` and `updated_at = now`.
    pub fn apply(&self, patch: &ReportPatch, now: DateTime<Utc>) -> Result<Report, TransitionError> {
        let mut next = self.clone();

        if let Some(title) = &patch.title {
            next.title = title.clone();
        }
        if let Some(description) = &patch.description {
            next.description = description.clone();
        }
        if let Some(entries) = &patch.entries {
            next.entries = entries.clone();
        }
        if let Some(metadata) = &patch.metadata {
            metadata.merge_into(&mut next.metadata);
        }
        if let Some(requested) = patch.status {
            if requested != self.status {
                validate_transition(self, &next.entries, requested)?;
            }
            next.status = requested;
        }

        Ok(next.committed(now))
    }

    /// Next state with `attachment` referenced.
    pub fn with_attachment(&self, attachment: AttachmentId, now: DateTime<Utc>) -> Report {
        let mut next = self.clone();
        next.attachments.insert(attachment);
        next.committed(now)
    }

    /// Next state with `attachment` dropped; fails if it was never attached.
    pub fn without_attachment(
        &self,
        attachment: AttachmentId,
        now: DateTime<Utc>,
    ) -> DomainResult<Report> {
        let mut next = self.clone();
        if !next.attachments.remove(&attachment) {
            return Err(DomainError::not_found(format!("attachment {attachment}")));
        }
        Ok(next.committed(now))
    }

    fn committed(mut self, now: DateTime<Utc>) -> Report {
        self.updated_at = now;
        self.version += 1;
        self
    }
}

impl Entity for Report {
    type Id = ReportId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl AggregateRoot for Report {
    fn version(&self) -> u64 {
        self.version
    }
}
