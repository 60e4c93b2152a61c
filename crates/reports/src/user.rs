//! Users and the role policy gating report mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use reportdesk_core::{Entity, UserId};

use crate::report::Report;

/// Role assigned to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    Viewer,
}

/// Permission checked before a report operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadReport,
    CreateReport,
    UpdateOwnReport,
    UpdateAnyReport,
    DeleteReport,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ReadReport => "report.read",
            Permission::CreateReport => "report.create",
            Permission::UpdateOwnReport => "report.update_own",
            Permission::UpdateAnyReport => "report.update_any",
            Permission::DeleteReport => "report.delete",
        }
    }

    /// Update permission needed by `actor` to touch `report`.
    pub fn update_for(actor: &User, report: &Report) -> Self {
        if report.owner_id() == actor.id {
            Permission::UpdateOwnReport
        } else {
            Permission::UpdateAnyReport
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Role {
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::Admin => &[
                Permission::ReadReport,
                Permission::CreateReport,
                Permission::UpdateOwnReport,
                Permission::UpdateAnyReport,
                Permission::DeleteReport,
            ],
            Role::Editor => &[
                Permission::ReadReport,
                Permission::CreateReport,
                Permission::UpdateOwnReport,
            ],
            Role::Viewer => &[Permission::ReadReport],
        }
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, role: Role, now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            role,
            created_at: now,
        }
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: role '{role:?}' lacks permission '{permission}'")]
    Forbidden { role: Role, permission: Permission },
}

/// Pure policy check: no IO, no business logic.
pub fn authorize(actor: &User, required: Permission) -> Result<(), AuthzError> {
    if actor.role.allows(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            role: actor.role,
            permission: required,
        })
    }
}
