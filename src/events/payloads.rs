//! Typed payload views
//!
//! One struct per event `data` block. Handlers deserialize into these after
//! schema validation has passed, so optional fields carry serde defaults
//! but required fields can be trusted to exist.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ledger::model::Role;

/// `Users.Created`: a new identity from the auth service.
/// Version 1 lacked `full_name`; version 2 added it as optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreated {
    pub guid: Uuid,
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    pub role: Role,
}

/// `Users.Updated`: mutable profile fields; absent fields are unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserUpdated {
    pub guid: Uuid,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// `Users.RoleChanged`: role only, never touches the balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoleChanged {
    pub guid: Uuid,
    pub role: Role,
}

/// `Tasks.Created`: full task data for downstream projections.
/// Version 1 had the external reference embedded in `title`; version 2
/// split it out as the required `jira_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreated {
    pub guid: Uuid,
    pub title: String,
    pub jira_id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub assigned_to: Uuid,
}

/// `Tasks.Updated`: mutable task fields; pricing and doneness excluded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdated {
    pub guid: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub jira_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// `Tasks.Added`: the task entered the assignee's queue; triggers the
/// debit on the accounting side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAdded {
    pub guid: Uuid,
    pub assigned_to: Uuid,
}

/// `Tasks.Assigned`: reassignment; debits the new assignee at the
/// original price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssigned {
    pub guid: Uuid,
    pub assigned_to: Uuid,
}

/// `Tasks.Completed`: terminal; credits the assignee with the reward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompleted {
    pub guid: Uuid,
}

/// `Payments.Sent`: a payout settled, carrying the Payment row's guid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSent {
    pub guid: Uuid,
    pub amount: u64,
}
