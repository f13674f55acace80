//! Ledger store seam
//!
//! Every handler and job mutates state through [`LedgerStore`]. The
//! operations are shaped so that each balance mutation is atomic inside
//! the store (one database transaction, or one lock section in memory),
//! which keeps per-user accounting safe even with several queues and the
//! payout job running concurrently.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::broker::PublishError;

use super::model::{Payment, Role, Task, Transaction, User};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("user {0} not found")]
    UserNotFound(Uuid),

    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("task {0} is already done")]
    TaskAlreadyDone(Uuid),

    #[error("no eligible assignee available")]
    NoEligibleAssignee,

    #[error("datastore failure: {0}")]
    Store(#[from] sqlx::Error),

    #[error("event publish failed: {0}")]
    Publish(#[from] PublishError),
}

impl LedgerError {
    /// Whether redelivering the triggering event can succeed later.
    /// Missing entities are usually out-of-order arrival across queues;
    /// datastore and transport faults are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::UserNotFound(_) | LedgerError::TaskNotFound(_) => true,
            LedgerError::Store(_) => true,
            LedgerError::Publish(PublishError::Transport(_)) => true,
            LedgerError::Publish(_) => false,
            LedgerError::TaskAlreadyDone(_) | LedgerError::NoEligibleAssignee => false,
        }
    }
}

/// Persistence seam for projections, the transaction log and payments.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ------------------------------------------------------------------
    // User projection
    // ------------------------------------------------------------------

    /// Insert the user, or refresh identity fields if the guid is already
    /// known. The balance of an existing row is never touched.
    async fn upsert_user(&self, user: &User) -> Result<(), LedgerError>;

    async fn get_user(&self, guid: Uuid) -> Result<Option<User>, LedgerError>;

    /// Update mutable profile fields; `None` leaves a field unchanged.
    async fn update_user(
        &self,
        guid: Uuid,
        full_name: Option<String>,
        is_active: Option<bool>,
    ) -> Result<(), LedgerError>;

    async fn update_user_role(&self, guid: Uuid, role: Role) -> Result<(), LedgerError>;

    /// Active users whose role permits task assignment.
    async fn eligible_assignees(&self) -> Result<Vec<User>, LedgerError>;

    /// Users a payout run must visit.
    async fn users_with_positive_balance(&self) -> Result<Vec<User>, LedgerError>;

    // ------------------------------------------------------------------
    // Task projection
    // ------------------------------------------------------------------

    async fn insert_task(&self, task: &Task) -> Result<(), LedgerError>;

    async fn get_task(&self, guid: Uuid) -> Result<Option<Task>, LedgerError>;

    /// Update mutable task fields; pricing and doneness are immutable here.
    async fn update_task(
        &self,
        guid: Uuid,
        title: Option<String>,
        jira_id: Option<String>,
        description: Option<String>,
    ) -> Result<(), LedgerError>;

    /// Point the task at a new assignee, returning the updated row.
    async fn reassign_task(&self, guid: Uuid, assigned_to: Uuid) -> Result<Task, LedgerError>;

    /// Mark a task done, returning the final row. Completion is terminal:
    /// a task that is already done is an error, not a no-op.
    async fn mark_task_done(&self, guid: Uuid) -> Result<Task, LedgerError>;

    async fn open_tasks(&self) -> Result<Vec<Task>, LedgerError>;

    // ------------------------------------------------------------------
    // Transaction log
    // ------------------------------------------------------------------

    /// Append one ledger entry and apply its balance effect to the owning
    /// user, atomically.
    async fn append_transaction(&self, txn: &Transaction) -> Result<(), LedgerError>;

    /// Settle a positive balance: append a `payment` transaction carrying
    /// the current balance and reset the balance to zero, atomically.
    /// Returns `None` without side effects when the balance is not
    /// positive, which makes a payout run safe to repeat.
    async fn settle_balance(
        &self,
        user_guid: Uuid,
        description: &str,
    ) -> Result<Option<Transaction>, LedgerError>;

    async fn insert_payment(&self, payment: &Payment) -> Result<(), LedgerError>;

    /// The caller's ledger entries created today, newest first.
    async fn transactions_for_user_today(&self, guid: Uuid)
        -> Result<Vec<Transaction>, LedgerError>;

    /// Today's charges minus today's rewards across the whole ledger
    /// (debit sum minus credit sum).
    async fn earned_today(&self) -> Result<i64, LedgerError>;

    // ------------------------------------------------------------------
    // Processed-event guard
    // ------------------------------------------------------------------

    /// Whether an envelope id has already been applied.
    async fn was_processed(&self, event_id: Uuid) -> Result<bool, LedgerError>;

    /// Record an envelope id as applied. Recording the same id twice is a
    /// no-op.
    async fn mark_processed(&self, event_id: Uuid) -> Result<(), LedgerError>;
}
