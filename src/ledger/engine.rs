//! Ledger engine
//!
//! The domain operations behind both the event handlers and the HTTP
//! surface. Event-triggered and HTTP-triggered mutations share these code
//! paths: HTTP task operations only publish events, and the financial
//! effects land when the dispatcher feeds the events back through the
//! projection handlers.

use std::sync::Arc;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::EventPublisher;
use crate::events::payloads::{
    PaymentSent, TaskAssigned, TaskCreated, UserCreated, UserRoleChanged, UserUpdated,
};
use crate::events::payloads::{TaskAdded, TaskCompleted, TaskUpdated};
use crate::events::EventName;

use super::model::{Payment, Task, Transaction, TransactionKind, User};
use super::policy;
use super::store::{LedgerError, LedgerStore};

/// Caller-facing view for `GET /statistics/me`.
#[derive(Debug, Clone, Serialize)]
pub struct MyStatistics {
    pub balance: i64,
    pub transactions: Vec<Transaction>,
}

/// Outcome of one payout run.
#[derive(Debug, Clone)]
pub struct PayoutReport {
    pub settled: u32,
    pub total_amount: u64,
    pub errors: Vec<String>,
}

pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    publisher: Arc<EventPublisher>,
    rng: Mutex<StdRng>,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn LedgerStore>, publisher: Arc<EventPublisher>) -> Self {
        Self::with_rng(store, publisher, StdRng::from_entropy())
    }

    /// Pin the random source; assignment and pricing become reproducible.
    pub fn with_rng(
        store: Arc<dyn LedgerStore>,
        publisher: Arc<EventPublisher>,
        rng: StdRng,
    ) -> Self {
        Self {
            store,
            publisher,
            rng: Mutex::new(rng),
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub async fn get_user(&self, guid: Uuid) -> Result<Option<User>, LedgerError> {
        self.store.get_user(guid).await
    }

    // ------------------------------------------------------------------
    // Processed-event guard
    // ------------------------------------------------------------------

    pub async fn already_applied(&self, event_id: Uuid) -> Result<bool, LedgerError> {
        self.store.was_processed(event_id).await
    }

    pub async fn record_applied(&self, event_id: Uuid) -> Result<(), LedgerError> {
        self.store.mark_processed(event_id).await
    }

    // ------------------------------------------------------------------
    // Projection handlers (event-triggered)
    // ------------------------------------------------------------------

    pub async fn user_created(&self, data: UserCreated) -> Result<(), LedgerError> {
        let user = User::new(data.guid, data.username, data.full_name, data.role);
        self.store.upsert_user(&user).await?;
        info!(user = %user.guid, role = %user.role, "user projection created");
        Ok(())
    }

    pub async fn user_updated(&self, data: UserUpdated) -> Result<(), LedgerError> {
        self.store
            .update_user(data.guid, data.full_name, data.is_active)
            .await
    }

    pub async fn user_role_changed(&self, data: UserRoleChanged) -> Result<(), LedgerError> {
        self.store.update_user_role(data.guid, data.role).await
    }

    /// First sight of a task prices it; the draw is fixed for the task's
    /// lifetime, so a redelivered creation keeps the original numbers.
    pub async fn task_created(&self, data: TaskCreated) -> Result<(), LedgerError> {
        if self.store.get_task(data.guid).await?.is_some() {
            return Ok(());
        }
        let (price, reward) = {
            let mut rng = self.rng.lock().await;
            policy::price_task(&mut *rng)
        };
        let task = Task {
            guid: data.guid,
            title: data.title,
            jira_id: data.jira_id,
            description: data.description,
            assigned_to: data.assigned_to,
            price,
            reward,
            is_done: false,
        };
        self.store.insert_task(&task).await?;
        info!(task = %task.guid, price, reward, "task projection created");
        Ok(())
    }

    pub async fn task_updated(&self, data: TaskUpdated) -> Result<(), LedgerError> {
        self.store
            .update_task(data.guid, data.title, data.jira_id, data.description)
            .await
    }

    /// The task entered `assigned_to`'s queue: charge them the price.
    pub async fn task_added(&self, data: TaskAdded) -> Result<(), LedgerError> {
        let task = self
            .store
            .get_task(data.guid)
            .await?
            .ok_or(LedgerError::TaskNotFound(data.guid))?;
        self.charge(&task, data.assigned_to).await
    }

    /// Reassignment: the new assignee pays the original price.
    pub async fn task_assigned(&self, data: TaskAssigned) -> Result<(), LedgerError> {
        let task = self.store.reassign_task(data.guid, data.assigned_to).await?;
        self.charge(&task, data.assigned_to).await
    }

    pub async fn task_completed(&self, data: TaskCompleted) -> Result<(), LedgerError> {
        let task = self.store.mark_task_done(data.guid).await?;
        let txn = Transaction::new(
            task.assigned_to,
            task.reward as u64,
            TransactionKind::Credit,
            format!("Reward for task {} [{}]", task.title, task.jira_id),
        );
        self.store.append_transaction(&txn).await?;
        info!(
            task = %task.guid,
            user = %task.assigned_to,
            reward = task.reward,
            "task completed, reward credited"
        );
        Ok(())
    }

    async fn charge(&self, task: &Task, assignee: Uuid) -> Result<(), LedgerError> {
        let txn = Transaction::new(
            assignee,
            task.price as u64,
            TransactionKind::Debit,
            format!("Charge for task {} [{}]", task.title, task.jira_id),
        );
        self.store.append_transaction(&txn).await?;
        info!(
            task = %task.guid,
            user = %assignee,
            price = task.price,
            "assignee charged"
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Task origination (HTTP-triggered)
    // ------------------------------------------------------------------

    /// Create a task: pick a random eligible assignee and publish the
    /// creation and assignment events. The local projection and the debit
    /// materialize when the dispatcher consumes them, on the same code
    /// path as events from any other producer.
    pub async fn create_task(
        &self,
        title: String,
        jira_id: String,
        description: Option<String>,
    ) -> Result<TaskCreated, LedgerError> {
        let candidates = self.store.eligible_assignees().await?;
        let assigned_to = {
            let mut rng = self.rng.lock().await;
            policy::choose_assignee(&mut *rng, &candidates)
                .map(|user| user.guid)
                .ok_or(LedgerError::NoEligibleAssignee)?
        };

        let data = TaskCreated {
            guid: Uuid::new_v4(),
            title,
            jira_id,
            description,
            assigned_to,
        };
        self.publisher.publish(EventName::TaskCreated, &data).await?;
        self.publisher
            .publish(
                EventName::TaskAdded,
                &TaskAdded {
                    guid: data.guid,
                    assigned_to,
                },
            )
            .await?;
        Ok(data)
    }

    /// Publish completion for an existing, not yet finished task.
    pub async fn complete_task(&self, guid: Uuid) -> Result<(), LedgerError> {
        let task = self
            .store
            .get_task(guid)
            .await?
            .ok_or(LedgerError::TaskNotFound(guid))?;
        if task.is_done {
            return Err(LedgerError::TaskAlreadyDone(guid));
        }
        self.publisher
            .publish(EventName::TaskCompleted, &TaskCompleted { guid })
            .await?;
        Ok(())
    }

    /// Reassign every open task to a fresh uniform-random eligible
    /// assignee. A task may land on its current assignee again.
    pub async fn shuffle_tasks(&self) -> Result<u32, LedgerError> {
        let tasks = self.store.open_tasks().await?;
        let candidates = self.store.eligible_assignees().await?;
        if candidates.is_empty() {
            return Err(LedgerError::NoEligibleAssignee);
        }

        let mut reassigned = 0;
        for task in tasks {
            let assigned_to = {
                let mut rng = self.rng.lock().await;
                match policy::choose_assignee(&mut *rng, &candidates) {
                    Some(user) => user.guid,
                    None => return Err(LedgerError::NoEligibleAssignee),
                }
            };
            self.publisher
                .publish(
                    EventName::TaskAssigned,
                    &TaskAssigned {
                        guid: task.guid,
                        assigned_to,
                    },
                )
                .await?;
            reassigned += 1;
        }
        info!(reassigned, "task shuffle published");
        Ok(reassigned)
    }

    // ------------------------------------------------------------------
    // Payout
    // ------------------------------------------------------------------

    /// Settle every positive balance: payment transaction, balance reset,
    /// Payment row, then the `Payments.Sent` event, per user in that
    /// order. A failure on one user is recorded and the run moves on; the
    /// run can always be repeated because settlement only fires while the
    /// balance is positive.
    pub async fn run_payout(&self) -> Result<PayoutReport, LedgerError> {
        let users = self.store.users_with_positive_balance().await?;
        let mut report = PayoutReport {
            settled: 0,
            total_amount: 0,
            errors: Vec::new(),
        };

        for user in users {
            match self.pay_out(user.guid).await {
                Ok(Some(amount)) => {
                    report.settled += 1;
                    report.total_amount += amount;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(user = %user.guid, error = %err, "payout failed for user");
                    report.errors.push(format!("{}: {err}", user.guid));
                }
            }
        }

        info!(
            settled = report.settled,
            total_amount = report.total_amount,
            errors = report.errors.len(),
            "payout run finished"
        );
        Ok(report)
    }

    async fn pay_out(&self, user_guid: Uuid) -> Result<Option<u64>, LedgerError> {
        let description = format!("Payout for completed tasks on {}", Utc::now().date_naive());
        let Some(txn) = self.store.settle_balance(user_guid, &description).await? else {
            return Ok(None);
        };

        let payment = Payment::new(txn.guid, txn.amount);
        self.store.insert_payment(&payment).await?;
        self.publisher
            .publish(
                EventName::PaymentSent,
                &PaymentSent {
                    guid: payment.guid,
                    amount: payment.amount,
                },
            )
            .await?;
        info!(
            user = %user_guid,
            payment = %payment.guid,
            amount = payment.amount,
            "balance settled and payment sent"
        );
        Ok(Some(payment.amount))
    }

    // ------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------

    pub async fn statistics_for(&self, guid: Uuid) -> Result<MyStatistics, LedgerError> {
        let user = self
            .store
            .get_user(guid)
            .await?
            .ok_or(LedgerError::UserNotFound(guid))?;
        let transactions = self.store.transactions_for_user_today(guid).await?;
        Ok(MyStatistics {
            balance: user.balance,
            transactions,
        })
    }

    /// Today's management earnings: charges taken minus rewards paid.
    pub async fn total_earned_today(&self) -> Result<i64, LedgerError> {
        self.store.earned_today().await
    }
}
