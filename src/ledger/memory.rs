//! In-memory ledger store
//!
//! A single-lock implementation used by tests and the local simulator.
//! One write-lock section per operation gives the same atomicity the
//! Postgres store gets from a database transaction.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{Payment, Role, Task, Transaction, TransactionKind, User};
use super::policy;
use super::store::{LedgerError, LedgerStore};

#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    tasks: HashMap<Uuid, Task>,
    transactions: Vec<Transaction>,
    payments: Vec<Payment>,
    processed: HashSet<Uuid>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every ledger entry for a user, oldest first. Inspection helper for
    /// tests and tools; not part of the store trait.
    pub async fn transactions_for(&self, guid: Uuid) -> Vec<Transaction> {
        let inner = self.inner.read().await;
        inner
            .transactions
            .iter()
            .filter(|t| t.user_guid == guid)
            .cloned()
            .collect()
    }

    /// All payment rows, oldest first.
    pub async fn payments(&self) -> Vec<Payment> {
        let inner = self.inner.read().await;
        inner.payments.clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn upsert_user(&self, user: &User) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        match inner.users.get_mut(&user.guid) {
            Some(existing) => {
                // Identity refresh; the locally accrued balance survives.
                existing.username = user.username.clone();
                existing.full_name = user.full_name.clone();
                existing.role = user.role;
            }
            None => {
                inner.users.insert(user.guid, user.clone());
            }
        }
        Ok(())
    }

    async fn get_user(&self, guid: Uuid) -> Result<Option<User>, LedgerError> {
        let inner = self.inner.read().await;
        Ok(inner.users.get(&guid).cloned())
    }

    async fn update_user(
        &self,
        guid: Uuid,
        full_name: Option<String>,
        is_active: Option<bool>,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&guid)
            .ok_or(LedgerError::UserNotFound(guid))?;
        if let Some(full_name) = full_name {
            user.full_name = Some(full_name);
        }
        if let Some(is_active) = is_active {
            user.is_active = is_active;
        }
        Ok(())
    }

    async fn update_user_role(&self, guid: Uuid, role: Role) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&guid)
            .ok_or(LedgerError::UserNotFound(guid))?;
        user.role = role;
        Ok(())
    }

    async fn eligible_assignees(&self) -> Result<Vec<User>, LedgerError> {
        let inner = self.inner.read().await;
        let mut eligible: Vec<User> = inner
            .users
            .values()
            .filter(|user| policy::is_eligible(user))
            .cloned()
            .collect();
        // Stable order so seeded selection is reproducible.
        eligible.sort_by_key(|user| user.guid);
        Ok(eligible)
    }

    async fn users_with_positive_balance(&self) -> Result<Vec<User>, LedgerError> {
        let inner = self.inner.read().await;
        let mut users: Vec<User> = inner
            .users
            .values()
            .filter(|user| user.balance > 0)
            .cloned()
            .collect();
        users.sort_by_key(|user| user.guid);
        Ok(users)
    }

    async fn insert_task(&self, task: &Task) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        inner.tasks.insert(task.guid, task.clone());
        Ok(())
    }

    async fn get_task(&self, guid: Uuid) -> Result<Option<Task>, LedgerError> {
        let inner = self.inner.read().await;
        Ok(inner.tasks.get(&guid).cloned())
    }

    async fn update_task(
        &self,
        guid: Uuid,
        title: Option<String>,
        jira_id: Option<String>,
        description: Option<String>,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&guid)
            .ok_or(LedgerError::TaskNotFound(guid))?;
        if let Some(title) = title {
            task.title = title;
        }
        if let Some(jira_id) = jira_id {
            task.jira_id = jira_id;
        }
        if let Some(description) = description {
            task.description = Some(description);
        }
        Ok(())
    }

    async fn reassign_task(&self, guid: Uuid, assigned_to: Uuid) -> Result<Task, LedgerError> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&guid)
            .ok_or(LedgerError::TaskNotFound(guid))?;
        task.assigned_to = assigned_to;
        Ok(task.clone())
    }

    async fn mark_task_done(&self, guid: Uuid) -> Result<Task, LedgerError> {
        let mut inner = self.inner.write().await;
        let task = inner
            .tasks
            .get_mut(&guid)
            .ok_or(LedgerError::TaskNotFound(guid))?;
        if task.is_done {
            return Err(LedgerError::TaskAlreadyDone(guid));
        }
        task.is_done = true;
        Ok(task.clone())
    }

    async fn open_tasks(&self) -> Result<Vec<Task>, LedgerError> {
        let inner = self.inner.read().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|task| !task.is_done)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.guid);
        Ok(tasks)
    }

    async fn append_transaction(&self, txn: &Transaction) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&txn.user_guid)
            .ok_or(LedgerError::UserNotFound(txn.user_guid))?;
        user.balance += txn.balance_effect();
        inner.transactions.push(txn.clone());
        Ok(())
    }

    async fn settle_balance(
        &self,
        user_guid: Uuid,
        description: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(&user_guid)
            .ok_or(LedgerError::UserNotFound(user_guid))?;
        if user.balance <= 0 {
            return Ok(None);
        }
        let txn = Transaction::new(
            user_guid,
            user.balance as u64,
            TransactionKind::Payment,
            description.to_string(),
        );
        user.balance = 0;
        inner.transactions.push(txn.clone());
        Ok(Some(txn))
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        inner.payments.push(payment.clone());
        Ok(())
    }

    async fn transactions_for_user_today(
        &self,
        guid: Uuid,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let today = Utc::now().date_naive();
        let inner = self.inner.read().await;
        let mut transactions: Vec<Transaction> = inner
            .transactions
            .iter()
            .filter(|t| t.user_guid == guid && t.created_at.date_naive() == today)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transactions)
    }

    async fn earned_today(&self) -> Result<i64, LedgerError> {
        let today = Utc::now().date_naive();
        let inner = self.inner.read().await;
        let mut earned = 0i64;
        for txn in inner
            .transactions
            .iter()
            .filter(|t| t.created_at.date_naive() == today)
        {
            match txn.kind {
                TransactionKind::Debit => earned += txn.amount as i64,
                TransactionKind::Credit => earned -= txn.amount as i64,
                TransactionKind::Payment => {}
            }
        }
        Ok(earned)
    }

    async fn was_processed(&self, event_id: Uuid) -> Result<bool, LedgerError> {
        let inner = self.inner.read().await;
        Ok(inner.processed.contains(&event_id))
    }

    async fn mark_processed(&self, event_id: Uuid) -> Result<(), LedgerError> {
        let mut inner = self.inner.write().await;
        inner.processed.insert(event_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_worker() -> (MemoryLedgerStore, Uuid) {
        let store = MemoryLedgerStore::new();
        let guid = Uuid::new_v4();
        store
            .upsert_user(&User::new(guid, "worker-1".into(), None, Role::Worker))
            .await
            .unwrap();
        (store, guid)
    }

    #[tokio::test]
    async fn test_balance_is_the_fold_of_transaction_effects() {
        let (store, guid) = store_with_worker().await;
        let entries = [
            (15, TransactionKind::Debit),
            (30, TransactionKind::Credit),
            (12, TransactionKind::Debit),
            (25, TransactionKind::Credit),
        ];

        let mut expected = 0i64;
        for (amount, kind) in entries {
            store
                .append_transaction(&Transaction::new(guid, amount, kind, "entry".into()))
                .await
                .unwrap();
            expected += match kind {
                TransactionKind::Debit => -(amount as i64),
                TransactionKind::Credit => amount as i64,
                TransactionKind::Payment => 0,
            };
            let user = store.get_user(guid).await.unwrap().unwrap();
            assert_eq!(user.balance, expected);
        }
        assert_eq!(expected, 28);
    }

    #[tokio::test]
    async fn test_append_for_unknown_user_is_not_found() {
        let store = MemoryLedgerStore::new();
        let err = store
            .append_transaction(&Transaction::new(
                Uuid::new_v4(),
                10,
                TransactionKind::Debit,
                "charge".into(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::UserNotFound(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_settle_is_a_no_op_without_positive_balance() {
        let (store, guid) = store_with_worker().await;
        assert!(store.settle_balance(guid, "payout").await.unwrap().is_none());

        store
            .append_transaction(&Transaction::new(guid, 15, TransactionKind::Debit, "charge".into()))
            .await
            .unwrap();
        assert!(store.settle_balance(guid, "payout").await.unwrap().is_none());
        let user = store.get_user(guid).await.unwrap().unwrap();
        assert_eq!(user.balance, -15);
    }

    #[tokio::test]
    async fn test_settle_captures_balance_and_resets() {
        let (store, guid) = store_with_worker().await;
        store
            .append_transaction(&Transaction::new(guid, 15, TransactionKind::Credit, "reward".into()))
            .await
            .unwrap();

        let txn = store.settle_balance(guid, "payout").await.unwrap().unwrap();
        assert_eq!(txn.amount, 15);
        assert_eq!(txn.kind, TransactionKind::Payment);
        let user = store.get_user(guid).await.unwrap().unwrap();
        assert_eq!(user.balance, 0);

        // Second run is a no-op; the run is repeatable.
        assert!(store.settle_balance(guid, "payout").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completion_is_terminal() {
        let store = MemoryLedgerStore::new();
        let task = Task {
            guid: Uuid::new_v4(),
            title: "Recalibrate the perch".into(),
            jira_id: "UBER-42".into(),
            description: None,
            assigned_to: Uuid::new_v4(),
            price: 15,
            reward: 30,
            is_done: false,
        };
        store.insert_task(&task).await.unwrap();

        let done = store.mark_task_done(task.guid).await.unwrap();
        assert!(done.is_done);
        let err = store.mark_task_done(task.guid).await.unwrap_err();
        assert!(matches!(err, LedgerError::TaskAlreadyDone(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_upsert_preserves_accrued_balance() {
        let (store, guid) = store_with_worker().await;
        store
            .append_transaction(&Transaction::new(guid, 30, TransactionKind::Credit, "reward".into()))
            .await
            .unwrap();

        let refreshed = User::new(guid, "worker-1-renamed".into(), Some("A. Worker".into()), Role::Worker);
        store.upsert_user(&refreshed).await.unwrap();

        let user = store.get_user(guid).await.unwrap().unwrap();
        assert_eq!(user.username, "worker-1-renamed");
        assert_eq!(user.balance, 30);
    }

    #[tokio::test]
    async fn test_processed_guard_round_trip() {
        let store = MemoryLedgerStore::new();
        let event_id = Uuid::new_v4();
        assert!(!store.was_processed(event_id).await.unwrap());
        store.mark_processed(event_id).await.unwrap();
        assert!(store.was_processed(event_id).await.unwrap());
        // Recording twice stays a no-op.
        store.mark_processed(event_id).await.unwrap();
        assert!(store.was_processed(event_id).await.unwrap());
    }
}
