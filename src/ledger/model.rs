//! Ledger domain model
//!
//! Users and tasks are projections rebuilt from events owned by other
//! services. Transactions are the append-only ledger; a user's balance is
//! the fold of transaction effects. Payments settle positive balances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User role, assigned by the auth service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Worker,
    Accountant,
}

impl Role {
    /// Roles that never get tasks assigned to them.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }

    /// Roles allowed to read ledger-wide statistics.
    pub fn can_read_totals(&self) -> bool {
        matches!(self, Role::Admin | Role::Accountant)
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        match s.as_str() {
            "admin" => Role::Admin,
            "manager" => Role::Manager,
            "accountant" => Role::Accountant,
            _ => Role::Worker,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Manager => write!(f, "manager"),
            Role::Worker => write!(f, "worker"),
            Role::Accountant => write!(f, "accountant"),
        }
    }
}

/// Effect a transaction has on the owning user's balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Funds leave the entry; balance decreases by `amount`.
    Debit,
    /// Balance increases by `amount`.
    Credit,
    /// Payout settlement; balance resets to zero.
    Payment,
}

impl From<String> for TransactionKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "debit" => TransactionKind::Debit,
            "payment" => TransactionKind::Payment,
            _ => TransactionKind::Credit,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionKind::Debit => write!(f, "debit"),
            TransactionKind::Credit => write!(f, "credit"),
            TransactionKind::Payment => write!(f, "payment"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    Completed,
}

impl From<String> for PaymentStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "completed" => PaymentStatus::Completed,
            _ => PaymentStatus::Created,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Created => write!(f, "created"),
            PaymentStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Local projection of a user, built purely from auth-service events.
///
/// `balance` is in currency minor units and may go negative; it always
/// equals credits minus debits since the last payment settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub guid: Uuid,
    pub username: String,
    pub full_name: Option<String>,
    pub role: Role,
    pub balance: i64,
    pub is_active: bool,
}

impl User {
    pub fn new(guid: Uuid, username: String, full_name: Option<String>, role: Role) -> Self {
        Self {
            guid,
            username,
            full_name,
            role,
            balance: 0,
            is_active: true,
        }
    }
}

/// Local projection of a task.
///
/// `price` and `reward` are fixed when the projection is first created and
/// never change afterward; reassignment keeps the original cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub guid: Uuid,
    pub title: String,
    pub jira_id: String,
    pub description: Option<String>,
    pub assigned_to: Uuid,
    pub price: i64,
    pub reward: i64,
    pub is_done: bool,
}

/// One immutable ledger entry. Never edited, only appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub guid: Uuid,
    pub user_guid: Uuid,
    /// Unsigned magnitude; the sign of the effect comes from `kind`.
    pub amount: u64,
    pub kind: TransactionKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(user_guid: Uuid, amount: u64, kind: TransactionKind, description: String) -> Self {
        Self {
            guid: Uuid::new_v4(),
            user_guid,
            amount,
            kind,
            description,
            created_at: Utc::now(),
        }
    }

    /// Signed balance delta this entry applies when appended.
    /// `Payment` entries carry no delta; they accompany a reset to zero.
    pub fn balance_effect(&self) -> i64 {
        match self.kind {
            TransactionKind::Debit => -(self.amount as i64),
            TransactionKind::Credit => self.amount as i64,
            TransactionKind::Payment => 0,
        }
    }
}

/// Settlement record for one payout, referencing the payment transaction
/// that zeroed the balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub guid: Uuid,
    pub amount: u64,
    pub status: PaymentStatus,
    pub transaction_guid: Uuid,
}

impl Payment {
    pub fn new(transaction_guid: Uuid, amount: u64) -> Self {
        Self {
            guid: Uuid::new_v4(),
            amount,
            status: PaymentStatus::Created,
            transaction_guid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Admin, Role::Manager, Role::Worker, Role::Accountant] {
            assert_eq!(Role::from(role.to_string()), role);
        }
    }

    #[test]
    fn test_privileged_roles_are_excluded_from_assignment() {
        assert!(Role::Admin.is_privileged());
        assert!(Role::Manager.is_privileged());
        assert!(!Role::Worker.is_privileged());
        assert!(!Role::Accountant.is_privileged());
    }

    #[test]
    fn test_balance_effect_signs() {
        let user = Uuid::new_v4();
        let debit = Transaction::new(user, 15, TransactionKind::Debit, "charge".into());
        let credit = Transaction::new(user, 30, TransactionKind::Credit, "reward".into());
        let payment = Transaction::new(user, 15, TransactionKind::Payment, "payout".into());
        assert_eq!(debit.balance_effect(), -15);
        assert_eq!(credit.balance_effect(), 30);
        assert_eq!(payment.balance_effect(), 0);
    }

    #[test]
    fn test_new_user_starts_at_zero_and_active() {
        let user = User::new(Uuid::new_v4(), "worker-1".into(), None, Role::Worker);
        assert_eq!(user.balance, 0);
        assert!(user.is_active);
    }
}
