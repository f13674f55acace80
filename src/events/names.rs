//! Wire vocabulary
//!
//! Routing keys and exchange names shared by every producer and consumer.
//! Keeping the full set in one place makes the handled events statically
//! enumerable instead of scattered string literals.

use std::fmt;

/// Durable topic exchanges.
pub mod exchanges {
    /// User create/update stream, owned by the auth service.
    pub const USERS_CUD: &str = "users.cud.events";

    /// Task create/update stream, owned by the task service.
    pub const TASKS_CUD: &str = "tasks.cud.events";

    /// Business lifecycle events (role changes, task lifecycle).
    /// The misspelling is literal: deployed consumers bind to this name.
    pub const BUSINESS: &str = "bussines.events";

    /// Payment lifecycle events emitted by payout runs.
    pub const PAYMENTS_LIFECYCLE: &str = "payments.lifecycle.events";

    /// Exchange names from the v1 protocol. Still declared at startup so
    /// producers that have not migrated keep a valid destination.
    pub const LEGACY: [&str; 5] = [
        "user.topic",
        "users-stream",
        "users-lifecycle",
        "tasks-stream",
        "tasks-lifecycle",
    ];
}

/// Every event name this system produces or consumes.
///
/// The routing key is the dot-separated form (`Users.Created`); its first
/// two segments select the schema namespace in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    UserCreated,
    UserUpdated,
    UserRoleChanged,
    TaskCreated,
    TaskUpdated,
    TaskAdded,
    TaskAssigned,
    TaskCompleted,
    PaymentSent,
}

impl EventName {
    pub const ALL: [EventName; 9] = [
        EventName::UserCreated,
        EventName::UserUpdated,
        EventName::UserRoleChanged,
        EventName::TaskCreated,
        EventName::TaskUpdated,
        EventName::TaskAdded,
        EventName::TaskAssigned,
        EventName::TaskCompleted,
        EventName::PaymentSent,
    ];

    /// The routing key this event is published under.
    pub fn routing_key(&self) -> &'static str {
        match self {
            EventName::UserCreated => "Users.Created",
            EventName::UserUpdated => "Users.Updated",
            EventName::UserRoleChanged => "Users.RoleChanged",
            EventName::TaskCreated => "Tasks.Created",
            EventName::TaskUpdated => "Tasks.Updated",
            EventName::TaskAdded => "Tasks.Added",
            EventName::TaskAssigned => "Tasks.Assigned",
            EventName::TaskCompleted => "Tasks.Completed",
            EventName::PaymentSent => "Payments.Sent",
        }
    }

    /// Resolve a routing key back to its event name.
    /// Unknown keys are not an error at this level; queues may be bound to
    /// a superset of what a service handles.
    pub fn parse(routing_key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|name| name.routing_key() == routing_key)
    }

    /// The exchange this event is published to.
    pub fn exchange(&self) -> &'static str {
        match self {
            EventName::UserCreated | EventName::UserUpdated => exchanges::USERS_CUD,
            EventName::TaskCreated | EventName::TaskUpdated => exchanges::TASKS_CUD,
            EventName::UserRoleChanged
            | EventName::TaskAdded
            | EventName::TaskAssigned
            | EventName::TaskCompleted => exchanges::BUSINESS,
            EventName::PaymentSent => exchanges::PAYMENTS_LIFECYCLE,
        }
    }

    /// The schema version current producers publish.
    /// Older versions stay published in the registry forever.
    pub fn current_version(&self) -> u32 {
        match self {
            EventName::UserCreated | EventName::TaskCreated => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}
