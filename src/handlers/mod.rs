//! Event handlers module
//!
//! One handler per consumed event, each a thin adapter from a validated
//! envelope to a [`LedgerEngine`] operation. Every handler runs behind the
//! processed-event guard, so a redelivered envelope id is acknowledged
//! without reapplying its effect.

mod task_handlers;
mod user_handlers;


pub use task_handlers::{
    TaskAddedHandler, TaskAssignedHandler, TaskCompletedHandler, TaskCreatedHandler,
    TaskUpdatedHandler,
};
pub use user_handlers::{UserCreatedHandler, UserRoleChangedHandler, UserUpdatedHandler};

use std::sync::Arc;

use crate::broker::{BrokerError, ConsumerDispatcher, HandlerError};
use crate::events::{exchanges, EventName};
use crate::ledger::{LedgerEngine, LedgerError};

impl From<LedgerError> for HandlerError {
    fn from(err: LedgerError) -> Self {
        let retryable = err.is_retryable();
        let message = err.to_string();
        match err {
            LedgerError::UserNotFound(_) | LedgerError::TaskNotFound(_) => {
                HandlerError::NotFound(message)
            }
            LedgerError::Store(_) => HandlerError::Infrastructure(message),
            LedgerError::Publish(_) if retryable => HandlerError::Infrastructure(message),
            _ => HandlerError::Rejected(message),
        }
    }
}

/// Put every consumed event behind its handler.
pub fn register_ledger_handlers(dispatcher: &mut ConsumerDispatcher, engine: &Arc<LedgerEngine>) {
    dispatcher.register(
        EventName::UserCreated,
        Arc::new(UserCreatedHandler::new(engine.clone())),
    );
    dispatcher.register(
        EventName::UserUpdated,
        Arc::new(UserUpdatedHandler::new(engine.clone())),
    );
    dispatcher.register(
        EventName::UserRoleChanged,
        Arc::new(UserRoleChangedHandler::new(engine.clone())),
    );
    dispatcher.register(
        EventName::TaskCreated,
        Arc::new(TaskCreatedHandler::new(engine.clone())),
    );
    dispatcher.register(
        EventName::TaskUpdated,
        Arc::new(TaskUpdatedHandler::new(engine.clone())),
    );
    dispatcher.register(
        EventName::TaskAdded,
        Arc::new(TaskAddedHandler::new(engine.clone())),
    );
    dispatcher.register(
        EventName::TaskAssigned,
        Arc::new(TaskAssignedHandler::new(engine.clone())),
    );
    dispatcher.register(
        EventName::TaskCompleted,
        Arc::new(TaskCompletedHandler::new(engine.clone())),
    );
}

/// Declare and bind the consumed queues, one per upstream topic family.
/// `Payments.Sent` is emitted here and consumed elsewhere, so it has no
/// binding.
pub async fn bind_event_routes(dispatcher: &mut ConsumerDispatcher) -> Result<(), BrokerError> {
    let service = dispatcher.service_name().to_string();
    dispatcher
        .bind(
            exchanges::USERS_CUD,
            "Users.*",
            &format!("{service}.user-stream.queue"),
        )
        .await?;
    dispatcher
        .bind(
            exchanges::BUSINESS,
            "Users.RoleChanged",
            &format!("{service}.user-lifecycle.queue"),
        )
        .await?;
    dispatcher
        .bind(
            exchanges::TASKS_CUD,
            "Tasks.*",
            &format!("{service}.tasks-stream.queue"),
        )
        .await?;
    dispatcher
        .bind(
            exchanges::BUSINESS,
            "Tasks.*",
            &format!("{service}.tasks-lifecycle.queue"),
        )
        .await?;
    // Producers on the earlier protocol still publish to these names.
    for exchange in exchanges::LEGACY {
        dispatcher.declare_exchange(exchange).await?;
    }
    Ok(())
}
