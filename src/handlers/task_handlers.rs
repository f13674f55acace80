//! Handlers for the task streaming and lifecycle events.
//!
//! The lifecycle handlers move money. `Tasks.Added` and `Tasks.Assigned`
//! debit the assignee at the task's price; `Tasks.Completed` credits the
//! reward. A lifecycle event arriving before its `Tasks.Created` projection
//! fails with a retryable not-found and rides the redelivery backoff until
//! the projection lands.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::broker::{EventHandler, HandlerError};
use crate::events::payloads::{TaskAdded, TaskAssigned, TaskCompleted, TaskCreated, TaskUpdated};
use crate::events::Envelope;
use crate::ledger::LedgerEngine;

pub struct TaskCreatedHandler {
    engine: Arc<LedgerEngine>,
}

impl TaskCreatedHandler {
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventHandler for TaskCreatedHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        if self.engine.already_applied(envelope.meta.id).await? {
            debug!(event_id = %envelope.meta.id, "duplicate delivery skipped");
            return Ok(());
        }
        let data: TaskCreated = envelope.data_as()?;
        self.engine.task_created(data).await?;
        self.engine.record_applied(envelope.meta.id).await?;
        Ok(())
    }
}

pub struct TaskUpdatedHandler {
    engine: Arc<LedgerEngine>,
}

impl TaskUpdatedHandler {
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventHandler for TaskUpdatedHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        if self.engine.already_applied(envelope.meta.id).await? {
            debug!(event_id = %envelope.meta.id, "duplicate delivery skipped");
            return Ok(());
        }
        let data: TaskUpdated = envelope.data_as()?;
        self.engine.task_updated(data).await?;
        self.engine.record_applied(envelope.meta.id).await?;
        Ok(())
    }
}

pub struct TaskAddedHandler {
    engine: Arc<LedgerEngine>,
}

impl TaskAddedHandler {
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventHandler for TaskAddedHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        if self.engine.already_applied(envelope.meta.id).await? {
            debug!(event_id = %envelope.meta.id, "duplicate delivery skipped");
            return Ok(());
        }
        let data: TaskAdded = envelope.data_as()?;
        self.engine.task_added(data).await?;
        self.engine.record_applied(envelope.meta.id).await?;
        Ok(())
    }
}

pub struct TaskAssignedHandler {
    engine: Arc<LedgerEngine>,
}

impl TaskAssignedHandler {
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventHandler for TaskAssignedHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        if self.engine.already_applied(envelope.meta.id).await? {
            debug!(event_id = %envelope.meta.id, "duplicate delivery skipped");
            return Ok(());
        }
        let data: TaskAssigned = envelope.data_as()?;
        self.engine.task_assigned(data).await?;
        self.engine.record_applied(envelope.meta.id).await?;
        Ok(())
    }
}

pub struct TaskCompletedHandler {
    engine: Arc<LedgerEngine>,
}

impl TaskCompletedHandler {
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventHandler for TaskCompletedHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        if self.engine.already_applied(envelope.meta.id).await? {
            debug!(event_id = %envelope.meta.id, "duplicate delivery skipped");
            return Ok(());
        }
        let data: TaskCompleted = envelope.data_as()?;
        self.engine.task_completed(data).await?;
        self.engine.record_applied(envelope.meta.id).await?;
        Ok(())
    }
}
