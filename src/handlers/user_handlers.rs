//! Handlers for the user streaming and lifecycle events.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::broker::{EventHandler, HandlerError};
use crate::events::payloads::{UserCreated, UserRoleChanged, UserUpdated};
use crate::events::Envelope;
use crate::ledger::LedgerEngine;

pub struct UserCreatedHandler {
    engine: Arc<LedgerEngine>,
}

impl UserCreatedHandler {
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventHandler for UserCreatedHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        if self.engine.already_applied(envelope.meta.id).await? {
            debug!(event_id = %envelope.meta.id, "duplicate delivery skipped");
            return Ok(());
        }
        let data: UserCreated = envelope.data_as()?;
        self.engine.user_created(data).await?;
        self.engine.record_applied(envelope.meta.id).await?;
        Ok(())
    }
}

pub struct UserUpdatedHandler {
    engine: Arc<LedgerEngine>,
}

impl UserUpdatedHandler {
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventHandler for UserUpdatedHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        if self.engine.already_applied(envelope.meta.id).await? {
            debug!(event_id = %envelope.meta.id, "duplicate delivery skipped");
            return Ok(());
        }
        let data: UserUpdated = envelope.data_as()?;
        self.engine.user_updated(data).await?;
        self.engine.record_applied(envelope.meta.id).await?;
        Ok(())
    }
}

pub struct UserRoleChangedHandler {
    engine: Arc<LedgerEngine>,
}

impl UserRoleChangedHandler {
    pub fn new(engine: Arc<LedgerEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl EventHandler for UserRoleChangedHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError> {
        if self.engine.already_applied(envelope.meta.id).await? {
            debug!(event_id = %envelope.meta.id, "duplicate delivery skipped");
            return Ok(());
        }
        let data: UserRoleChanged = envelope.data_as()?;
        self.engine.user_role_changed(data).await?;
        self.engine.record_applied(envelope.meta.id).await?;
        Ok(())
    }
}
