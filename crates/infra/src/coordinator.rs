//! Transaction Coordinator: one command, one unit of work.
//!
//! ## Command Execution Flow
//!
//! ```text
//! begin(ctx, command)            -> UnitOfWork (open store transaction)
//!   ctx.guard(work(uow.tx()))    -> document decisions + ledger calls + repository writes
//! uow.finish(outcome)
//!   Ok  -> commit                (balances and documents become visible together)
//!   Err -> rollback, then return the original error
//! ```
//!
//! Queries use the same unit of work and end it with `close`, which always
//! rolls back.
//!
//! Nothing a command writes is visible to other transactions before commit,
//! so a failure anywhere (validation, ledger sufficiency, persistence,
//! cancellation, deadline) leaves every store exactly as it was.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::context::CommandContext;
use crate::error::CommandError;
use crate::store::{Store, StoreTransaction};

#[derive(Debug)]
pub struct TransactionCoordinator<S> {
    store: Arc<S>,
}

impl<S> Clone for TransactionCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Store> TransactionCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Open the unit of work for `command`.
    pub async fn begin(
        &self,
        ctx: &CommandContext,
        command: &'static str,
    ) -> Result<UnitOfWork<S::Tx>, CommandError> {
        let tx = ctx
            .guard(async { self.store.begin().await.map_err(CommandError::from) })
            .await?;
        Ok(UnitOfWork {
            tx,
            command,
            ctx: ctx.clone(),
        })
    }
}

/// An open transaction bound to one command.
///
/// Dropping it without `finish` rolls back.
pub struct UnitOfWork<T> {
    tx: T,
    command: &'static str,
    ctx: CommandContext,
}

impl<T: StoreTransaction> UnitOfWork<T> {
    pub fn tx(&mut self) -> &mut T {
        &mut self.tx
    }

    pub fn command(&self) -> &'static str {
        self.command
    }

    /// Commit on success, roll back on any error.
    ///
    /// A context cancelled after the work completed still rolls back: nothing
    /// is committed once the caller has given up on the command.
    pub async fn finish<R>(self, outcome: Result<R, CommandError>) -> Result<R, CommandError> {
        let command = self.command;
        let outcome = outcome.and_then(|value| {
            self.ctx.check()?;
            Ok(value)
        });

        match outcome {
            Ok(value) => {
                if let Err(err) = self.tx.commit().await {
                    warn!(command, error = %err, "commit failed");
                    return Err(err.into());
                }
                info!(command, "command committed");
                Ok(value)
            }
            Err(err) => {
                match self.tx.rollback().await {
                    Ok(()) if err.is_business_rule() => {
                        warn!(command, error = %err, "command rejected; rolled back")
                    }
                    Ok(()) => warn!(command, error = %err, "command failed; rolled back"),
                    Err(rollback_err) => error!(
                        command,
                        error = %err,
                        rollback_error = %rollback_err,
                        "rollback failed"
                    ),
                }
                Err(err)
            }
        }
    }

    /// End a read-only unit of work. Always rolls back.
    pub async fn close<R>(self, outcome: Result<R, CommandError>) -> Result<R, CommandError> {
        if let Err(err) = self.tx.rollback().await {
            debug!(command = self.command, error = %err, "read transaction rollback failed");
        }
        outcome
    }
}
