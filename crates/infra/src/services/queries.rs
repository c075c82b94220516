//! Read side: documents with lines and balance listings.
//!
//! Queries read committed state through a short transaction that is always
//! rolled back; they take no document or balance locks.

use stockroom_core::{DomainError, ReceiptId, ShipmentId};
use stockroom_inventory::Balance;
use stockroom_receipts::ReceiptDocument;
use stockroom_shipments::ShipmentDocument;

use crate::context::CommandContext;
use crate::coordinator::TransactionCoordinator;
use crate::error::CommandError;
use crate::store::{
    BalanceFilter, BalanceRepository, DocumentFilter, ReceiptRepository, ShipmentRepository, Store,
};

pub struct QueryService<S> {
    coordinator: TransactionCoordinator<S>,
}

impl<S> Clone for QueryService<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: Store> QueryService<S> {
    pub fn new(coordinator: TransactionCoordinator<S>) -> Self {
        Self { coordinator }
    }

    pub async fn get_receipt(
        &self,
        ctx: &CommandContext,
        id: ReceiptId,
    ) -> Result<ReceiptDocument, CommandError> {
        let mut uow = self.coordinator.begin(ctx, "receipt.get").await?;
        let tx = uow.tx();
        let outcome = ctx
            .guard(async {
                let found = tx.get_receipt(id).await?;
                found.ok_or_else(|| {
                    CommandError::from(DomainError::not_found(format!("receipt {id}")))
                })
            })
            .await;
        uow.close(outcome).await
    }

    pub async fn get_shipment(
        &self,
        ctx: &CommandContext,
        id: ShipmentId,
    ) -> Result<ShipmentDocument, CommandError> {
        let mut uow = self.coordinator.begin(ctx, "shipment.get").await?;
        let tx = uow.tx();
        let outcome = ctx
            .guard(async {
                let found = tx.get_shipment(id).await?;
                found.ok_or_else(|| {
                    CommandError::from(DomainError::not_found(format!("shipment {id}")))
                })
            })
            .await;
        uow.close(outcome).await
    }

    /// Receipts matching every criterion in `filter`, ordered by date then number.
    pub async fn list_receipts(
        &self,
        ctx: &CommandContext,
        filter: &DocumentFilter,
    ) -> Result<Vec<ReceiptDocument>, CommandError> {
        let mut uow = self.coordinator.begin(ctx, "receipt.list").await?;
        let tx = uow.tx();
        let outcome = ctx
            .guard(async { Ok::<_, CommandError>(tx.list_receipts(filter).await?) })
            .await;
        uow.close(outcome).await
    }

    /// Shipments matching every criterion in `filter`, ordered by date then number.
    pub async fn list_shipments(
        &self,
        ctx: &CommandContext,
        filter: &DocumentFilter,
    ) -> Result<Vec<ShipmentDocument>, CommandError> {
        let mut uow = self.coordinator.begin(ctx, "shipment.list").await?;
        let tx = uow.tx();
        let outcome = ctx
            .guard(async { Ok::<_, CommandError>(tx.list_shipments(filter).await?) })
            .await;
        uow.close(outcome).await
    }

    pub async fn list_balances(
        &self,
        ctx: &CommandContext,
        filter: &BalanceFilter,
    ) -> Result<Vec<Balance>, CommandError> {
        let mut uow = self.coordinator.begin(ctx, "balance.list").await?;
        let tx = uow.tx();
        let outcome = ctx
            .guard(async { Ok::<_, CommandError>(tx.list_balances(filter).await?) })
            .await;
        uow.close(outcome).await
    }
}
