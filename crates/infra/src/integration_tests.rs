//! Integration tests for the full command pipeline.
//!
//! Tests: Service → TransactionCoordinator → BalanceLedger → InMemoryStore
//!
//! Verifies:
//! - Receipts and shipments move balances exactly as their lifecycle says
//! - A failed command leaves documents and balances untouched
//! - Concurrent commands never drive a balance negative and never deadlock
//! - Cancellation and deadlines roll back

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use stockroom_core::{ClientId, DomainError, Quantity, ResourceId, UnitId};
    use stockroom_inventory::{BalanceKey, DocumentLine};
    use stockroom_reference::{ClientDraft, ReferenceStatus, ResourceDraft, UnitDraft};

    use crate::context::CommandContext;
    use crate::error::CommandError;
    use crate::services::{ReceiptDraft, ShipmentDraft, Warehouse};
    use crate::store::{
        BalanceFilter, BalanceRepository, DocumentFilter, InMemoryStore, Store, StoreTransaction,
    };

    struct Fixture {
        store: Arc<InMemoryStore>,
        warehouse: Warehouse<InMemoryStore>,
        ctx: CommandContext,
        resource: ResourceId,
        unit: UnitId,
        client: ClientId,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let warehouse = Warehouse::new(Arc::clone(&store));
            let ctx = CommandContext::background();

            let resource = warehouse
                .resources
                .create(
                    &ctx,
                    ResourceDraft {
                        name: "Steel beam".to_string(),
                    },
                )
                .await
                .unwrap();
            let unit = warehouse
                .units
                .create(
                    &ctx,
                    UnitDraft {
                        name: "piece".to_string(),
                    },
                )
                .await
                .unwrap();
            let client = warehouse
                .clients
                .create(
                    &ctx,
                    ClientDraft {
                        name: "Acme Construction".to_string(),
                        address: "1 Quarry Road".to_string(),
                    },
                )
                .await
                .unwrap();

            Self {
                store,
                warehouse,
                ctx,
                resource,
                unit,
                client,
            }
        }

        async fn another_resource(&self, name: &str) -> ResourceId {
            self.warehouse
                .resources
                .create(
                    &self.ctx,
                    ResourceDraft {
                        name: name.to_string(),
                    },
                )
                .await
                .unwrap()
        }

        fn line(&self, quantity: u32) -> DocumentLine {
            line(self.resource, self.unit, quantity)
        }

        fn key(&self) -> BalanceKey {
            BalanceKey::new(self.resource, self.unit)
        }

        async fn receive(&self, number: &str, lines: Vec<DocumentLine>) -> stockroom_core::ReceiptId {
            self.warehouse
                .receipts
                .create(&self.ctx, receipt(number, lines))
                .await
                .unwrap()
        }

        fn shipment(&self, number: &str, lines: Vec<DocumentLine>) -> ShipmentDraft {
            ShipmentDraft {
                number: number.to_string(),
                client_id: self.client,
                date: date(),
                lines,
            }
        }

        async fn balance_of(&self, key: BalanceKey) -> Decimal {
            let filter = BalanceFilter {
                resource_ids: Some(vec![key.resource_id]),
                unit_ids: Some(vec![key.unit_id]),
            };
            self.warehouse
                .queries
                .list_balances(&self.ctx, &filter)
                .await
                .unwrap()
                .first()
                .map(|b| b.quantity())
                .unwrap_or(Decimal::ZERO)
        }

        async fn balance(&self) -> Decimal {
            self.balance_of(self.key()).await
        }

        async fn shipment_count(&self) -> usize {
            self.warehouse
                .queries
                .list_shipments(&self.ctx, &DocumentFilter::default())
                .await
                .unwrap()
                .len()
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn line(resource: ResourceId, unit: UnitId, quantity: u32) -> DocumentLine {
        DocumentLine::new(resource, unit, Quantity::units(quantity).unwrap())
    }

    fn receipt(number: &str, lines: Vec<DocumentLine>) -> ReceiptDraft {
        ReceiptDraft {
            number: number.to_string(),
            date: date(),
            lines,
        }
    }

    fn domain(err: &CommandError) -> &DomainError {
        err.domain()
            .unwrap_or_else(|| panic!("Expected domain error, got {err:?}"))
    }

    // ---------------------------------------------------------------------
    // Shipment scenarios
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn signed_create_decreases_balance() {
        let fx = Fixture::new().await;
        fx.receive("R-1", vec![fx.line(200)]).await;

        let outcome = fx
            .warehouse
            .shipments
            .create(&fx.ctx, fx.shipment("S-1", vec![fx.line(100)]), true)
            .await
            .unwrap();

        assert!(outcome.signed);
        assert!(outcome.warnings.is_empty());
        assert_eq!(fx.balance().await, dec(100));
    }

    #[tokio::test]
    async fn signed_create_without_stock_persists_nothing() {
        let fx = Fixture::new().await;
        fx.receive("R-1", vec![fx.line(50)]).await;

        let err = fx
            .warehouse
            .shipments
            .create(&fx.ctx, fx.shipment("S-1", vec![fx.line(100)]), true)
            .await
            .unwrap_err();

        assert_eq!(
            domain(&err),
            &DomainError::InsufficientBalance {
                resource: "Steel beam".to_string(),
                unit: "piece".to_string(),
                requested: dec(100),
                available: dec(50),
            }
        );
        assert_eq!(fx.balance().await, dec(50));
        assert_eq!(fx.shipment_count().await, 0);
    }

    #[tokio::test]
    async fn draft_sign_delete_revoke_lifecycle() {
        let fx = Fixture::new().await;
        fx.receive("R-1", vec![fx.line(200)]).await;
        let shipments = &fx.warehouse.shipments;

        // Draft: ledger untouched.
        let draft = shipments
            .create(&fx.ctx, fx.shipment("S-1", vec![fx.line(100)]), false)
            .await
            .unwrap();
        assert!(!draft.signed);
        assert_eq!(fx.balance().await, dec(200));

        // Update with sign.
        let signed = shipments
            .update(&fx.ctx, draft.id, fx.shipment("S-1", vec![fx.line(100)]), true)
            .await
            .unwrap();
        assert!(signed.signed);
        assert_eq!(fx.balance().await, dec(100));

        // Signed documents cannot be deleted.
        let err = shipments.delete(&fx.ctx, draft.id).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::InvalidTransition(_)));
        assert_eq!(fx.balance().await, dec(100));
        let stored = fx
            .warehouse
            .queries
            .get_shipment(&fx.ctx, draft.id)
            .await
            .unwrap();
        assert!(stored.is_signed());

        // Revoke restores stock and reopens the draft.
        shipments.revoke(&fx.ctx, draft.id).await.unwrap();
        assert_eq!(fx.balance().await, dec(200));
        let stored = fx
            .warehouse
            .queries
            .get_shipment(&fx.ctx, draft.id)
            .await
            .unwrap();
        assert!(!stored.is_signed());

        // A draft can be deleted without touching stock.
        shipments.delete(&fx.ctx, draft.id).await.unwrap();
        assert_eq!(fx.balance().await, dec(200));
        assert_eq!(fx.shipment_count().await, 0);
    }

    #[tokio::test]
    async fn explicit_sign_then_revoke_is_inverse() {
        let fx = Fixture::new().await;
        let other = fx.another_resource("Rebar").await;
        fx.receive("R-1", vec![fx.line(40), line(other, fx.unit, 15)])
            .await;

        let draft = fx
            .warehouse
            .shipments
            .create(
                &fx.ctx,
                fx.shipment("S-1", vec![fx.line(25), line(other, fx.unit, 15)]),
                false,
            )
            .await
            .unwrap();

        fx.warehouse.shipments.sign(&fx.ctx, draft.id).await.unwrap();
        assert_eq!(fx.balance().await, dec(15));
        assert_eq!(fx.balance_of(BalanceKey::new(other, fx.unit)).await, dec(0));

        fx.warehouse.shipments.revoke(&fx.ctx, draft.id).await.unwrap();
        assert_eq!(fx.balance().await, dec(40));
        assert_eq!(fx.balance_of(BalanceKey::new(other, fx.unit)).await, dec(15));
    }

    #[tokio::test]
    async fn signed_shipment_rejects_edits_and_double_sign() {
        let fx = Fixture::new().await;
        fx.receive("R-1", vec![fx.line(10)]).await;
        let shipments = &fx.warehouse.shipments;

        let signed = shipments
            .create(&fx.ctx, fx.shipment("S-1", vec![fx.line(5)]), true)
            .await
            .unwrap();

        let err = shipments
            .update(&fx.ctx, signed.id, fx.shipment("S-1", vec![fx.line(1)]), false)
            .await
            .unwrap_err();
        assert_eq!(
            domain(&err),
            &DomainError::invalid_transition("signed document cannot be edited; revoke first")
        );

        let err = shipments.sign(&fx.ctx, signed.id).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::InvalidTransition(_)));
        assert_eq!(fx.balance().await, dec(5));
    }

    #[tokio::test]
    async fn revoke_of_draft_and_sign_of_empty_shipment_are_rejected() {
        let fx = Fixture::new().await;
        let shipments = &fx.warehouse.shipments;

        let empty = shipments
            .create(&fx.ctx, fx.shipment("S-1", vec![]), false)
            .await
            .unwrap();

        let err = shipments.revoke(&fx.ctx, empty.id).await.unwrap_err();
        assert_eq!(domain(&err), &DomainError::invalid_transition("document not signed"));

        let err = shipments.sign(&fx.ctx, empty.id).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::InvalidTransition(_)));

        let err = shipments
            .create(&fx.ctx, fx.shipment("S-2", vec![]), true)
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::InvalidTransition(_)));
        assert_eq!(fx.shipment_count().await, 1);
    }

    #[tokio::test]
    async fn draft_reports_shortfalls_without_failing() {
        let fx = Fixture::new().await;
        fx.receive("R-1", vec![fx.line(30)]).await;

        let draft = fx
            .warehouse
            .shipments
            .create(&fx.ctx, fx.shipment("S-1", vec![fx.line(80)]), false)
            .await
            .unwrap();

        assert!(!draft.signed);
        assert_eq!(draft.warnings.len(), 1);
        assert_eq!(draft.warnings[0].resource, "Steel beam");
        assert_eq!(draft.warnings[0].requested, dec(80));
        assert_eq!(draft.warnings[0].available, dec(30));
        assert_eq!(fx.balance().await, dec(30));
    }

    #[tokio::test]
    async fn failing_line_leaves_every_line_untouched() {
        let fx = Fixture::new().await;
        let other = fx.another_resource("Rebar").await;
        fx.receive("R-1", vec![fx.line(100), line(other, fx.unit, 5)])
            .await;

        let err = fx
            .warehouse
            .shipments
            .create(
                &fx.ctx,
                fx.shipment("S-1", vec![fx.line(10), line(other, fx.unit, 6)]),
                true,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            domain(&err),
            DomainError::InsufficientBalance { .. }
        ));
        assert_eq!(fx.balance().await, dec(100));
        assert_eq!(fx.balance_of(BalanceKey::new(other, fx.unit)).await, dec(5));
    }

    // ---------------------------------------------------------------------
    // Receipts
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn receipt_create_then_delete_restores_balances() {
        let fx = Fixture::new().await;
        let other = fx.another_resource("Rebar").await;
        fx.receive("R-0", vec![fx.line(7)]).await;

        let id = fx
            .receive("R-1", vec![fx.line(3), fx.line(4), line(other, fx.unit, 9)])
            .await;
        assert_eq!(fx.balance().await, dec(14));
        assert_eq!(fx.balance_of(BalanceKey::new(other, fx.unit)).await, dec(9));

        fx.warehouse.receipts.delete(&fx.ctx, id).await.unwrap();
        assert_eq!(fx.balance().await, dec(7));
        // Rows persist at zero.
        assert_eq!(fx.balance_of(BalanceKey::new(other, fx.unit)).await, dec(0));
        let balances = fx
            .warehouse
            .queries
            .list_balances(&fx.ctx, &BalanceFilter::default())
            .await
            .unwrap();
        assert_eq!(balances.len(), 2);
    }

    #[tokio::test]
    async fn line_ids_are_scoped_to_their_document() {
        let fx = Fixture::new().await;
        let shared = fx.line(5);

        let first = fx.receive("R-1", vec![shared.clone()]).await;
        let second = fx.receive("R-2", vec![shared.clone()]).await;
        assert_eq!(fx.balance().await, dec(10));

        for id in [first, second] {
            let receipt = fx.warehouse.queries.get_receipt(&fx.ctx, id).await.unwrap();
            assert_eq!(receipt.lines()[0].line_id, shared.line_id);
        }
    }

    #[tokio::test]
    async fn receipt_update_moves_balance_by_difference() {
        let fx = Fixture::new().await;
        let removed = fx.another_resource("Rebar").await;
        let added = fx.another_resource("Cement").await;
        let untouched = fx.another_resource("Gravel").await;
        fx.receive("R-0", vec![line(untouched, fx.unit, 11)]).await;

        let id = fx
            .receive("R-1", vec![fx.line(10), line(removed, fx.unit, 6)])
            .await;

        fx.warehouse
            .receipts
            .update(
                &fx.ctx,
                id,
                receipt("R-1", vec![fx.line(25), line(added, fx.unit, 2)]),
            )
            .await
            .unwrap();

        assert_eq!(fx.balance().await, dec(25));
        assert_eq!(fx.balance_of(BalanceKey::new(removed, fx.unit)).await, dec(0));
        assert_eq!(fx.balance_of(BalanceKey::new(added, fx.unit)).await, dec(2));
        assert_eq!(fx.balance_of(BalanceKey::new(untouched, fx.unit)).await, dec(11));

        let stored = fx.warehouse.queries.get_receipt(&fx.ctx, id).await.unwrap();
        assert_eq!(stored.lines().len(), 2);
    }

    #[tokio::test]
    async fn receipt_whose_stock_was_shipped_cannot_be_deleted() {
        let fx = Fixture::new().await;
        let id = fx.receive("R-1", vec![fx.line(10)]).await;
        fx.warehouse
            .shipments
            .create(&fx.ctx, fx.shipment("S-1", vec![fx.line(8)]), true)
            .await
            .unwrap();

        let err = fx.warehouse.receipts.delete(&fx.ctx, id).await.unwrap_err();
        assert!(matches!(
            domain(&err),
            DomainError::InsufficientBalance { .. }
        ));
        assert_eq!(fx.balance().await, dec(2));
        assert!(fx.warehouse.queries.get_receipt(&fx.ctx, id).await.is_ok());

        // Lowering the receipt below what was shipped fails the same way.
        let err = fx
            .warehouse
            .receipts
            .update(&fx.ctx, id, receipt("R-1", vec![fx.line(5)]))
            .await
            .unwrap_err();
        assert!(matches!(
            domain(&err),
            DomainError::InsufficientBalance { .. }
        ));
        assert_eq!(fx.balance().await, dec(2));
    }

    #[tokio::test]
    async fn duplicate_numbers_are_rejected() {
        let fx = Fixture::new().await;
        let first = fx.receive("R-1", vec![fx.line(10)]).await;
        let second = fx.receive("R-2", vec![]).await;

        let err = fx
            .warehouse
            .receipts
            .create(&fx.ctx, receipt("  R-1 ", vec![fx.line(1)]))
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::DuplicateNumber(_)));

        let err = fx
            .warehouse
            .receipts
            .update(&fx.ctx, second, receipt("R-1", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::DuplicateNumber(_)));

        // Keeping its own number is fine.
        fx.warehouse
            .receipts
            .update(&fx.ctx, first, receipt("R-1", vec![fx.line(12)]))
            .await
            .unwrap();
        assert_eq!(fx.balance().await, dec(12));

        fx.warehouse
            .shipments
            .create(&fx.ctx, fx.shipment("S-1", vec![]), false)
            .await
            .unwrap();
        let err = fx
            .warehouse
            .shipments
            .create(&fx.ctx, fx.shipment("S-1", vec![]), false)
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::DuplicateNumber(_)));
    }

    #[tokio::test]
    async fn unknown_and_archived_references_are_rejected_before_the_ledger() {
        let fx = Fixture::new().await;

        let err = fx
            .warehouse
            .receipts
            .create(&fx.ctx, receipt("R-1", vec![line(fx.resource, UnitId::new(), 1)]))
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::NotFound(_)));

        fx.warehouse.resources.archive(&fx.ctx, fx.resource).await.unwrap();
        let err = fx
            .warehouse
            .receipts
            .create(&fx.ctx, receipt("R-1", vec![fx.line(1)]))
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::Archived(_)));
        assert_eq!(fx.balance().await, dec(0));

        fx.warehouse.resources.restore(&fx.ctx, fx.resource).await.unwrap();
        fx.warehouse.clients.archive(&fx.ctx, fx.client).await.unwrap();
        let err = fx
            .warehouse
            .shipments
            .create(&fx.ctx, fx.shipment("S-1", vec![]), false)
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::Archived(_)));
    }

    #[tokio::test]
    async fn archived_resource_already_on_receipt_does_not_block_edits() {
        let fx = Fixture::new().await;
        let id = fx.receive("R-1", vec![fx.line(10)]).await;
        fx.warehouse.resources.archive(&fx.ctx, fx.resource).await.unwrap();

        fx.warehouse
            .receipts
            .update(&fx.ctx, id, receipt("R-1", vec![fx.line(15)]))
            .await
            .unwrap();
        assert_eq!(fx.balance().await, dec(15));
    }

    // ---------------------------------------------------------------------
    // Reference data
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn referenced_entities_cannot_be_deleted() {
        let fx = Fixture::new().await;
        let spare = fx.another_resource("Spare").await;
        fx.receive("R-1", vec![fx.line(1)]).await;

        let err = fx
            .warehouse
            .resources
            .delete(&fx.ctx, fx.resource)
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::InUse(_)));

        fx.warehouse.resources.delete(&fx.ctx, spare).await.unwrap();
        let err = fx.warehouse.resources.get(&fx.ctx, spare).await.unwrap_err();
        assert!(matches!(domain(&err), DomainError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_delete_and_receipt_never_leave_a_dangling_line() {
        for round in 0..10 {
            let fx = Fixture::new().await;
            let resource = fx.another_resource(&format!("Contested {round}")).await;

            let create = {
                let warehouse = fx.warehouse.clone();
                let ctx = fx.ctx.clone();
                let draft = receipt("R-RACE", vec![line(resource, fx.unit, 4)]);
                tokio::spawn(async move { warehouse.receipts.create(&ctx, draft).await })
            };
            let delete = {
                let warehouse = fx.warehouse.clone();
                let ctx = fx.ctx.clone();
                tokio::spawn(async move { warehouse.resources.delete(&ctx, resource).await })
            };
            let created = create.await.unwrap();
            let deleted = delete.await.unwrap();

            match (&created, &deleted) {
                (Ok(_), Err(err)) => assert!(matches!(domain(err), DomainError::InUse(_))),
                (Err(err), Ok(())) => assert!(matches!(domain(err), DomainError::NotFound(_))),
                other => panic!("inconsistent outcome: {other:?}"),
            }

            let still_there = fx.warehouse.resources.get(&fx.ctx, resource).await.is_ok();
            assert_eq!(still_there, created.is_ok());
        }
    }

    #[tokio::test]
    async fn reference_names_are_unique_per_kind() {
        let fx = Fixture::new().await;
        let err = fx
            .warehouse
            .resources
            .create(
                &fx.ctx,
                ResourceDraft {
                    name: "Steel beam".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::DuplicateName(_)));

        // Same name in another kind is fine.
        fx.warehouse
            .units
            .create(
                &fx.ctx,
                UnitDraft {
                    name: "Steel beam".to_string(),
                },
            )
            .await
            .unwrap();

        fx.warehouse.resources.archive(&fx.ctx, fx.resource).await.unwrap();
        let active = fx.warehouse.resources.list(&fx.ctx, false).await.unwrap();
        let all = fx.warehouse.resources.list(&fx.ctx, true).await.unwrap();
        assert!(active.is_empty());
        assert_eq!(all.len(), 1);
        assert_eq!(
            stockroom_reference::ReferenceEntity::status(&all[0]),
            ReferenceStatus::Archived
        );
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    #[tokio::test]
    async fn document_listings_apply_filters() {
        let fx = Fixture::new().await;
        let other = fx.another_resource("Rebar").await;
        fx.receive("R-1", vec![fx.line(5)]).await;
        fx.receive("R-2", vec![line(other, fx.unit, 5)]).await;
        fx.warehouse
            .shipments
            .create(&fx.ctx, fx.shipment("S-1", vec![fx.line(1)]), false)
            .await
            .unwrap();

        let by_resource = DocumentFilter {
            resource_ids: Some(vec![other]),
            ..Default::default()
        };
        let receipts = fx
            .warehouse
            .queries
            .list_receipts(&fx.ctx, &by_resource)
            .await
            .unwrap();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].number(), "R-2");

        let later = DocumentFilter {
            date_from: date().succ_opt(),
            ..Default::default()
        };
        assert!(fx
            .warehouse
            .queries
            .list_receipts(&fx.ctx, &later)
            .await
            .unwrap()
            .is_empty());

        let by_client = DocumentFilter {
            client_ids: Some(vec![fx.client]),
            ..Default::default()
        };
        let shipments = fx
            .warehouse
            .queries
            .list_shipments(&fx.ctx, &by_client)
            .await
            .unwrap();
        assert_eq!(shipments.len(), 1);

        let err = fx
            .warehouse
            .queries
            .get_shipment(&fx.ctx, stockroom_core::ShipmentId::new())
            .await
            .unwrap_err();
        assert!(matches!(domain(&err), DomainError::NotFound(_)));
    }

    // ---------------------------------------------------------------------
    // Concurrency, cancellation, deadlines
    // ---------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_signs_never_drive_balance_negative() {
        let fx = Fixture::new().await;
        fx.receive("R-1", vec![fx.line(100)]).await;

        let mut drafts = Vec::new();
        for i in 0..8 {
            let draft = fx
                .warehouse
                .shipments
                .create(&fx.ctx, fx.shipment(&format!("S-{i}"), vec![fx.line(30)]), false)
                .await
                .unwrap();
            drafts.push(draft.id);
        }

        let tasks: Vec<_> = drafts
            .into_iter()
            .map(|id| {
                let warehouse = fx.warehouse.clone();
                let ctx = fx.ctx.clone();
                tokio::spawn(async move { warehouse.shipments.sign(&ctx, id).await })
            })
            .collect();

        let mut signed = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => signed += 1,
                Err(err) => assert!(matches!(
                    domain(&err),
                    DomainError::InsufficientBalance { .. }
                )),
            }
        }

        assert_eq!(signed, 3);
        assert_eq!(fx.balance().await, dec(10));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_double_sign_of_one_shipment_applies_once() {
        let fx = Fixture::new().await;
        fx.receive("R-1", vec![fx.line(100)]).await;
        let draft = fx
            .warehouse
            .shipments
            .create(&fx.ctx, fx.shipment("S-1", vec![fx.line(30)]), false)
            .await
            .unwrap();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let warehouse = fx.warehouse.clone();
                let ctx = fx.ctx.clone();
                tokio::spawn(async move { warehouse.shipments.sign(&ctx, draft.id).await })
            })
            .collect();

        let mut signed = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                signed += 1;
            }
        }
        assert_eq!(signed, 1);
        assert_eq!(fx.balance().await, dec(70));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_batches_in_opposite_order_do_not_deadlock() {
        let fx = Fixture::new().await;
        let other = fx.another_resource("Rebar").await;

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let warehouse = fx.warehouse.clone();
                let ctx = fx.ctx.clone();
                let lines = if i % 2 == 0 {
                    vec![fx.line(1), line(other, fx.unit, 1)]
                } else {
                    vec![line(other, fx.unit, 1), fx.line(1)]
                };
                tokio::spawn(async move {
                    warehouse
                        .receipts
                        .create(&ctx, receipt(&format!("R-{i}"), lines))
                        .await
                })
            })
            .collect();

        let all = async {
            for task in tasks {
                task.await.unwrap().unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(10), all)
            .await
            .expect("batches deadlocked");

        assert_eq!(fx.balance().await, dec(20));
        assert_eq!(fx.balance_of(BalanceKey::new(other, fx.unit)).await, dec(20));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicate_numbers_admit_one_document() {
        let fx = Fixture::new().await;

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let warehouse = fx.warehouse.clone();
                let ctx = fx.ctx.clone();
                let lines = vec![fx.line(5)];
                tokio::spawn(async move {
                    warehouse.receipts.create(&ctx, receipt("R-1", lines)).await
                })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(err) => assert!(matches!(domain(&err), DomainError::DuplicateNumber(_))),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(fx.balance().await, dec(5));
    }

    /// Hold the balance row in a separate transaction so a command blocks on it.
    async fn hold_balance_lock(
        store: &InMemoryStore,
        key: BalanceKey,
    ) -> <InMemoryStore as Store>::Tx {
        let mut tx = store.begin().await.unwrap();
        tx.locked_read(&[key]).await.unwrap();
        tx
    }

    #[tokio::test]
    async fn cancelled_command_rolls_back() {
        let fx = Fixture::new().await;
        fx.receive("R-1", vec![fx.line(50)]).await;
        let draft = fx
            .warehouse
            .shipments
            .create(&fx.ctx, fx.shipment("S-1", vec![fx.line(20)]), false)
            .await
            .unwrap();

        let blocker = hold_balance_lock(&fx.store, fx.key()).await;
        let (ctx, handle) = CommandContext::cancellable();
        let task = {
            let warehouse = fx.warehouse.clone();
            tokio::spawn(async move { warehouse.shipments.sign(&ctx, draft.id).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CommandError::Cancelled));
        blocker.rollback().await.unwrap();

        assert_eq!(fx.balance().await, dec(50));
        let stored = fx
            .warehouse
            .queries
            .get_shipment(&fx.ctx, draft.id)
            .await
            .unwrap();
        assert!(!stored.is_signed());

        // The shipment lock was released with the rollback.
        fx.warehouse.shipments.sign(&fx.ctx, draft.id).await.unwrap();
        assert_eq!(fx.balance().await, dec(30));
    }

    #[tokio::test]
    async fn deadline_exceeded_while_waiting_for_a_lock_rolls_back() {
        let fx = Fixture::new().await;

        let blocker = hold_balance_lock(&fx.store, fx.key()).await;
        let ctx = CommandContext::with_timeout(Duration::from_millis(50));
        let err = fx
            .warehouse
            .receipts
            .create(&ctx, receipt("R-1", vec![fx.line(5)]))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::DeadlineExceeded));
        drop(blocker);

        assert_eq!(fx.balance().await, dec(0));
        assert!(fx
            .warehouse
            .queries
            .list_receipts(&fx.ctx, &DocumentFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn already_cancelled_context_never_opens_a_transaction() {
        let fx = Fixture::new().await;
        let (ctx, handle) = CommandContext::cancellable();
        handle.cancel();

        let err = fx
            .warehouse
            .receipts
            .create(&ctx, receipt("R-1", vec![fx.line(5)]))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Cancelled));
        assert_eq!(fx.balance().await, dec(0));
    }
}
