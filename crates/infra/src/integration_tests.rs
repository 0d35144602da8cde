//! End-to-end tests for the ledger pipeline.
//!
//! LedgerService -> dispatcher -> event store -> bus -> outstanding balances projection,
//! with the inventory aggregate behind the stock and pricing collaborators.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use serde_json::Value as JsonValue;

    use ledgerpos_core::{AggregateId, DomainError, Money, TenantId, UserId};
    use ledgerpos_credit::{
        Counterparty, DurationUnit, LineItem, PartyId, PaymentMethod, PaymentTerms, TransactionDetails,
        TransactionKind, TransactionStatus,
    };
    use ledgerpos_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use ledgerpos_inventory::{InventoryCommand, InventoryItem, ProductId, RegisterItem};

    use crate::collaborators::{
        AuditEntry, AuditSink, CollaboratorError, InMemoryAuditLog, InMemoryCounterpartyDirectory,
    };
    use crate::command_dispatcher::CommandDispatcher;
    use crate::config::LedgerConfig;
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::ledger::{
        Collaborators, EffectOutcome, LedgerContext, LedgerError, LedgerService, PaymentRequest,
        TRANSACTION_AGGREGATE_TYPE,
    };
    use crate::projections::{BalanceKey, BalanceSide, OutstandingBalance, OutstandingBalancesProjection};
    use crate::read_model::InMemoryTenantStore;
    use crate::reference::InMemoryReferenceSequencer;
    use crate::stock::{INVENTORY_AGGREGATE_TYPE, InventoryStockAdapter};

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Dispatcher = CommandDispatcher<InMemoryEventStore, Bus>;
    type Balances = OutstandingBalancesProjection<Arc<InMemoryTenantStore<BalanceKey, OutstandingBalance>>>;

    struct FailingAuditSink;

    impl AuditSink for FailingAuditSink {
        fn record(&self, _entry: AuditEntry) -> Result<(), CollaboratorError> {
            Err(CollaboratorError::Unavailable {
                service: "audit log",
                reason: "disk full".to_string(),
            })
        }
    }

    struct Harness {
        ledger: Arc<LedgerService<InMemoryEventStore, Bus>>,
        dispatcher: Arc<Dispatcher>,
        stock: Arc<InventoryStockAdapter<InMemoryEventStore, Bus>>,
        directory: Arc<InMemoryCounterpartyDirectory>,
        audit_log: Arc<InMemoryAuditLog>,
        balances: Arc<Balances>,
        ctx: LedgerContext,
    }

    fn checkout_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 3, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup() -> Harness {
        setup_with(LedgerConfig::default(), None)
    }

    fn setup_with(config: LedgerConfig, audit: Option<Arc<dyn AuditSink>>) -> Harness {
        ledgerpos_observability::init();

        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = Arc::new(CommandDispatcher::new(InMemoryEventStore::new(), bus.clone()));
        let stock = Arc::new(InventoryStockAdapter::new(dispatcher.clone()));
        let directory = Arc::new(InMemoryCounterpartyDirectory::new());
        let audit_log = Arc::new(InMemoryAuditLog::new());

        let collaborators = Collaborators {
            stock: stock.clone(),
            pricing: stock.clone(),
            counterparties: directory.clone(),
            audit: audit.unwrap_or_else(|| audit_log.clone() as Arc<dyn AuditSink>),
            references: Arc::new(InMemoryReferenceSequencer::new(config.reference_width)),
        };
        let ledger = Arc::new(LedgerService::new(dispatcher.clone(), collaborators, config));

        let balances: Arc<Balances> = Arc::new(OutstandingBalancesProjection::new(Arc::new(InMemoryTenantStore::new())));

        // Subscribe before anything is published.
        let projection = balances.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
        thread::spawn(move || {
            let sub = bus.subscribe();
            let _ = ready_tx.send(());
            while let Ok(env) = sub.recv() {
                if let Err(e) = projection.apply_envelope(&env) {
                    eprintln!("failed to apply envelope: {e}");
                }
            }
        });
        let _ = ready_rx.recv_timeout(Duration::from_secs(1));

        Harness {
            ledger,
            dispatcher,
            stock,
            directory,
            audit_log,
            balances,
            ctx: LedgerContext::new(TenantId::new(), UserId::new()).at(checkout_time()),
        }
    }

    /// Poll until `check` holds; the projection runs on its own thread.
    fn eventually(check: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        check()
    }

    impl Harness {
        fn product(&self, on_hand: i64, unit_cost: i64) -> ProductId {
            let tenant_id = self.ctx.tenant_id;
            let product_id = ProductId::new(AggregateId::new());
            self.dispatcher
                .dispatch(
                    tenant_id,
                    product_id.0,
                    INVENTORY_AGGREGATE_TYPE,
                    InventoryCommand::RegisterItem(RegisterItem {
                        tenant_id,
                        product_id,
                        name: "Kopi bubuk 250g".to_string(),
                        opening_quantity: on_hand,
                        opening_unit_cost: Money::from_minor(unit_cost),
                        occurred_at: checkout_time(),
                    }),
                    |_, id| InventoryItem::empty(ProductId::new(id)),
                )
                .unwrap();
            product_id
        }

        fn on_hand(&self, product_id: ProductId) -> i64 {
            self.dispatcher
                .load(self.ctx.tenant_id, product_id.0, |_, id| InventoryItem::empty(ProductId::new(id)))
                .unwrap()
                .aggregate
                .on_hand()
        }

        fn customer(&self) -> Counterparty {
            let c = Counterparty::Customer(PartyId::new(AggregateId::new()));
            self.directory.register(self.ctx.tenant_id, c, "Pak Budi");
            c
        }

        fn supplier(&self) -> Counterparty {
            let s = Counterparty::Supplier(PartyId::new(AggregateId::new()));
            self.directory.register(self.ctx.tenant_id, s, "CV Sumber Rejeki");
            s
        }

        fn receivable(&self, party: Counterparty) -> Option<OutstandingBalance> {
            self.balances.get(self.ctx.tenant_id, party.party_id(), BalanceSide::Receivable)
        }
    }

    fn line(product_id: ProductId, quantity: i64, unit_price: i64) -> LineItem {
        LineItem {
            product_id,
            quantity,
            unit_price: Money::from_minor(unit_price),
            unit_cost: Money::ZERO,
        }
    }

    fn details(
        kind: TransactionKind,
        lines: Vec<LineItem>,
        terms: PaymentTerms,
        counterparty: Option<Counterparty>,
    ) -> TransactionDetails {
        TransactionDetails {
            kind,
            lines,
            terms,
            counterparty,
            note: None,
        }
    }

    #[test]
    fn installment_sale_from_checkout_to_settlement() {
        let h = setup();
        let product = h.product(10, 350_000);
        let customer = h.customer();

        let sale = details(
            TransactionKind::Sale,
            vec![line(product, 2, 500_000)],
            PaymentTerms::installment(Money::from_minor(100_000), 3, DurationUnit::Month),
            Some(customer),
        );
        let outcome = h.ledger.finalize(&h.ctx, None, sale).unwrap();
        let tx = outcome.transaction;
        let id = tx.id_typed();

        assert!(!outcome.already_finalized);
        assert_eq!(tx.status(), TransactionStatus::AwaitingPayment);
        assert_eq!(tx.outstanding(), Money::from_minor(900_000));
        assert_eq!(tx.reference().unwrap().as_str(), "SAL-20240115-00001");
        assert_eq!(tx.settlement_deadline(), Some(date(2024, 4, 15)));
        let dues: Vec<NaiveDate> = tx.schedule().unwrap().entries().iter().map(|e| e.due_date()).collect();
        assert_eq!(dues, vec![date(2024, 2, 15), date(2024, 3, 15), date(2024, 4, 15)]);
        assert_eq!(tx.details().unwrap().lines[0].unit_cost, Money::from_minor(350_000));
        assert_eq!(h.on_hand(product), 8);
        assert!(eventually(|| h.receivable(customer).is_some_and(|b| b.outstanding == Money::from_minor(900_000))));

        let receipt = h
            .ledger
            .apply_payment(&h.ctx, id, PaymentRequest::partial(Money::from_minor(300_000)).on(date(2024, 2, 10)))
            .unwrap();
        assert_eq!(receipt.installments_settled, vec![1]);
        assert_eq!(receipt.outstanding, Money::from_minor(600_000));
        assert_eq!(receipt.status, TransactionStatus::AwaitingPayment);
        assert_eq!(
            h.ledger.overdue_installments(&h.ctx, id, date(2024, 3, 20)).unwrap().len(),
            1
        );

        let receipt = h
            .ledger
            .apply_payment(&h.ctx, id, PaymentRequest::settle(Money::from_minor(650_000)).on(date(2024, 3, 1)))
            .unwrap();
        assert_eq!(receipt.applied, Money::from_minor(600_000));
        assert_eq!(receipt.change, Money::from_minor(50_000));
        assert_eq!(receipt.installments_settled, vec![2, 3]);
        assert_eq!(receipt.status, TransactionStatus::Settled);
        assert!(eventually(|| h
            .receivable(customer)
            .is_some_and(|b| b.outstanding.is_zero() && b.open_transactions == 0)));
    }

    #[test]
    fn purchases_drive_weighted_cost_used_for_sales() {
        let h = setup();
        let product = h.product(0, 0);
        let supplier = h.supplier();

        for price in [100, 200] {
            let purchase = details(
                TransactionKind::Purchase,
                vec![line(product, 10, price)],
                PaymentTerms::immediate(PaymentMethod::BankTransfer),
                Some(supplier),
            );
            let tx = h.ledger.finalize(&h.ctx, None, purchase).unwrap().transaction;
            assert_eq!(tx.status(), TransactionStatus::Settled);
        }
        assert_eq!(
            crate::collaborators::PricingSource::unit_cost(h.stock.as_ref(), h.ctx.tenant_id, product).unwrap(),
            Some(Money::from_minor(150))
        );

        let sale = details(
            TransactionKind::Sale,
            vec![line(product, 1, 300)],
            PaymentTerms::immediate(PaymentMethod::Cash),
            None,
        );
        let tx = h.ledger.finalize(&h.ctx, None, sale).unwrap().transaction;
        assert_eq!(tx.details().unwrap().lines[0].unit_cost, Money::from_minor(150));
        assert_eq!(h.on_hand(product), 19);
    }

    #[test]
    fn concurrent_partial_payments_never_overshoot() {
        let h = setup();
        let product = h.product(5, 100);
        let customer = h.customer();
        let sale = details(
            TransactionKind::Sale,
            vec![line(product, 1, 1_000)],
            PaymentTerms::open_credit(Money::ZERO),
            Some(customer),
        );
        let id = h.ledger.finalize(&h.ctx, None, sale).unwrap().transaction.id_typed();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let ledger = h.ledger.clone();
                let ctx = h.ctx;
                thread::spawn(move || ledger.apply_payment(&ctx, id, PaymentRequest::partial(Money::from_minor(200))))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

        let accepted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 5);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(
                err.domain(),
                Some(DomainError::ExcessPayment { .. } | DomainError::NotPayable(_))
            ));
        }

        let tx = h.ledger.get(&h.ctx, id).unwrap();
        assert_eq!(tx.status(), TransactionStatus::Settled);
        assert_eq!(tx.total_paid(), Money::from_minor(1_000));
        assert_eq!(tx.outstanding(), Money::ZERO);
    }

    #[test]
    fn retried_checkout_changes_nothing() {
        let h = setup();
        let product = h.product(10, 100);
        let customer = h.customer();
        let sale = details(
            TransactionKind::Sale,
            vec![line(product, 3, 1_000)],
            PaymentTerms::installment(Money::ZERO, 3, DurationUnit::Day),
            Some(customer),
        );
        let id = ledgerpos_credit::TransactionId::new(AggregateId::new());

        let first = h.ledger.finalize(&h.ctx, Some(id), sale.clone()).unwrap();
        let again = h.ledger.finalize(&h.ctx, Some(id), sale).unwrap();

        assert!(again.already_finalized);
        assert_eq!(again.transaction.schedule(), first.transaction.schedule());
        assert_eq!(h.on_hand(product), 7);
        assert_eq!(h.dispatcher.store().load_stream(h.ctx.tenant_id, id.0).unwrap().len(), 1);
    }

    #[test]
    fn cancelling_open_sale_restores_stock_and_clears_receivable() {
        let h = setup();
        let product = h.product(10, 100);
        let customer = h.customer();
        let sale = details(
            TransactionKind::Sale,
            vec![line(product, 3, 1_000)],
            PaymentTerms::open_credit(Money::from_minor(500)),
            Some(customer),
        );
        let id = h.ledger.finalize(&h.ctx, None, sale).unwrap().transaction.id_typed();
        assert_eq!(h.on_hand(product), 7);
        assert!(eventually(|| h.receivable(customer).is_some_and(|b| b.outstanding == Money::from_minor(2_500))));

        let outcome = h.ledger.cancel(&h.ctx, id, Some("wrong item".to_string())).unwrap();
        assert_eq!(outcome.transaction.status(), TransactionStatus::Cancelled);
        assert_eq!(outcome.stock_reversal, EffectOutcome::Completed);
        assert_eq!(outcome.audit, EffectOutcome::NotRequired);
        assert_eq!(h.on_hand(product), 10);
        assert!(eventually(|| h.receivable(customer).is_some_and(|b| b.outstanding.is_zero())));

        let err = h.ledger.cancel(&h.ctx, id, None).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::InvalidTransition { .. })));
    }

    #[test]
    fn cancelling_settled_sale_records_audit_entry() {
        let h = setup();
        let product = h.product(10, 100);
        let sale = details(
            TransactionKind::Sale,
            vec![line(product, 1, 1_000)],
            PaymentTerms::immediate(PaymentMethod::Cash),
            None,
        );
        let id = h.ledger.finalize(&h.ctx, None, sale).unwrap().transaction.id_typed();

        let outcome = h.ledger.cancel(&h.ctx, id, Some("void".to_string())).unwrap();
        assert!(outcome.transaction.audit_required());
        assert_eq!(outcome.audit, EffectOutcome::Completed);
        assert_eq!(outcome.stock_reversal, EffectOutcome::Completed);
        assert_eq!(h.on_hand(product), 10);

        let entries = h.audit_log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].previous_status, TransactionStatus::Settled);
        assert_eq!(entries[0].reason.as_deref(), Some("void"));
    }

    #[test]
    fn audit_failure_does_not_block_cancellation() {
        let h = setup_with(LedgerConfig::default(), Some(Arc::new(FailingAuditSink)));
        let product = h.product(10, 100);
        let sale = details(
            TransactionKind::Sale,
            vec![line(product, 1, 1_000)],
            PaymentTerms::immediate(PaymentMethod::Card),
            None,
        );
        let id = h.ledger.finalize(&h.ctx, None, sale).unwrap().transaction.id_typed();

        let outcome = h.ledger.cancel(&h.ctx, id, None).unwrap();
        assert_eq!(outcome.transaction.status(), TransactionStatus::Cancelled);
        assert!(outcome.audit.is_failed());
    }

    #[test]
    fn short_stock_rejects_checkout_without_side_effects() {
        let h = setup();
        let plenty = h.product(10, 100);
        let scarce = h.product(1, 100);
        let id = ledgerpos_credit::TransactionId::new(AggregateId::new());
        let sale = details(
            TransactionKind::Sale,
            vec![line(plenty, 4, 150), line(scarce, 2, 150)],
            PaymentTerms::immediate(PaymentMethod::Cash),
            None,
        );

        let err = h.ledger.finalize(&h.ctx, Some(id), sale).unwrap_err();
        assert!(matches!(err, LedgerError::Collaborator(CollaboratorError::Stock { .. })));
        assert_eq!(h.on_hand(plenty), 10);
        assert_eq!(h.on_hand(scarce), 1);
        assert!(matches!(h.ledger.get(&h.ctx, id).unwrap_err().domain(), Some(DomainError::NotFound)));
    }

    #[test]
    fn unknown_counterparty_is_rejected() {
        let h = setup();
        let product = h.product(10, 100);
        let stranger = Counterparty::Customer(PartyId::new(AggregateId::new()));
        let sale = details(
            TransactionKind::Sale,
            vec![line(product, 1, 100)],
            PaymentTerms::open_credit(Money::ZERO),
            Some(stranger),
        );

        let err = h.ledger.finalize(&h.ctx, None, sale).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::Validation(_))));
        assert_eq!(h.on_hand(product), 10);
    }

    #[test]
    fn draft_keeps_its_reference_through_checkout() {
        let h = setup();
        let product = h.product(10, 100);
        let customer = h.customer();
        let terms = PaymentTerms::installment(Money::from_minor(1_000), 4, DurationUnit::Month);

        let draft = h
            .ledger
            .save_draft(&h.ctx, None, details(TransactionKind::Sale, vec![line(product, 1, 5_000)], terms, Some(customer)))
            .unwrap();
        let id = draft.id_typed();
        let reference = draft.reference().cloned().unwrap();
        assert_eq!(reference.as_str(), "SAL-20240115-00001");

        let state = h.ledger.resume_draft(&h.ctx, id).unwrap();
        assert!(state.is_ready());
        let preview = state.schedule_preview.unwrap();
        assert_eq!(preview.len(), 4);
        assert_eq!(preview.total(), Money::from_minor(4_000));

        let edited = details(TransactionKind::Sale, vec![line(product, 2, 5_000)], terms, Some(customer));
        h.ledger.save_draft(&h.ctx, Some(id), edited.clone()).unwrap();
        let tx = h.ledger.finalize(&h.ctx, Some(id), edited).unwrap().transaction;
        assert_eq!(tx.reference(), Some(&reference));
        assert_eq!(tx.outstanding(), Money::from_minor(9_000));

        let next = h
            .ledger
            .save_draft(&h.ctx, None, details(TransactionKind::Sale, Vec::new(), PaymentTerms::immediate(PaymentMethod::Cash), None))
            .unwrap();
        assert_eq!(next.reference().unwrap().as_str(), "SAL-20240115-00002");
        assert!(!h.ledger.resume_draft(&h.ctx, next.id_typed()).unwrap().is_ready());
    }

    #[test]
    fn installment_limit_comes_from_config() {
        let config = LedgerConfig {
            max_installments: 12,
            ..LedgerConfig::default()
        };
        let h = setup_with(config, None);
        let product = h.product(10, 100);
        let customer = h.customer();
        let sale = details(
            TransactionKind::Sale,
            vec![line(product, 1, 12_000)],
            PaymentTerms::installment(Money::ZERO, 24, DurationUnit::Month),
            Some(customer),
        );

        let err = h.ledger.finalize(&h.ctx, None, sale).unwrap_err();
        assert!(matches!(err.domain(), Some(DomainError::InvalidSchedule(_))));
        assert_eq!(h.on_hand(product), 10);
    }

    #[test]
    fn rebuilt_balances_match_live_projection() {
        let h = setup();
        let product = h.product(50, 100);
        let (a, b) = (h.customer(), h.customer());
        let supplier = h.supplier();

        for (customer, price) in [(a, 1_000), (a, 2_000), (b, 3_000)] {
            let sale = details(
                TransactionKind::Sale,
                vec![line(product, 1, price)],
                PaymentTerms::open_credit(Money::ZERO),
                Some(customer),
            );
            let id = h.ledger.finalize(&h.ctx, None, sale).unwrap().transaction.id_typed();
            h.ledger
                .apply_payment(&h.ctx, id, PaymentRequest::partial(Money::from_minor(400)))
                .unwrap();
        }
        let purchase = details(
            TransactionKind::Purchase,
            vec![line(product, 5, 80)],
            PaymentTerms::open_credit(Money::ZERO),
            Some(supplier),
        );
        h.ledger.finalize(&h.ctx, None, purchase).unwrap();

        let tenant_id = h.ctx.tenant_id;
        assert!(eventually(|| h.balances.total(tenant_id, BalanceSide::Payable) == Money::from_minor(400)
            && h.balances.total(tenant_id, BalanceSide::Receivable) == Money::from_minor(4_800)));

        let rebuilt: Balances = OutstandingBalancesProjection::new(Arc::new(InMemoryTenantStore::new()));
        rebuilt.rebuild(h.dispatcher.store(), tenant_id).unwrap();

        let mut live = h.balances.list(tenant_id);
        let mut replayed = rebuilt.list(tenant_id);
        let order = |x: &OutstandingBalance| (*x.party_id.0.as_uuid(), x.side == BalanceSide::Payable);
        live.sort_by_key(order);
        replayed.sort_by_key(order);
        assert_eq!(live, replayed);
        assert_eq!(
            rebuilt.get(tenant_id, a.party_id(), BalanceSide::Receivable).unwrap().open_transactions,
            2
        );
        assert_eq!(
            h.dispatcher.store().load_by_type(tenant_id, TRANSACTION_AGGREGATE_TYPE).unwrap().len(),
            7
        );
    }

    #[test]
    fn transactions_are_invisible_to_other_tenants() {
        let h = setup();
        let product = h.product(10, 100);
        let sale = details(
            TransactionKind::Sale,
            vec![line(product, 1, 100)],
            PaymentTerms::immediate(PaymentMethod::Cash),
            None,
        );
        let id = h.ledger.finalize(&h.ctx, None, sale).unwrap().transaction.id_typed();

        let other = LedgerContext::new(TenantId::new(), UserId::new());
        assert!(matches!(h.ledger.get(&other, id).unwrap_err().domain(), Some(DomainError::NotFound)));
        assert!(h
            .ledger
            .apply_payment(&other, id, PaymentRequest::partial(Money::from_minor(1)))
            .is_err());
    }

    #[test]
    fn operations_leave_no_idle_locks_behind() {
        let h = setup();
        let product = h.product(10, 100);
        let customer = h.customer();
        for _ in 0..5 {
            let sale = details(
                TransactionKind::Sale,
                vec![line(product, 1, 1_000)],
                PaymentTerms::open_credit(Money::ZERO),
                Some(customer),
            );
            let id = h.ledger.finalize(&h.ctx, None, sale).unwrap().transaction.id_typed();
            h.ledger
                .apply_payment(&h.ctx, id, PaymentRequest::partial(Money::from_minor(400)))
                .unwrap();
            h.ledger.cancel(&h.ctx, id, None).unwrap();
        }
        h.ledger
            .save_draft(&h.ctx, None, details(TransactionKind::Sale, Vec::new(), PaymentTerms::immediate(PaymentMethod::Cash), None))
            .unwrap();

        assert!(h.ledger.locks().is_empty());
    }

    #[test]
    fn services_sharing_a_store_never_reuse_a_reference() {
        let h = setup();
        let product = h.product(10, 100);
        let sale = || {
            details(
                TransactionKind::Sale,
                vec![line(product, 1, 1_000)],
                PaymentTerms::immediate(PaymentMethod::Cash),
                None,
            )
        };
        // A second till (or a restarted process) with its own, empty sequencer.
        let other = LedgerService::new(
            h.dispatcher.clone(),
            Collaborators {
                stock: h.stock.clone(),
                pricing: h.stock.clone(),
                counterparties: h.directory.clone(),
                audit: h.audit_log.clone(),
                references: Arc::new(InMemoryReferenceSequencer::new(5)),
            },
            LedgerConfig::default(),
        );

        let first = h.ledger.finalize(&h.ctx, None, sale()).unwrap().transaction;
        let second = other.finalize(&h.ctx, None, sale()).unwrap().transaction;
        let third = h.ledger.finalize(&h.ctx, None, sale()).unwrap().transaction;
        let held = other
            .save_draft(&h.ctx, None, details(TransactionKind::Sale, Vec::new(), PaymentTerms::immediate(PaymentMethod::Cash), None))
            .unwrap();

        let numbers: Vec<_> = [&first, &second, &third, &held]
            .iter()
            .map(|tx| tx.reference().unwrap().as_str().to_string())
            .collect();
        assert_eq!(
            numbers,
            vec![
                "SAL-20240115-00001",
                "SAL-20240115-00002",
                "SAL-20240115-00003",
                "SAL-20240115-00004",
            ]
        );
    }

    /// Bus that refuses every message; the store still accepts appends.
    #[derive(Debug)]
    struct DownBus;

    impl EventBus<EventEnvelope<JsonValue>> for DownBus {
        type Error = String;

        fn publish(&self, _message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
            Err("bus down".to_string())
        }

        fn subscribe(&self) -> ledgerpos_events::Subscription<EventEnvelope<JsonValue>> {
            let (_tx, rx) = std::sync::mpsc::channel();
            ledgerpos_events::Subscription::new(rx)
        }
    }

    #[test]
    fn bus_outage_does_not_undo_stored_work() {
        let dispatcher = Arc::new(CommandDispatcher::new(InMemoryEventStore::new(), DownBus));
        let stock = Arc::new(InventoryStockAdapter::new(dispatcher.clone()));
        let directory = Arc::new(InMemoryCounterpartyDirectory::new());
        let ledger = LedgerService::new(
            dispatcher.clone(),
            Collaborators {
                stock: stock.clone(),
                pricing: stock,
                counterparties: directory.clone(),
                audit: Arc::new(InMemoryAuditLog::new()),
                references: Arc::new(InMemoryReferenceSequencer::new(5)),
            },
            LedgerConfig::default(),
        );
        let ctx = LedgerContext::new(TenantId::new(), UserId::new()).at(checkout_time());
        let customer = Counterparty::Customer(PartyId::new(AggregateId::new()));
        directory.register(ctx.tenant_id, customer, "Bu Rina");

        let product = ProductId::new(AggregateId::new());
        dispatcher
            .dispatch(
                ctx.tenant_id,
                product.0,
                INVENTORY_AGGREGATE_TYPE,
                InventoryCommand::RegisterItem(RegisterItem {
                    tenant_id: ctx.tenant_id,
                    product_id: product,
                    name: "Beras 5kg".to_string(),
                    opening_quantity: 10,
                    opening_unit_cost: Money::from_minor(100),
                    occurred_at: checkout_time(),
                }),
                |_, id| InventoryItem::empty(ProductId::new(id)),
            )
            .unwrap();
        let on_hand = || {
            dispatcher
                .load(ctx.tenant_id, product.0, |_, id| InventoryItem::empty(ProductId::new(id)))
                .unwrap()
                .aggregate
                .on_hand()
        };

        let sale = details(
            TransactionKind::Sale,
            vec![line(product, 2, 1_000)],
            PaymentTerms::open_credit(Money::ZERO),
            Some(customer),
        );
        let id = ledger.finalize(&ctx, None, sale).unwrap().transaction.id_typed();
        assert_eq!(on_hand(), 8);
        assert_eq!(ledger.get(&ctx, id).unwrap().status(), TransactionStatus::AwaitingPayment);

        let receipt = ledger
            .apply_payment(&ctx, id, PaymentRequest::partial(Money::from_minor(500)))
            .unwrap();
        assert_eq!(receipt.outstanding, Money::from_minor(1_500));
        assert_eq!(ledger.get(&ctx, id).unwrap().total_paid(), Money::from_minor(500));

        let outcome = ledger.cancel(&ctx, id, None).unwrap();
        assert_eq!(outcome.transaction.status(), TransactionStatus::Cancelled);
        assert_eq!(on_hand(), 10);
        assert_eq!(dispatcher.store().load_stream(ctx.tenant_id, id.0).unwrap().len(), 3);

        // Nothing reached the bus; the read model catches up from the store.
        let balances: Balances = OutstandingBalancesProjection::new(Arc::new(InMemoryTenantStore::new()));
        balances.rebuild(dispatcher.store(), ctx.tenant_id).unwrap();
        let balance = balances.get(ctx.tenant_id, customer.party_id(), BalanceSide::Receivable).unwrap();
        assert!(balance.outstanding.is_zero());
        assert_eq!(balance.open_transactions, 0);
    }
}
