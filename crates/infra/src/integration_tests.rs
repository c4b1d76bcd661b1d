//! End-to-end tests for the ledger services over a shared store.
//!
//! Tests: StockLedger / DoubleEntryLedger / SlaughterConverter → Transaction → LedgerStore → EventBus
//!
//! Verifies:
//! - Weighted-average and FIFO costing stay in step with the movement history
//! - Composite conversions are all-or-nothing
//! - Same-key writers serialize, different keys do not, and lock waits time out
//! - Events are published only for committed work

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use chrono::{NaiveDate, TimeZone, Utc};
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use herdledger_accounting::{AccountCodes, JournalLine, NewJournalEntry};
    use herdledger_core::{FixedClock, ItemId, JournalEntryId, LedgerError, LocationId, Reference};
    use herdledger_events::{Event, EventBus, EventEnvelope, InMemoryEventBus};
    use herdledger_inventory::{ItemType, StockKey, net_quantity};

    use crate::config::{ENV_ACCOUNT_PRODUCED_INVENTORY, LedgerConfig};
    use crate::event::LedgerEvent;
    use crate::ledger::conversion::{ConvertUnit, SlaughterConverter};
    use crate::ledger::journal::DoubleEntryLedger;
    use crate::ledger::stock::{Inflow, Outflow, StockLedger, Transfer};
    use crate::store::LedgerStore;

    fn test_store() -> LedgerStore {
        herdledger_observability::init_for_tests();
        LedgerStore::new(LedgerConfig::default())
    }

    fn quick_timeout_store() -> LedgerStore {
        LedgerStore::new(LedgerConfig::default().with_lock_timeout(Duration::from_millis(50)))
    }

    fn test_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn inflow(key: StockKey, quantity: Decimal, unit_cost: Decimal) -> Inflow {
        Inflow {
            key,
            quantity,
            unit_cost,
            reference: Reference::kind_only("purchase"),
        }
    }

    fn outflow(key: StockKey, quantity: Decimal) -> Outflow {
        Outflow {
            key,
            quantity,
            reference: Reference::kind_only("sale"),
        }
    }

    fn receive(store: &LedgerStore, key: StockKey, quantity: Decimal, unit_cost: Decimal) {
        store
            .transaction(|tx| StockLedger::apply_inflow(tx, inflow(key, quantity, unit_cost)))
            .unwrap();
    }

    fn convert_request(unit: ItemId, meat: ItemId, qty: Decimal, fee: Decimal) -> ConvertUnit {
        ConvertUnit {
            unit_id: unit,
            produced_item_id: meat,
            location_id: None,
            produced_qty: qty,
            processing_fee: fee,
        }
    }

    // ---- stock ledger ----

    #[test]
    fn inflows_blend_the_weighted_average() {
        let store = test_store();
        let key = StockKey::inventory_item(ItemId::new(), None);

        receive(&store, key, dec!(10), dec!(100));
        let outcome = store
            .transaction(|tx| StockLedger::apply_inflow(tx, inflow(key, dec!(10), dec!(200))))
            .unwrap();

        assert_eq!(outcome.new_quantity, dec!(20));
        assert_eq!(outcome.new_avg_cost, dec!(150));

        let position = store.position(&key).unwrap().unwrap();
        assert_eq!(position.quantity(), dec!(20));
        assert_eq!(position.avg_cost(), dec!(150));
        assert_eq!(position.value(), dec!(3000));
        assert_eq!(store.lots(&key).unwrap().len(), 2);
        assert_eq!(store.movements(&key).unwrap().len(), 2);
    }

    #[test]
    fn outflow_relieves_fifo_cost_and_keeps_the_average() {
        let store = test_store();
        let key = StockKey::inventory_item(ItemId::new(), None);
        receive(&store, key, dec!(5), dec!(10));
        receive(&store, key, dec!(5), dec!(20));

        let outcome = store
            .transaction(|tx| StockLedger::apply_outflow(tx, outflow(key, dec!(7))))
            .unwrap();

        assert_eq!(outcome.removed_total_cost, dec!(90));
        assert_eq!(outcome.avg_cost_used, dec!(15));
        assert_eq!(outcome.new_quantity, dec!(3));
        assert_eq!(outcome.slices.len(), 2);

        let position = store.position(&key).unwrap().unwrap();
        assert_eq!(position.avg_cost(), dec!(15));
        let lots = store.lots(&key).unwrap();
        assert_eq!(lots[0].remaining_qty(), Decimal::ZERO);
        assert_eq!(lots[1].remaining_qty(), dec!(3));
        assert_eq!(store.verify_positions().unwrap(), 1);
    }

    #[test]
    fn outflow_to_zero_keeps_average_until_next_inflow() {
        let store = test_store();
        let key = StockKey::inventory_item(ItemId::new(), None);
        receive(&store, key, dec!(4), dec!(25));

        store
            .transaction(|tx| StockLedger::apply_outflow(tx, outflow(key, dec!(4))))
            .unwrap();
        let drained = store.position(&key).unwrap().unwrap();
        assert_eq!(drained.quantity(), Decimal::ZERO);
        assert_eq!(drained.avg_cost(), dec!(25));

        receive(&store, key, dec!(2), dec!(40));
        assert_eq!(store.position(&key).unwrap().unwrap().avg_cost(), dec!(40));
    }

    #[test]
    fn insufficient_stock_changes_nothing() {
        let store = test_store();
        let key = StockKey::inventory_item(ItemId::new(), None);
        receive(&store, key, dec!(10), dec!(3));
        let before = store.snapshot().unwrap();

        let err = store
            .transaction(|tx| StockLedger::apply_outflow(tx, outflow(key, dec!(11))))
            .unwrap_err();

        assert_eq!(
            err,
            LedgerError::InsufficientStock {
                key: key.to_string(),
                available: dec!(10),
                requested: dec!(11),
            }
        );
        assert_eq!(store.snapshot().unwrap(), before);
        assert_eq!(store.locks_held(), 0);
    }

    #[test]
    fn outflow_from_unknown_key_is_insufficient_stock() {
        let store = test_store();
        let key = StockKey::inventory_item(ItemId::new(), None);

        let err = store
            .transaction(|tx| StockLedger::apply_outflow(tx, outflow(key, dec!(1))))
            .unwrap_err();

        assert!(matches!(err, LedgerError::InsufficientStock { .. }));
        assert!(store.position(&key).unwrap().is_none());
    }

    #[test]
    fn invalid_input_is_rejected_before_locking() {
        let store = test_store();
        let key = StockKey::inventory_item(ItemId::new(), None);
        let mut tx = store.begin();

        let err = StockLedger::apply_inflow(&mut tx, inflow(key, Decimal::ZERO, dec!(1))).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        let err = StockLedger::apply_inflow(&mut tx, inflow(key, dec!(1), dec!(-1))).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        let err = StockLedger::apply_outflow(&mut tx, outflow(key, dec!(-2))).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        assert_eq!(store.locks_held(), 0);
        assert!(tx.aborted().is_none());
        tx.commit().unwrap();
    }

    #[test]
    fn get_or_create_persists_an_empty_position() {
        let store = test_store();
        let key = StockKey::livestock(ItemId::new(), Some(LocationId::new()));

        let position = store
            .transaction(|tx| StockLedger::get_or_create(tx, key))
            .unwrap();
        assert_eq!(position.quantity(), Decimal::ZERO);

        let stored = store.position(&key).unwrap().unwrap();
        assert_eq!(stored.quantity(), Decimal::ZERO);
        assert_eq!(stored.avg_cost(), Decimal::ZERO);
    }

    #[test]
    fn transfer_moves_quantity_at_fifo_cost() {
        let store = test_store();
        let item = ItemId::new();
        let (a, b) = (Some(LocationId::new()), Some(LocationId::new()));
        let source = StockKey::inventory_item(item, a);
        receive(&store, source, dec!(10), dec!(5));

        let outcome = store
            .transaction(|tx| {
                StockLedger::transfer(
                    tx,
                    Transfer {
                        item_type: ItemType::InventoryItem,
                        item_id: item,
                        from: a,
                        to: b,
                        quantity: dec!(4),
                        reference: Reference::kind_only("store_transfer"),
                    },
                )
            })
            .unwrap();

        assert_eq!(outcome.outflow.new_quantity, dec!(6));
        assert_eq!(outcome.inflow.new_quantity, dec!(4));
        assert_eq!(outcome.inflow.new_avg_cost, dec!(5));
        assert_eq!(store.position(&source.at(b)).unwrap().unwrap().quantity(), dec!(4));

        let err = store
            .transaction(|tx| {
                StockLedger::transfer(
                    tx,
                    Transfer {
                        item_type: ItemType::InventoryItem,
                        item_id: item,
                        from: a,
                        to: a,
                        quantity: dec!(1),
                        reference: Reference::kind_only("store_transfer"),
                    },
                )
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn stock_balance_reports_every_position() {
        let store = test_store();
        let cow = StockKey::livestock(ItemId::new(), None);
        let feed = StockKey::inventory_item(ItemId::new(), None);
        receive(&store, cow, dec!(2), dec!(900));
        receive(&store, feed, dec!(3), dec!(1.5));

        let report = store.stock_balance().unwrap();

        assert_eq!(report.len(), 2);
        let total: Decimal = report.iter().map(|l| l.value).sum();
        assert_eq!(total, dec!(1804.5));
    }

    // ---- journal ----

    fn entry(lines: Vec<JournalLine>) -> NewJournalEntry {
        NewJournalEntry {
            date: test_date(),
            description: "manual".to_string(),
            lines,
            reference: Reference::kind_only("manual"),
        }
    }

    #[test]
    fn unbalanced_entry_persists_nothing() {
        let store = test_store();
        let mut tx = store.begin();

        let err = DoubleEntryLedger::record(
            &mut tx,
            entry(vec![
                JournalLine::debit("LIVESTOCK-INV", dec!(100), "d"),
                JournalLine::credit("CASH-OR-AP", dec!(99.99994), "c"),
            ]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            LedgerError::UnbalancedEntry {
                debit: dec!(100),
                credit: dec!(99.9999)
            }
        );

        let err = DoubleEntryLedger::record(&mut tx, entry(vec![])).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        tx.commit().unwrap();
        assert!(store.journal_entries().unwrap().is_empty());
    }

    #[test]
    fn half_up_rounding_balances_at_four_digits() {
        let store = test_store();

        let id = store
            .transaction(|tx| {
                DoubleEntryLedger::record(
                    tx,
                    entry(vec![
                        JournalLine::debit("A", dec!(10.00005), "d"),
                        JournalLine::credit("B", dec!(10.0001), "c"),
                    ]),
                )
            })
            .unwrap();

        let posted = store.journal_entry(id).unwrap().unwrap();
        assert_eq!(posted.totals(), (dec!(10.0001), dec!(10.0001)));
    }

    #[test]
    fn reversal_offsets_and_only_once() {
        let store = test_store();
        let original = store
            .transaction(|tx| {
                DoubleEntryLedger::record(
                    tx,
                    entry(vec![
                        JournalLine::debit("LIVESTOCK-INV", dec!(500), "buy"),
                        JournalLine::credit("CASH-OR-AP", dec!(500), "pay"),
                    ]),
                )
            })
            .unwrap();

        let reversal = store
            .transaction(|tx| DoubleEntryLedger::reverse(tx, original, test_date()))
            .unwrap();
        assert_eq!(
            store.journal_entry(reversal).unwrap().unwrap().reverses(),
            Some(original)
        );

        let tb = store.trial_balance().unwrap();
        assert!(tb.is_balanced());
        assert_eq!(tb.account("LIVESTOCK-INV").unwrap().balance(), Decimal::ZERO);

        let err = store
            .transaction(|tx| DoubleEntryLedger::reverse(tx, original, test_date()))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let err = store
            .transaction(|tx| DoubleEntryLedger::reverse(tx, JournalEntryId::new(), test_date()))
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));

        assert_eq!(DoubleEntryLedger::verify_history(&store).unwrap(), 2);
    }

    // ---- conversion ----

    #[test]
    fn conversion_moves_cost_from_unit_to_product() {
        let store = test_store();
        let converter = SlaughterConverter::new(AccountCodes::default());
        let (unit, meat) = (ItemId::new(), ItemId::new());
        receive(&store, StockKey::livestock(unit, None), dec!(1), dec!(1000));

        let outcome = store
            .transaction(|tx| converter.convert(tx, convert_request(unit, meat, dec!(100), dec!(50))))
            .unwrap();

        assert_eq!(outcome.book_value, dec!(1000));
        assert_eq!(outcome.removed_cost, dec!(1000));
        assert_eq!(outcome.unit_cost, dec!(10.5));

        let unit_position = store.position(&StockKey::livestock(unit, None)).unwrap().unwrap();
        assert_eq!(unit_position.quantity(), Decimal::ZERO);
        let meat_position = store
            .position(&StockKey::inventory_item(meat, None))
            .unwrap()
            .unwrap();
        assert_eq!(meat_position.quantity(), dec!(100));
        assert_eq!(meat_position.avg_cost(), dec!(10.5));

        let journal = store.journal_entry(outcome.journal_entry_id).unwrap().unwrap();
        assert_eq!(journal.totals(), (dec!(1100), dec!(1100)));
        let has = |code: &str, debit: Decimal, credit: Decimal| {
            journal
                .lines()
                .iter()
                .any(|l| l.account_code == code && l.debit == debit && l.credit == credit)
        };
        assert!(has("MEAT-INV", dec!(1050), Decimal::ZERO));
        assert!(has("LIVESTOCK-INV", Decimal::ZERO, dec!(1000)));
        assert!(has("PROCESSING-EXP", dec!(50), Decimal::ZERO));
        assert!(has("CASH-OR-AP", Decimal::ZERO, dec!(50)));

        let record = store.conversion(outcome.conversion_id).unwrap().unwrap();
        assert_eq!(record.journal_entry_id, outcome.journal_entry_id);
        assert_eq!(record.processing_fee, dec!(50));
        assert!(store.is_consumed(unit).unwrap());

        let tb = store.trial_balance().unwrap();
        assert!(tb.is_balanced());
        assert_eq!(tb.account("MEAT-INV").unwrap().balance(), dec!(1050));
        assert_eq!(tb.account("PROCESSING-EXP").unwrap().balance(), Decimal::ZERO);
        assert_eq!(store.verify_positions().unwrap(), 2);
    }

    #[test]
    fn conversion_blends_into_existing_product_stock() {
        let store = test_store();
        let converter = SlaughterConverter::default();
        let (unit, meat) = (ItemId::new(), ItemId::new());
        receive(&store, StockKey::livestock(unit, None), dec!(1), dec!(1000));
        receive(&store, StockKey::inventory_item(meat, None), dec!(100), dec!(9.5));

        store
            .transaction(|tx| converter.convert(tx, convert_request(unit, meat, dec!(100), dec!(50))))
            .unwrap();

        let meat_position = store
            .position(&StockKey::inventory_item(meat, None))
            .unwrap()
            .unwrap();
        assert_eq!(meat_position.quantity(), dec!(200));
        assert_eq!(meat_position.avg_cost(), dec!(10));
    }

    #[test]
    fn conversion_without_fee_posts_two_lines() {
        let store = test_store();
        let converter = SlaughterConverter::default();
        let (unit, meat) = (ItemId::new(), ItemId::new());
        receive(&store, StockKey::livestock(unit, None), dec!(1), dec!(750));

        let outcome = store
            .transaction(|tx| converter.convert(tx, convert_request(unit, meat, dec!(3), Decimal::ZERO)))
            .unwrap();

        assert_eq!(outcome.unit_cost, dec!(250));
        let journal = store.journal_entry(outcome.journal_entry_id).unwrap().unwrap();
        assert_eq!(journal.lines().len(), 2);
        assert_eq!(journal.totals(), (dec!(750), dec!(750)));
    }

    #[test]
    fn conversion_unit_cost_is_rounded_once() {
        let store = test_store();
        let converter = SlaughterConverter::default();
        let (unit, meat) = (ItemId::new(), ItemId::new());
        receive(&store, StockKey::livestock(unit, None), dec!(1), dec!(1000));

        let outcome = store
            .transaction(|tx| converter.convert(tx, convert_request(unit, meat, dec!(2), dec!(0.00005))))
            .unwrap();

        // (1000 + 0.00005) / 2 = 500.000025
        assert_eq!(outcome.unit_cost, dec!(500.0000));
        let lots = store.lots(&StockKey::inventory_item(meat, None)).unwrap();
        assert_eq!(lots[0].unit_cost(), dec!(500.0000));

        let journal = store.journal_entry(outcome.journal_entry_id).unwrap().unwrap();
        let (debit, credit) = journal.totals();
        assert_eq!(debit, credit);
    }

    #[test]
    fn conversion_posts_to_configured_account_codes() {
        let config = LedgerConfig::from_lookup(|name| {
            (name == ENV_ACCOUNT_PRODUCED_INVENTORY).then(|| "1400".to_string())
        });
        let store = LedgerStore::new(config);
        let converter = SlaughterConverter::from_config(store.config());
        let (unit, meat) = (ItemId::new(), ItemId::new());
        receive(&store, StockKey::livestock(unit, None), dec!(1), dec!(800));

        let outcome = store
            .transaction(|tx| converter.convert(tx, convert_request(unit, meat, dec!(40), Decimal::ZERO)))
            .unwrap();

        let journal = store.journal_entry(outcome.journal_entry_id).unwrap().unwrap();
        let codes: Vec<&str> = journal.lines().iter().map(|l| l.account_code.as_str()).collect();
        assert_eq!(codes, vec!["1400", "LIVESTOCK-INV"]);
    }

    #[test]
    fn unit_with_nothing_on_hand_is_not_available() {
        let store = test_store();
        let converter = SlaughterConverter::default();
        let before = store.snapshot().unwrap();

        let err = store
            .transaction(|tx| {
                converter.convert(tx, convert_request(ItemId::new(), ItemId::new(), dec!(10), dec!(5)))
            })
            .unwrap_err();

        assert!(matches!(err, LedgerError::UnitNotAvailable { .. }));
        assert_eq!(store.snapshot().unwrap(), before);
        assert_eq!(store.locks_held(), 0);
    }

    #[test]
    fn converted_unit_is_never_resurrected() {
        let store = test_store();
        let converter = SlaughterConverter::default();
        let (unit, meat) = (ItemId::new(), ItemId::new());
        let unit_key = StockKey::livestock(unit, None);
        receive(&store, unit_key, dec!(1), dec!(800));
        store
            .transaction(|tx| converter.convert(tx, convert_request(unit, meat, dec!(50), Decimal::ZERO)))
            .unwrap();

        receive(&store, unit_key, dec!(1), dec!(800));
        let err = store
            .transaction(|tx| converter.convert(tx, convert_request(unit, meat, dec!(50), Decimal::ZERO)))
            .unwrap_err();

        assert!(matches!(err, LedgerError::UnitNotAvailable { .. }));
        assert_eq!(store.conversions().unwrap().len(), 1);
    }

    #[test]
    fn conversion_rejects_bad_input_before_any_mutation() {
        let store = test_store();
        let converter = SlaughterConverter::default();
        let unit = ItemId::new();
        receive(&store, StockKey::livestock(unit, None), dec!(1), dec!(800));
        let mut tx = store.begin();

        let err = converter
            .convert(&mut tx, convert_request(unit, ItemId::new(), Decimal::ZERO, dec!(1)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        let err = converter
            .convert(&mut tx, convert_request(unit, ItemId::new(), dec!(1), dec!(-1)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        assert_eq!(store.locks_held(), 0);
        tx.rollback();
    }

    #[test]
    fn corrupted_lots_abort_the_whole_conversion() {
        let store = test_store();
        let converter = SlaughterConverter::default();
        let (unit, meat) = (ItemId::new(), ItemId::new());
        let unit_key = StockKey::livestock(unit, None);
        receive(&store, unit_key, dec!(1), dec!(1000));
        store.inner_tables().write().unwrap().lots.remove(&unit_key);
        let before = store.snapshot().unwrap();

        let err = store
            .transaction(|tx| converter.convert(tx, convert_request(unit, meat, dec!(100), dec!(50))))
            .unwrap_err();

        assert!(matches!(err, LedgerError::LedgerInconsistency(_)));
        assert!(err.is_fatal());
        assert_eq!(store.snapshot().unwrap(), before);
        assert!(!store.is_consumed(unit).unwrap());
        assert!(store.verify_positions().is_err());
    }

    #[test]
    fn rows_are_stamped_by_the_ledger_clock() {
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(start));
        let store = LedgerStore::builder(LedgerConfig::default())
            .clock(clock.clone())
            .build();
        let converter = SlaughterConverter::default();
        let (unit, meat) = (ItemId::new(), ItemId::new());
        let unit_key = StockKey::livestock(unit, None);

        // Same instant: FIFO falls back to insertion order.
        receive(&store, unit_key, dec!(1), dec!(700));
        receive(&store, unit_key, dec!(1), dec!(900));
        clock.advance(chrono::Duration::days(1));

        let outcome = store
            .transaction(|tx| converter.convert(tx, convert_request(unit, meat, dec!(70), Decimal::ZERO)))
            .unwrap();

        assert_eq!(outcome.removed_cost, dec!(700));
        assert_eq!(outcome.book_value, dec!(800));
        let record = store.conversion(outcome.conversion_id).unwrap().unwrap();
        assert_eq!(record.created_at, start + chrono::Duration::days(1));
        let journal = store.journal_entry(outcome.journal_entry_id).unwrap().unwrap();
        assert_eq!(journal.date(), NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        assert!(store.lots(&unit_key).unwrap().iter().all(|l| l.created_at() == start));
    }

    // ---- transactions and locking ----

    #[test]
    fn dropped_transaction_rolls_back() {
        let store = test_store();
        let key = StockKey::inventory_item(ItemId::new(), None);
        let before = store.snapshot().unwrap();

        {
            let mut tx = store.begin();
            StockLedger::apply_inflow(&mut tx, inflow(key, dec!(5), dec!(5))).unwrap();
            assert_eq!(store.locks_held(), 1);
        }

        assert_eq!(store.snapshot().unwrap(), before);
        assert_eq!(store.locks_held(), 0);
    }

    #[test]
    fn panic_inside_a_transaction_rolls_back() {
        let store = test_store();
        let key = StockKey::inventory_item(ItemId::new(), None);

        let result = catch_unwind(AssertUnwindSafe(|| {
            store.transaction::<()>(|tx| {
                StockLedger::apply_inflow(tx, inflow(key, dec!(5), dec!(5)))?;
                panic!("caller crashed mid-transaction");
            })
        }));

        assert!(result.is_err());
        assert!(store.position(&key).unwrap().is_none());
        assert_eq!(store.locks_held(), 0);
    }

    #[test]
    fn aborted_transaction_refuses_further_work_and_commit() {
        let store = test_store();
        let key = StockKey::inventory_item(ItemId::new(), None);
        let mut tx = store.begin();

        StockLedger::apply_inflow(&mut tx, inflow(key, dec!(1), dec!(1))).unwrap();
        let first = StockLedger::apply_outflow(&mut tx, outflow(key, dec!(2))).unwrap_err();
        let second = StockLedger::apply_inflow(&mut tx, inflow(key, dec!(1), dec!(1))).unwrap_err();

        assert_eq!(first, second);
        assert_eq!(tx.commit().unwrap_err(), first);
        assert!(store.position(&key).unwrap().is_none());
    }

    #[test]
    fn aborted_transaction_reports_its_error_before_input_checks() {
        let store = test_store();
        let key = StockKey::inventory_item(ItemId::new(), None);
        let mut tx = store.begin();
        let first = StockLedger::apply_outflow(&mut tx, outflow(key, dec!(1))).unwrap_err();

        let unbalanced = DoubleEntryLedger::record(
            &mut tx,
            entry(vec![
                JournalLine::debit("A", dec!(5), "d"),
                JournalLine::credit("B", dec!(4), "c"),
            ]),
        )
        .unwrap_err();
        let invalid = StockLedger::apply_inflow(&mut tx, inflow(key, dec!(-1), dec!(1))).unwrap_err();
        let bad_convert = SlaughterConverter::default()
            .convert(&mut tx, convert_request(ItemId::new(), ItemId::new(), Decimal::ZERO, Decimal::ZERO))
            .unwrap_err();

        assert_eq!(unbalanced, first);
        assert_eq!(invalid, first);
        assert_eq!(bad_convert, first);
    }

    #[test]
    fn same_key_waits_then_times_out() {
        let store = quick_timeout_store();
        let key = StockKey::inventory_item(ItemId::new(), None);

        let mut holder = store.begin();
        StockLedger::get_or_create(&mut holder, key).unwrap();

        let err = store
            .transaction(|tx| StockLedger::apply_inflow(tx, inflow(key, dec!(1), dec!(1))))
            .unwrap_err();
        assert!(matches!(err, LedgerError::LockTimeout { .. }));
        assert!(err.is_retryable());

        holder.commit().unwrap();
        receive(&store, key, dec!(1), dec!(1));
        assert_eq!(store.position(&key).unwrap().unwrap().quantity(), dec!(1));
    }

    #[test]
    fn different_keys_do_not_block() {
        let store = LedgerStore::new(LedgerConfig::default().with_lock_timeout(Duration::ZERO));
        let a = StockKey::inventory_item(ItemId::new(), None);
        let b = StockKey::inventory_item(ItemId::new(), None);

        let mut first = store.begin();
        StockLedger::apply_inflow(&mut first, inflow(a, dec!(1), dec!(1))).unwrap();

        let other_store = store.clone();
        let second = thread::spawn(move || {
            other_store.transaction(|tx| StockLedger::apply_inflow(tx, inflow(b, dec!(1), dec!(1))))
        })
        .join()
        .unwrap();

        assert!(second.is_ok());
        first.commit().unwrap();
        assert_eq!(store.stock_balance().unwrap().len(), 2);
    }

    #[test]
    fn waiter_sees_the_first_writer_committed_state() {
        let store = test_store();
        let key = StockKey::inventory_item(ItemId::new(), None);
        receive(&store, key, dec!(10), dec!(10));

        let mut first = store.begin();
        StockLedger::apply_outflow(&mut first, outflow(key, dec!(8))).unwrap();

        let other_store = store.clone();
        let waiter = thread::spawn(move || {
            other_store.transaction(|tx| StockLedger::apply_outflow(tx, outflow(key, dec!(8))))
        });

        thread::sleep(Duration::from_millis(50));
        first.commit().unwrap();

        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock { available, .. } if available == dec!(2)
        ));
    }

    #[test]
    fn parallel_inflows_on_one_key_sum_exactly() {
        let store = test_store();
        let key = StockKey::inventory_item(ItemId::new(), None);

        let workers: Vec<_> = (1..=8u32)
            .map(|w| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 1..=10u32 {
                        let qty = Decimal::from(w);
                        let cost = Decimal::from(w * 10 + i);
                        store
                            .transaction(|tx| StockLedger::apply_inflow(tx, inflow(key, qty, cost)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let mut expected_qty = Decimal::ZERO;
        let mut expected_cost = Decimal::ZERO;
        for w in 1..=8u32 {
            for i in 1..=10u32 {
                expected_qty += Decimal::from(w);
                expected_cost += Decimal::from(w) * Decimal::from(w * 10 + i);
            }
        }

        let position = store.position(&key).unwrap().unwrap();
        assert_eq!(position.quantity(), expected_qty);
        let true_avg = expected_cost / expected_qty;
        assert!((position.avg_cost() - true_avg).abs() < dec!(0.01));

        let lot_cost: Decimal = store.lots(&key).unwrap().iter().map(|l| l.total_cost()).sum();
        assert_eq!(lot_cost, expected_cost);
        assert_eq!(store.movements(&key).unwrap().len(), 80);
    }

    #[test]
    fn stale_version_is_a_conflict() {
        let store = test_store();
        let key = StockKey::inventory_item(ItemId::new(), None);
        let mut tx = store.begin();
        StockLedger::apply_inflow(&mut tx, inflow(key, dec!(1), dec!(1))).unwrap();

        // A row appears behind the lock's back.
        let rogue = herdledger_inventory::StockPosition::empty(key, Utc::now())
            .with_inflow(dec!(9), dec!(9), Utc::now())
            .unwrap();
        store.inner_tables().write().unwrap().positions.insert(key, rogue.clone());

        let err = tx.commit().unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
        assert_eq!(store.position(&key).unwrap(), Some(rogue));
        assert_eq!(store.locks_held(), 0);
    }

    // ---- events ----

    #[test]
    fn events_are_published_only_after_commit() {
        let bus: Arc<InMemoryEventBus<EventEnvelope<LedgerEvent>>> = Arc::new(InMemoryEventBus::new());
        let subscription = bus.subscribe();
        let store = LedgerStore::builder(LedgerConfig::default())
            .event_bus(bus.clone())
            .build();
        let converter = SlaughterConverter::default();
        let (unit, meat) = (ItemId::new(), ItemId::new());

        let mut tx = store.begin();
        StockLedger::apply_inflow(&mut tx, inflow(StockKey::livestock(unit, None), dec!(1), dec!(600)))
            .unwrap();
        assert!(subscription.try_recv().is_err());
        tx.commit().unwrap();

        let committed = subscription.drain();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].sequence_number(), 1);
        assert_eq!(committed[0].event_type(), "inventory.stock.inflow_applied");

        {
            let mut tx = store.begin();
            StockLedger::apply_inflow(&mut tx, inflow(StockKey::livestock(unit, None), dec!(1), dec!(1)))
                .unwrap();
        }
        assert!(subscription.drain().is_empty());

        store
            .transaction(|tx| converter.convert(tx, convert_request(unit, meat, dec!(10), dec!(5))))
            .unwrap();
        let types: Vec<String> = subscription
            .drain()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect();
        assert_eq!(
            types,
            vec![
                "inventory.stock.outflow_applied",
                "inventory.stock.inflow_applied",
                "inventory.unit.consumed",
                "accounting.journal.entry_recorded",
            ]
        );
    }

    #[test]
    fn concurrent_commits_are_delivered_in_sequence_order() {
        let bus: Arc<InMemoryEventBus<EventEnvelope<LedgerEvent>>> = Arc::new(InMemoryEventBus::new());
        let subscription = bus.subscribe();
        let store = LedgerStore::builder(LedgerConfig::default())
            .event_bus(bus.clone())
            .build();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    let key = StockKey::inventory_item(ItemId::new(), None);
                    for _ in 0..10 {
                        store
                            .transaction(|tx| StockLedger::apply_inflow(tx, inflow(key, dec!(1), dec!(2))))
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let sequences: Vec<u64> = subscription
            .drain()
            .iter()
            .map(|e| e.sequence_number())
            .collect();
        assert_eq!(sequences, (1..=80).collect::<Vec<u64>>());
    }

    #[test]
    fn envelopes_share_the_transaction_id_and_serialize() {
        let bus: Arc<InMemoryEventBus<EventEnvelope<LedgerEvent>>> = Arc::new(InMemoryEventBus::new());
        let subscription = bus.subscribe();
        let store = LedgerStore::builder(LedgerConfig::default())
            .event_bus(bus.clone())
            .build();
        let key = StockKey::inventory_item(ItemId::new(), None);

        let mut tx = store.begin();
        let tx_id = tx.id();
        StockLedger::apply_inflow(&mut tx, inflow(key, dec!(2), dec!(3))).unwrap();
        StockLedger::apply_outflow(&mut tx, outflow(key, dec!(1))).unwrap();
        tx.commit().unwrap();

        let envelopes = subscription.drain();
        assert_eq!(envelopes.len(), 2);
        assert!(envelopes.iter().all(|e| e.transaction_id() == tx_id));
        assert_eq!(envelopes[1].sequence_number(), 2);
        assert_eq!(envelopes[1].payload().event_type(), envelopes[1].event_type());

        let json = envelopes[0].to_json().unwrap();
        assert_eq!(json.payload()["module"], "stock");
    }

    // ---- properties ----

    #[derive(Debug, Clone)]
    enum Op {
        In(u32, u32),
        Out(u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u32..50, 0u32..100_000).prop_map(|(q, c)| Op::In(q, c)),
            (1u32..50).prop_map(Op::Out),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: after any sequence of receipts and issues, the position
        /// quantity equals both the lot remainder and the net movement history.
        #[test]
        fn positions_lots_and_movements_agree(ops in prop::collection::vec(op_strategy(), 1..30)) {
            let store = test_store();
            let key = StockKey::inventory_item(ItemId::new(), None);

            for op in ops {
                let result = match op {
                    Op::In(q, c) => store
                        .transaction(|tx| {
                            StockLedger::apply_inflow(tx, inflow(key, Decimal::from(q), Decimal::new(c.into(), 2)))
                        })
                        .map(|_| ()),
                    Op::Out(q) => store
                        .transaction(|tx| StockLedger::apply_outflow(tx, outflow(key, Decimal::from(q))))
                        .map(|_| ()),
                };
                match result {
                    Ok(()) | Err(LedgerError::InsufficientStock { .. }) => {}
                    Err(other) => prop_assert!(false, "unexpected error: {:?}", other),
                }
            }

            store.verify_positions().unwrap();
            let quantity = store
                .position(&key)
                .unwrap()
                .map(|p| p.quantity())
                .unwrap_or_default();
            prop_assert!(quantity >= Decimal::ZERO);
            prop_assert_eq!(quantity, net_quantity(&store.movements(&key).unwrap()));
        }
    }
}
