//! Racing callers against one store. Every thread waits on a barrier so the
//! calls overlap as much as the scheduler allows.
use fuel_fulfillment::audit::AuditAction;
use fuel_fulfillment::bank::{BankAccountUpdate, NewBankAccount};
use fuel_fulfillment::order::{NewOrder, Order, OrderStatus, ReleaseDetails};
use fuel_fulfillment::pfi::{NewPfi, PfiStatus};
use fuel_fulfillment::types::OrderId;
use fuel_fulfillment::types::{Actor, TimeStamp};
use fuel_fulfillment::{Error, FuelOps};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::{TempDir, tempdir};

fn fuel_ops(name: &str) -> anyhow::Result<(TempDir, Arc<FuelOps>)> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join(name))?;
    let ops = FuelOps::with_db(Arc::new(db))?;
    Ok((temp_dir, Arc::new(ops)))
}

fn actor(n: usize) -> Actor {
    Actor::new(format!("user-{n}"), format!("user{n}@depot.test"))
}

fn loading() -> ReleaseDetails {
    ReleaseDetails::new("KJA-482XY", "Musa Bello", "08031234567", TimeStamp::new())
}

fn paid_order(ops: &FuelOps, location: &str, litres: u64) -> anyhow::Result<Order> {
    let order = ops.orders.place_order(
        NewOrder::new()
            .set_location(location)
            .add_product("AGO", litres, 950),
        &actor(0),
    )?;
    Ok(ops.orders.confirm_payment(order.id, &actor(0), None, None)?)
}

#[test]
fn duplicate_payment_confirmation_succeeds_once() -> anyhow::Result<()> {
    let (_dir, ops) = fuel_ops("double_pay.db")?;
    let order = ops.orders.place_order(
        NewOrder::new().set_location("LAG-01").add_product("AGO", 1_000, 950),
        &actor(0),
    )?;

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (1..=2)
        .map(|n| {
            let ops = Arc::clone(&ops);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ops.orders.confirm_payment(order.id, &actor(n), None, None)
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("payment thread panicked"))
        .collect();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    let refused = results
        .iter()
        .find_map(|result| result.as_ref().err())
        .expect("one confirmation must be refused");
    assert!(matches!(
        refused,
        Error::Conflict {
            current_status: OrderStatus::Paid,
            ..
        }
    ));
    assert_eq!(ops.audit.trail(order.id)?.len(), 1);

    Ok(())
}

#[test]
fn concurrent_releases_never_oversell() -> anyhow::Result<()> {
    let (_dir, ops) = fuel_ops("race_release.db")?;
    let pfi = ops
        .pfis
        .create(NewPfi::new("PFI-RACE", "LAG-01", "AGO", 1_000), &actor(0))?;

    let mut orders = vec![];
    for _ in 0..8 {
        orders.push(paid_order(&ops, "LAG-01", 300)?);
    }

    let barrier = Arc::new(Barrier::new(orders.len()));
    let handles: Vec<_> = orders
        .iter()
        .enumerate()
        .map(|(n, order)| {
            let ops = Arc::clone(&ops);
            let barrier = Arc::clone(&barrier);
            let order_id = order.id;
            thread::spawn(move || {
                barrier.wait();
                ops.orders
                    .release(order_id, &actor(n), loading(), Some(pfi.id))
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().expect("release thread panicked"))
        .collect();

    let released = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(released, 3);
    assert!(results.iter().all(|result| match result {
        Ok(_) => true,
        Err(err) => matches!(err, Error::CapacityExceeded { .. }),
    }));

    let totals = ops.pfis.compute_totals(pfi.id)?;
    assert_eq!(totals.sold_qty_litres, 900);
    assert_eq!(totals.remaining_qty_litres, 100);
    assert_eq!(totals.orders_count, 3);

    Ok(())
}

#[test]
fn releases_on_different_pfis_do_not_interfere() -> anyhow::Result<()> {
    let (_dir, ops) = fuel_ops("race_independent.db")?;
    let locations = ["LAG-01", "ABJ-02", "PHC-03", "KAN-04"];

    let mut work = vec![];
    for location in locations {
        let pfi = ops
            .pfis
            .create(NewPfi::new(format!("PFI-{location}"), location, "AGO", 2_000), &actor(0))?;
        for _ in 0..2 {
            work.push((pfi.id, paid_order(&ops, location, 1_000)?.id));
        }
    }

    let barrier = Arc::new(Barrier::new(work.len()));
    let handles: Vec<_> = work
        .iter()
        .enumerate()
        .map(|(n, &(pfi_id, order_id))| {
            let ops = Arc::clone(&ops);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ops.orders.release(order_id, &actor(n), loading(), Some(pfi_id))
            })
        })
        .collect();

    for handle in handles {
        let order = handle.join().expect("release thread panicked")?;
        assert_eq!(order.status, OrderStatus::Released);
    }
    for (pfi_id, _) in work.iter().step_by(2) {
        assert_eq!(ops.pfis.compute_totals(*pfi_id)?.remaining_qty_litres, 0);
    }

    Ok(())
}

fn events_of(ops: &FuelOps, orders: &[OrderId], action: AuditAction) -> anyhow::Result<usize> {
    let mut count = 0;
    for order_id in orders {
        count += ops
            .audit
            .trail(*order_id)?
            .iter()
            .filter(|event| event.action == action)
            .count();
    }
    Ok(count)
}

#[test]
fn finish_racing_releases_leaves_consistent_totals() -> anyhow::Result<()> {
    let (_dir, ops) = fuel_ops("race_finish_release.db")?;
    let pfi = ops
        .pfis
        .create(NewPfi::new("PFI-FINISH", "LAG-01", "AGO", 10_000), &actor(0))?;

    let mut orders = vec![];
    for _ in 0..6 {
        orders.push(paid_order(&ops, "LAG-01", 1_000)?.id);
    }
    let late = paid_order(&ops, "LAG-01", 1_000)?;

    let barrier = Arc::new(Barrier::new(orders.len() + 1));
    let releases: Vec<_> = orders
        .iter()
        .enumerate()
        .map(|(n, &order_id)| {
            let ops = Arc::clone(&ops);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ops.orders
                    .release(order_id, &actor(n + 1), loading(), Some(pfi.id))
            })
        })
        .collect();
    let finish = {
        let ops = Arc::clone(&ops);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            ops.pfis.finish(pfi.id, &actor(0))
        })
    };

    let finished = finish.join().expect("finish thread panicked")?;
    assert_eq!(finished.status, PfiStatus::Finished);

    let mut released = 0u64;
    for (handle, order_id) in releases.into_iter().zip(&orders) {
        match handle.join().expect("release thread panicked") {
            Ok(order) => {
                assert_eq!(order.pfi_id, Some(pfi.id));
                released += 1;
            }
            Err(err) => {
                assert!(matches!(
                    err,
                    Error::PfiNotActive {
                        current_status: PfiStatus::Finished,
                        ..
                    }
                ));
                let order = ops.orders.get(*order_id)?;
                assert_eq!(order.status, OrderStatus::Paid);
                assert_eq!(order.pfi_id, None);
            }
        }
    }

    let totals = ops.pfis.compute_totals(pfi.id)?;
    assert_eq!(totals.orders_count, released);
    assert_eq!(totals.sold_qty_litres, released * 1_000);
    assert_eq!(
        events_of(&ops, &orders, AuditAction::Release)? as u64,
        released
    );

    // once finished, nothing more gets on
    let err = ops
        .orders
        .release(late.id, &actor(0), loading(), Some(pfi.id))
        .unwrap_err();
    assert!(matches!(err, Error::PfiNotActive { .. }));

    Ok(())
}

#[test]
fn finish_racing_assignments_leaves_consistent_totals() -> anyhow::Result<()> {
    let (_dir, ops) = fuel_ops("race_finish_assign.db")?;
    let pfi = ops
        .pfis
        .create(NewPfi::new("PFI-FINISH", "LAG-01", "AGO", 10_000), &actor(0))?;

    let mut orders = vec![];
    for _ in 0..6 {
        let order = paid_order(&ops, "LAG-01", 1_000)?;
        orders.push(ops.orders.release(order.id, &actor(0), loading(), None)?.id);
    }

    let barrier = Arc::new(Barrier::new(orders.len() + 1));
    let assignments: Vec<_> = orders
        .iter()
        .enumerate()
        .map(|(n, &order_id)| {
            let ops = Arc::clone(&ops);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ops.orders.assign_to_pfi(&[order_id], pfi.id, &actor(n + 1))
            })
        })
        .collect();
    let finish = {
        let ops = Arc::clone(&ops);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            ops.pfis.finish(pfi.id, &actor(0))
        })
    };

    finish.join().expect("finish thread panicked")?;

    let mut assigned = 0u64;
    for handle in assignments {
        match handle.join().expect("assignment thread panicked") {
            Ok(outcome) => {
                assert!(outcome.rejected.is_empty());
                assigned += outcome.assigned.len() as u64;
            }
            Err(err) => assert!(matches!(err, Error::PfiNotActive { .. })),
        }
    }

    let totals = ops.pfis.compute_totals(pfi.id)?;
    assert_eq!(totals.orders_count, assigned);
    assert_eq!(totals.sold_qty_litres, assigned * 1_000);
    assert_eq!(
        events_of(&ops, &orders, AuditAction::PfiAssignment)? as u64,
        assigned
    );

    Ok(())
}

#[test]
fn concurrent_bank_account_edits_are_both_kept() -> anyhow::Result<()> {
    let (_dir, ops) = fuel_ops("race_bank.db")?;

    for round in 0..10 {
        let account = ops.bank_accounts.create(NewBankAccount {
            acct_no: format!("01234567{round:02}"),
            bank_name: "First Bank".into(),
            account_name: "Depot Collections".into(),
            location_id: Some("LAG-01".into()),
        })?;
        let account_id = account.id;

        let barrier = Arc::new(Barrier::new(2));
        let rename = {
            let ops = Arc::clone(&ops);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ops.bank_accounts.update(
                    account_id,
                    BankAccountUpdate {
                        bank_name: Some("Zenith Bank".into()),
                        ..Default::default()
                    },
                )
            })
        };
        let deactivate = {
            let ops = Arc::clone(&ops);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                ops.bank_accounts.set_active(account_id, false)
            })
        };
        rename.join().expect("update thread panicked")?;
        deactivate.join().expect("set_active thread panicked")?;

        let account = ops.bank_accounts.get(account_id)?;
        assert_eq!(account.bank_name, "Zenith Bank");
        assert!(!account.is_active);
    }

    Ok(())
}
