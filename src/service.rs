//! Service layer API for the order fulfillment state machine
//!
//! ```text
//! pending  --confirm_payment-->    paid
//! pending  --cancel-->             canceled
//! paid     --release-->            released
//! released --confirm_truck_exit--> truck_exited
//! ```
//!
//! Every transition is a compare-and-swap on the stored status inside one sled
//! transaction that also appends the audit event. A request made against a
//! stale view of the order gets an error carrying the status it actually has.
use super::audit::{AuditAction, AuditEvent, AuditLog};
use super::bank::BankAccount;
use super::error::{Entity, Error, Result, ValidationError};
use super::ledger::{PfiLedger, PfiSnapshot};
use super::order::{NewOrder, Order, OrderFilter, OrderStatus, ReleaseDetails};
use super::config::PagingSettings;
use super::page::{Page, PageRequest};
use super::store::{self, Store, TxResult};
use super::types::{Actor, BankAccountId, OrderId, PfiId, TimeStamp};
use sled::Transactional;
use sled::transaction::TransactionalTree;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Why an order was left out of a PFI assignment batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentRejection {
    NotFound,
    Ineligible { current_status: OrderStatus },
    AlreadyAssigned { pfi_id: PfiId },
    Mismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub order_id: OrderId,
    pub reason: AssignmentRejection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentOutcome {
    pub assigned: Vec<Order>,
    pub rejected: Vec<Rejected>,
}

pub struct OrderService {
    store: Arc<Store>,
    ledger: Arc<PfiLedger>,
    paging: PagingSettings,
}

impl OrderService {
    pub fn new(store: Arc<Store>, ledger: Arc<PfiLedger>) -> Self {
        Self {
            store,
            ledger,
            paging: PagingSettings::default(),
        }
    }
    pub fn with_paging(mut self, paging: PagingSettings) -> Self {
        self.paging = paging;
        self
    }
    /// The first page at the configured default size.
    pub fn first_page(&self) -> PageRequest {
        self.paging.first_page()
    }

    /// Take in a new order. It starts `pending` with its reference fixed.
    #[instrument(skip_all, fields(actor = %actor))]
    pub fn place_order(&self, new_order: NewOrder, actor: &Actor) -> Result<Order> {
        let order = new_order.validate_and_finalise(actor)?;

        if let Some(pfi_id) = order.pfi_id {
            let pfi = self.ledger.get(pfi_id)?;
            if !pfi.is_active() {
                return Err(Error::PfiNotActive {
                    pfi_id,
                    current_status: pfi.status,
                });
            }
            if !pfi.serves(&order) {
                return Err(ValidationError::PfiMismatch {
                    order_id: order.id,
                    pfi_id,
                }
                .into());
            }
        }

        self.store
            .orders
            .insert(order.id.as_bytes(), store::encode(&order)?)?;
        info!(order_id = %order.id, reference = %order.reference, quantity = order.quantity, "order placed");

        Ok(order)
    }

    pub fn get(&self, order_id: OrderId) -> Result<Order> {
        store::load(&self.store.orders, order_id.as_bytes())?
            .ok_or(Error::NotFound(Entity::Order(order_id)))
    }

    /// Orders matching `filter`, newest first.
    #[instrument(skip(self))]
    pub fn list(&self, filter: &OrderFilter, page: PageRequest) -> Result<Page<Order>> {
        page.validate(self.paging.max_page_size)?;

        let mut matches = vec![];
        for entry in self.store.orders.iter().rev() {
            let (_, bytes) = entry?;
            let order: Order = store::decode(&bytes)?;
            if filter.matches(&order) {
                matches.push(order);
            }
        }
        debug!(count = matches.len(), "order list");

        Ok(Page::from_matches(matches, page))
    }

    /// `pending -> paid`. Snapshots the receiving bank account onto the order.
    #[instrument(skip_all, fields(order_id = %order_id, actor = %actor))]
    pub fn confirm_payment(
        &self,
        order_id: OrderId,
        actor: &Actor,
        paid_into: Option<BankAccountId>,
        narration: Option<String>,
    ) -> Result<Order> {
        actor.validate()?;
        let narration = narration.filter(|note| !note.trim().is_empty());
        let event = AuditEvent::new(order_id, AuditAction::PaymentConfirmation, actor)
            .with_narration(narration.clone());
        let trees = (
            &self.store.orders,
            &self.store.bank_accounts,
            &self.store.audit,
            &self.store.audit_by_order,
        );

        // the account is read inside the transaction
        let order = trees
            .transaction(|(orders, accounts, audit, audit_by_order)| {
                let mut order = tx_load_order(orders, order_id)?;
                expect_status(&order, OrderStatus::Pending).or_else(store::abort)?;
                if let Some(account_id) = paid_into {
                    let Some(account) = store::tx_load::<BankAccount>(accounts, account_id.as_bytes())?
                    else {
                        return store::abort(Error::NotFound(Entity::BankAccount(account_id)));
                    };
                    account
                        .accepts_payment_for(&order.location_id)
                        .or_else(store::abort)?;
                    order.payment = Some(account.snapshot());
                }
                order.status = OrderStatus::Paid;
                order.payment_user_id = Some(actor.user_id.clone());
                order.payment_narration = narration.clone();
                order.paid_at = Some(TimeStamp::new());

                store::tx_store(orders, order_id.as_bytes(), &order)?;
                AuditLog::append(audit, audit_by_order, &event)?;
                Ok(order)
            })
            .map_err(Error::from)
            .inspect_err(refused)?;

        info!(reference = %order.reference, "payment confirmed");
        Ok(order)
    }

    /// `paid -> released`. With a PFI the order's litres are reserved against it
    /// in the same commit, or nothing changes. A PFI named here takes precedence
    /// over one recorded at intake, which has drawn nothing yet.
    #[instrument(skip_all, fields(order_id = %order_id, actor = %actor, pfi_id = tracing::field::Empty))]
    pub fn release(
        &self,
        order_id: OrderId,
        actor: &Actor,
        details: ReleaseDetails,
        pfi_id: Option<PfiId>,
    ) -> Result<Order> {
        actor.validate()?;
        details.validate()?;

        let current = self.get(order_id)?;
        expect_status(&current, OrderStatus::Paid).inspect_err(refused)?;
        let pfi_id = pfi_id.or(current.pfi_id);
        let event = AuditEvent::new(order_id, AuditAction::Release, actor);

        let order = match pfi_id {
            None => self.transition(order_id, &event, |order| {
                expect_status(order, OrderStatus::Paid)?;
                details.validate_against(order.quantity)?;
                mark_released(order, actor, details.clone());
                Ok(())
            })?,
            Some(pfi_id) => {
                tracing::Span::current().record("pfi_id", tracing::field::display(pfi_id));
                self.ledger
                    .attach(pfi_id, |snapshot| {
                        self.release_against(snapshot, order_id, actor, &details, &event)
                    })
                    .inspect_err(refused)?
            }
        };

        info!(reference = %order.reference, truck = %details.truck_number, "order released");
        Ok(order)
    }

    /// `released -> truck_exited`. An order not yet released gets `NotReleased`,
    /// one already out gets `Conflict`.
    #[instrument(skip_all, fields(order_id = %order_id, actor = %actor))]
    pub fn confirm_truck_exit(&self, order_id: OrderId, actor: &Actor) -> Result<Order> {
        actor.validate()?;
        let event = AuditEvent::new(order_id, AuditAction::TruckExit, actor);

        let order = self.transition(order_id, &event, |order| {
            match order.status {
                OrderStatus::Released => {}
                OrderStatus::Pending | OrderStatus::Paid => {
                    return Err(Error::NotReleased {
                        order_id: order.id,
                        current_status: order.status,
                    });
                }
                OrderStatus::TruckExited | OrderStatus::Canceled => {
                    return Err(Error::Conflict {
                        order_id: order.id,
                        current_status: order.status,
                    });
                }
            }
            order.status = OrderStatus::TruckExited;
            order.truck_exited = true;
            order.truck_exit_user_id = Some(actor.user_id.clone());
            order.truck_exited_at = Some(TimeStamp::new());
            Ok(())
        })?;

        info!(reference = %order.reference, "truck exit confirmed");
        Ok(order)
    }

    /// `pending -> canceled`. Paid or later orders cannot be canceled.
    #[instrument(skip_all, fields(order_id = %order_id, actor = %actor))]
    pub fn cancel(&self, order_id: OrderId, actor: &Actor) -> Result<Order> {
        actor.validate()?;
        let event = AuditEvent::new(order_id, AuditAction::Cancel, actor);

        let order = self.transition(order_id, &event, |order| {
            expect_status(order, OrderStatus::Pending)?;
            order.status = OrderStatus::Canceled;
            order.cancel_user_id = Some(actor.user_id.clone());
            order.canceled_at = Some(TimeStamp::new());
            Ok(())
        })?;

        info!(reference = %order.reference, "order canceled");
        Ok(order)
    }

    /// Bind already released orders to a PFI. Orders that cannot be bound are
    /// reported back; the rest are checked against capacity as one batch and
    /// either all bound or, on `CapacityExceeded`, none.
    #[instrument(skip_all, fields(pfi_id = %pfi_id, actor = %actor, batch = order_ids.len()))]
    pub fn assign_to_pfi(
        &self,
        order_ids: &[OrderId],
        pfi_id: PfiId,
        actor: &Actor,
    ) -> Result<AssignmentOutcome> {
        actor.validate()?;
        if order_ids.is_empty() {
            return Err(ValidationError::EmptyBatch.into());
        }

        let mut seen = HashSet::new();
        let events: Vec<AuditEvent> = order_ids
            .iter()
            .filter(|id| seen.insert(**id))
            .map(|id| {
                AuditEvent::new(*id, AuditAction::PfiAssignment, actor).with_pfi(Some(pfi_id))
            })
            .collect();

        let outcome = self
            .ledger
            .attach(pfi_id, |snapshot| self.assign_batch(snapshot, &events))
            .inspect_err(refused)?;

        info!(
            assigned = outcome.assigned.len(),
            rejected = outcome.rejected.len(),
            "PFI assignment"
        );
        Ok(outcome)
    }

    fn release_against(
        &self,
        snapshot: &PfiSnapshot,
        order_id: OrderId,
        actor: &Actor,
        details: &ReleaseDetails,
        event: &AuditEvent,
    ) -> Result<Order> {
        let pfi_id = snapshot.pfi.id;
        let trees = (
            &self.store.orders,
            &self.store.pfis,
            &self.store.pfi_orders,
            &self.store.audit,
            &self.store.audit_by_order,
        );

        let order = trees.transaction(|(orders, pfis, pfi_orders, audit, audit_by_order)| {
            let mut order = tx_load_order(orders, order_id)?;
            expect_status(&order, OrderStatus::Paid).or_else(store::abort)?;
            details.validate_against(order.quantity).or_else(store::abort)?;
            let pfi = PfiLedger::tx_ensure_active(pfis, pfi_id)?;
            snapshot.admit(&[&order]).or_else(store::abort)?;

            let mut details = details.clone();
            if details.pfi_reference.is_none() {
                details.pfi_reference = Some(pfi.pfi_number.clone());
            }
            mark_released(&mut order, actor, details);
            order.pfi_id = Some(pfi_id);

            store::tx_store(orders, order_id.as_bytes(), &order)?;
            PfiLedger::tx_bind(pfi_orders, pfi_id, order_id)?;
            AuditLog::append(audit, audit_by_order, &event.clone().with_pfi(Some(pfi_id)))?;
            Ok(order)
        })?;

        Ok(order)
    }

    fn assign_batch(&self, snapshot: &PfiSnapshot, events: &[AuditEvent]) -> Result<AssignmentOutcome> {
        let pfi_id = snapshot.pfi.id;
        let trees = (
            &self.store.orders,
            &self.store.pfis,
            &self.store.pfi_orders,
            &self.store.audit,
            &self.store.audit_by_order,
        );

        let outcome = trees.transaction(|(orders, pfis, pfi_orders, audit, audit_by_order)| {
            PfiLedger::tx_ensure_active(pfis, pfi_id)?;

            let mut accepted = vec![];
            let mut rejected = vec![];
            for event in events {
                let order_id = event.order_id;
                let reject = |reason| Rejected { order_id, reason };

                let Some(order) = store::tx_load::<Order>(orders, order_id.as_bytes())? else {
                    rejected.push(reject(AssignmentRejection::NotFound));
                    continue;
                };
                if !order.status.is_eligible() {
                    rejected.push(reject(AssignmentRejection::Ineligible {
                        current_status: order.status,
                    }));
                    continue;
                }
                if let Some(bound) = order.pfi_id {
                    rejected.push(reject(AssignmentRejection::AlreadyAssigned { pfi_id: bound }));
                    continue;
                }
                if !snapshot.pfi.serves(&order) {
                    rejected.push(reject(AssignmentRejection::Mismatch));
                    continue;
                }
                accepted.push((order, event));
            }

            let batch: Vec<&Order> = accepted.iter().map(|(order, _)| order).collect();
            snapshot.admit(&batch).or_else(store::abort)?;

            let mut assigned = Vec::with_capacity(accepted.len());
            for (mut order, event) in accepted {
                order.pfi_id = Some(pfi_id);
                store::tx_store(orders, order.id.as_bytes(), &order)?;
                PfiLedger::tx_bind(pfi_orders, pfi_id, order.id)?;
                AuditLog::append(audit, audit_by_order, event)?;
                assigned.push(order);
            }

            Ok(AssignmentOutcome { assigned, rejected })
        })?;

        Ok(outcome)
    }

    // Load, check and mutate one order, then write it with its audit event.
    fn transition(
        &self,
        order_id: OrderId,
        event: &AuditEvent,
        apply: impl Fn(&mut Order) -> Result<()>,
    ) -> Result<Order> {
        let trees = (&self.store.orders, &self.store.audit, &self.store.audit_by_order);

        trees
            .transaction(|(orders, audit, audit_by_order)| {
                let mut order = tx_load_order(orders, order_id)?;
                apply(&mut order).or_else(store::abort)?;

                store::tx_store(orders, order_id.as_bytes(), &order)?;
                AuditLog::append(audit, audit_by_order, event)?;
                Ok(order)
            })
            .map_err(Error::from)
            .inspect_err(refused)
    }
}

fn tx_load_order(orders: &TransactionalTree, order_id: OrderId) -> TxResult<Order> {
    match store::tx_load::<Order>(orders, order_id.as_bytes())? {
        Some(order) => Ok(order),
        None => store::abort(Error::NotFound(Entity::Order(order_id))),
    }
}

fn expect_status(order: &Order, expected: OrderStatus) -> Result<()> {
    if order.status != expected {
        return Err(Error::Conflict {
            order_id: order.id,
            current_status: order.status,
        });
    }
    Ok(())
}

fn mark_released(order: &mut Order, actor: &Actor, details: ReleaseDetails) {
    order.status = OrderStatus::Released;
    order.release_user_id = Some(actor.user_id.clone());
    order.release_details = Some(details);
    order.released_at = Some(TimeStamp::new());
}

fn refused(err: &Error) {
    if err.is_conflict() || matches!(err, Error::CapacityExceeded { .. }) {
        warn!(error = %err, "transition refused");
    }
}
