//! PFI capacity accounting.
//!
//! Sold and remaining litres are always recomputed from the orders bound to a
//! PFI through the `pfi_orders` index. Anything that binds orders to a PFI, or
//! finishes one, runs under that PFI's mutex: totals are computed, checked and
//! committed without another attach slipping in between. PFIs never share a
//! mutex, so attaching to one does not wait on another.
use super::error::{Entity, Error, Result, ValidationError};
use super::order::Order;
use super::config::PagingSettings;
use super::page::{Page, PageRequest};
use super::pfi::{NewPfi, Pfi, PfiFilter, PfiStatus, PfiTotals, PfiView};
use super::store::{self, Store, TxResult};
use super::types::{Actor, OrderId, PfiId, TimeStamp};
use dashmap::DashMap;
use sled::Transactional;
use sled::transaction::TransactionalTree;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument, warn};

/// A PFI and its totals, taken while the PFI's mutex is held.
#[derive(Debug, Clone)]
pub(crate) struct PfiSnapshot {
    pub pfi: Pfi,
    pub totals: PfiTotals,
}

impl PfiSnapshot {
    /// Check that `orders` may jointly draw on this PFI.
    pub(crate) fn admit(&self, orders: &[&Order]) -> Result<()> {
        for order in orders {
            if !self.pfi.serves(order) {
                return Err(ValidationError::PfiMismatch {
                    order_id: order.id,
                    pfi_id: self.pfi.id,
                }
                .into());
            }
        }
        let requested = orders
            .iter()
            .fold(0u64, |sum, order| sum.saturating_add(order.quantity));
        if requested > self.totals.remaining_qty_litres {
            warn!(
                pfi_id = %self.pfi.id,
                requested,
                remaining = self.totals.remaining_qty_litres,
                "PFI capacity exceeded"
            );
            return Err(Error::CapacityExceeded {
                pfi_id: self.pfi.id,
                requested,
                remaining: self.totals.remaining_qty_litres,
            });
        }
        Ok(())
    }
}

pub struct PfiLedger {
    store: Arc<Store>,
    locks: DashMap<PfiId, Arc<Mutex<()>>>,
    paging: PagingSettings,
}

impl PfiLedger {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
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

    /// Open a PFI. Only one PFI may be active per location and product.
    #[instrument(skip(self, actor), fields(actor = %actor))]
    pub fn create(&self, new_pfi: NewPfi, actor: &Actor) -> Result<Pfi> {
        let pfi = new_pfi.validate_and_finalise(actor)?;
        let pair = Pfi::pair_key(&pfi.location_id, &pfi.product_id);

        (&self.store.pfis, &self.store.active_pfis).transaction(|(pfis, active)| {
            if let Some(existing) = active.get(&pair)? {
                let existing = store::id_from(&existing).or_else(store::abort)?;
                return store::abort(Error::ActivePfiExists {
                    location_id: pfi.location_id.clone(),
                    product_id: pfi.product_id.clone(),
                    existing: PfiId::from_bytes(existing),
                });
            }
            store::tx_store(pfis, pfi.id.as_bytes(), &pfi)?;
            active.insert(&pair[..], &pfi.id.as_bytes()[..])?;
            Ok(())
        })?;

        info!(pfi_id = %pfi.id, pfi_number = %pfi.pfi_number, starting = pfi.starting_qty_litres, "PFI created");
        Ok(pfi)
    }

    /// Close a PFI to further orders, whatever capacity it has left.
    #[instrument(skip(self, actor), fields(actor = %actor))]
    pub fn finish(&self, pfi_id: PfiId, actor: &Actor) -> Result<Pfi> {
        actor.validate()?;
        let lock = self.lock_for(pfi_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let pfi = (&self.store.pfis, &self.store.active_pfis).transaction(|(pfis, active)| {
            let Some(mut pfi) = store::tx_load::<Pfi>(pfis, pfi_id.as_bytes())? else {
                return store::abort(Error::NotFound(Entity::Pfi(pfi_id)));
            };
            if !pfi.is_active() {
                return store::abort(Error::PfiNotActive {
                    pfi_id,
                    current_status: pfi.status,
                });
            }
            pfi.status = PfiStatus::Finished;
            pfi.finished_by = Some(actor.user_id.clone());
            pfi.finished_at = Some(TimeStamp::new());

            store::tx_store(pfis, pfi_id.as_bytes(), &pfi)?;
            active.remove(&Pfi::pair_key(&pfi.location_id, &pfi.product_id)[..])?;
            Ok(pfi)
        })?;
        // finished is terminal, later attaches refuse before locking
        self.locks.remove(&pfi_id);

        info!(pfi_id = %pfi_id, "PFI finished");
        Ok(pfi)
    }

    pub fn get(&self, pfi_id: PfiId) -> Result<Pfi> {
        store::load(&self.store.pfis, pfi_id.as_bytes())?.ok_or(Error::NotFound(Entity::Pfi(pfi_id)))
    }

    /// The active PFI for a location and product, if one is open.
    pub fn active_for(&self, location_id: &str, product_id: &str) -> Result<Option<Pfi>> {
        match self.store.active_pfis.get(Pfi::pair_key(location_id, product_id))? {
            Some(id) => Ok(Some(self.get(PfiId::from_bytes(store::id_from(&id)?))?)),
            None => Ok(None),
        }
    }

    /// Live totals over the eligible orders bound to a PFI. Never cached.
    pub fn compute_totals(&self, pfi_id: PfiId) -> Result<PfiTotals> {
        let pfi = self.get(pfi_id)?;
        self.totals_of(&pfi)
    }

    pub fn view(&self, pfi_id: PfiId) -> Result<PfiView> {
        let pfi = self.get(pfi_id)?;
        let totals = self.totals_of(&pfi)?;
        Ok(PfiView { pfi, totals })
    }

    /// PFIs with live totals, newest first.
    #[instrument(skip(self))]
    pub fn list(&self, filter: &PfiFilter, page: PageRequest) -> Result<Page<PfiView>> {
        page.validate(self.paging.max_page_size)?;

        let mut matches = vec![];
        for entry in self.store.pfis.iter().rev() {
            let (_, bytes) = entry?;
            let pfi: Pfi = store::decode(&bytes)?;
            if filter.matches(&pfi) {
                matches.push(pfi);
            }
        }

        let page = Page::from_matches(matches, page);
        let mut items = Vec::with_capacity(page.items.len());
        for pfi in page.items {
            let totals = self.totals_of(&pfi)?;
            items.push(PfiView { pfi, totals });
        }
        debug!(count = page.count, "PFI list");

        Ok(Page {
            count: page.count,
            page: page.page,
            page_size: page.page_size,
            items,
        })
    }

    /// Run `commit` while holding the PFI's mutex, given a fresh snapshot of an active PFI.
    pub(crate) fn attach<T>(
        &self,
        pfi_id: PfiId,
        commit: impl FnOnce(&PfiSnapshot) -> Result<T>,
    ) -> Result<T> {
        self.get(pfi_id).and_then(|pfi| ensure_active(&pfi))?;
        let lock = self.lock_for(pfi_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        // finish may have won the lock
        let pfi = self.get(pfi_id)?;
        ensure_active(&pfi)?;
        let totals = self.totals_of(&pfi)?;
        debug!(pfi_id = %pfi_id, remaining = totals.remaining_qty_litres, "PFI locked for attach");

        commit(&PfiSnapshot { pfi, totals })
    }

    // re-read inside the committing transaction
    pub(crate) fn tx_ensure_active(pfis: &TransactionalTree, pfi_id: PfiId) -> TxResult<Pfi> {
        let Some(pfi) = store::tx_load::<Pfi>(pfis, pfi_id.as_bytes())? else {
            return store::abort(Error::NotFound(Entity::Pfi(pfi_id)));
        };
        if !pfi.is_active() {
            return store::abort(Error::PfiNotActive {
                pfi_id,
                current_status: pfi.status,
            });
        }
        Ok(pfi)
    }

    pub(crate) fn tx_bind(
        pfi_orders: &TransactionalTree,
        pfi_id: PfiId,
        order_id: OrderId,
    ) -> TxResult<()> {
        pfi_orders.insert(
            store::compound_key(pfi_id.as_bytes(), order_id.as_bytes()),
            Vec::new(),
        )?;
        Ok(())
    }

    fn totals_of(&self, pfi: &Pfi) -> Result<PfiTotals> {
        let mut orders: Vec<Order> = vec![];
        for entry in self.store.pfi_orders.scan_prefix(pfi.id.as_bytes()) {
            let (key, _) = entry?;
            let Some(order_id) = store::trailing_id(&key) else {
                continue;
            };
            if let Some(order) = store::load(&self.store.orders, &order_id)? {
                orders.push(order);
            }
        }
        Ok(PfiTotals::compute(pfi, &orders))
    }

    fn lock_for(&self, pfi_id: PfiId) -> Arc<Mutex<()>> {
        Arc::clone(&*self.locks.entry(pfi_id).or_default())
    }
}

fn ensure_active(pfi: &Pfi) -> Result<()> {
    if !pfi.is_active() {
        warn!(pfi_id = %pfi.id, "attach to finished PFI refused");
        return Err(Error::PfiNotActive {
            pfi_id: pfi.id,
            current_status: pfi.status,
        });
    }
    Ok(())
}
