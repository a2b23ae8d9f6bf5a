//! Append-only audit trail of order transitions.
//!
//! Events are written by [`crate::service::OrderService`] inside the same sled
//! transaction as the transition they record, so a committed transition always
//! has exactly one event and an aborted one has none. Each event is stored as
//! CBOR keyed by its time-ordered id; a per-order index keeps the sha256 digest
//! of the encoding taken at commit time so a trail can be checked later.
use super::error::Result;
use super::order::{Order, OrderSummary};
use super::config::PagingSettings;
use super::page::{Page, PageRequest};
use super::store::{self, Store, TxResult};
use super::types::{Actor, AuditEventId, OrderId, PfiId, TimeStamp};
use chrono::{NaiveDate, Utc};
use sled::transaction::TransactionalTree;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    #[n(0)]
    PaymentConfirmation,
    #[n(1)]
    Release,
    #[n(2)]
    TruckExit,
    #[n(3)]
    Cancel,
    #[n(4)]
    PfiAssignment,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuditAction::PaymentConfirmation => "payment_confirmation",
            AuditAction::Release => "release",
            AuditAction::TruckExit => "truck_exit",
            AuditAction::Cancel => "cancel",
            AuditAction::PfiAssignment => "pfi_assignment",
        })
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    #[n(0)]
    pub id: AuditEventId,
    #[n(1)]
    pub order_id: OrderId,
    #[n(2)]
    pub action: AuditAction,
    #[n(3)]
    pub actor: Actor,
    #[n(4)]
    pub timestamp: TimeStamp<Utc>,
    #[n(5)]
    pub narration: Option<String>, // e.g. part-payment note
    #[n(6)]
    pub pfi_id: Option<PfiId>,
}

impl AuditEvent {
    pub fn new(order_id: OrderId, action: AuditAction, actor: &Actor) -> Self {
        Self {
            id: AuditEventId::new(),
            order_id,
            action,
            actor: actor.clone(),
            timestamp: TimeStamp::new(),
            narration: None,
            pfi_id: None,
        }
    }
    pub fn with_narration(mut self, narration: Option<String>) -> Self {
        self.narration = narration;
        self
    }
    pub fn with_pfi(mut self, pfi_id: Option<PfiId>) -> Self {
        self.pfi_id = pfi_id;
        self
    }
    /// Encoded event and the hex sha256 digest of that encoding.
    pub fn build(&self) -> Result<(String, Vec<u8>)> {
        let cbor = store::encode(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

/// Query filters. Dates are inclusive and compared in UTC.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuditFilter {
    pub actor_email: Option<String>,
    pub action: Option<AuditAction>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub location_id: Option<String>,
}

impl AuditFilter {
    fn matches_event(&self, event: &AuditEvent) -> bool {
        let date = event.timestamp.date();
        self.actor_email
            .as_ref()
            .is_none_or(|email| event.actor.email.eq_ignore_ascii_case(email))
            && self.action.is_none_or(|action| event.action == action)
            && self.from.is_none_or(|from| date >= from)
            && self.to.is_none_or(|to| date <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub event: AuditEvent,
    pub order: OrderSummary,
}

pub struct AuditLog {
    store: Arc<Store>,
    paging: PagingSettings,
}

impl AuditLog {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
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

    pub(crate) fn append(
        audit: &TransactionalTree,
        audit_by_order: &TransactionalTree,
        event: &AuditEvent,
    ) -> TxResult<()> {
        let (digest, cbor) = event.build().or_else(store::abort)?;
        audit.insert(&event.id.as_bytes()[..], cbor)?;
        audit_by_order.insert(
            store::compound_key(event.order_id.as_bytes(), event.id.as_bytes()),
            digest.into_bytes(),
        )?;
        Ok(())
    }

    /// Every event recorded for an order, oldest first.
    pub fn trail(&self, order_id: OrderId) -> Result<Vec<AuditEvent>> {
        let mut events: Vec<AuditEvent> = vec![];
        for entry in self.store.audit_by_order.scan_prefix(order_id.as_bytes()) {
            let (key, _) = entry?;
            let Some(event_id) = store::trailing_id(&key) else {
                continue;
            };
            if let Some(event) = store::load(&self.store.audit, &event_id)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Recompute each event digest of an order's trail against the one taken at commit.
    pub fn verify_trail(&self, order_id: OrderId) -> Result<bool> {
        for entry in self.store.audit_by_order.scan_prefix(order_id.as_bytes()) {
            let (key, digest) = entry?;
            let Some(event_id) = store::trailing_id(&key) else {
                return Ok(false);
            };
            let Some(bytes) = self.store.audit.get(event_id)? else {
                warn!(order_id = %order_id, "audit index points at a missing event");
                return Ok(false);
            };
            if sha256::digest(&bytes.to_vec()).as_bytes() != &digest[..] {
                warn!(order_id = %order_id, "audit event digest mismatch");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Events joined with their order, newest first.
    #[instrument(skip(self))]
    pub fn query(&self, filter: &AuditFilter, page: PageRequest) -> Result<Page<AuditEntry>> {
        page.validate(self.paging.max_page_size)?;

        let mut orders: HashMap<OrderId, Option<OrderSummary>> = HashMap::new();
        let mut matches = vec![];
        for entry in self.store.audit.iter().rev() {
            let (_, bytes) = entry?;
            let event: AuditEvent = store::decode(&bytes)?;
            if !filter.matches_event(&event) {
                continue;
            }

            let summary = match orders.get(&event.order_id) {
                Some(summary) => summary.clone(),
                None => {
                    let order: Option<Order> =
                        store::load(&self.store.orders, event.order_id.as_bytes())?;
                    let summary = order.map(|order| order.summary());
                    orders.insert(event.order_id, summary.clone());
                    summary
                }
            };
            let Some(order) = summary else {
                warn!(event_id = %event.id, order_id = %event.order_id, "audit event for unknown order");
                continue;
            };
            if filter
                .location_id
                .as_ref()
                .is_some_and(|location| &order.location_id != location)
            {
                continue;
            }
            matches.push(AuditEntry { event, order });
        }

        debug!(count = matches.len(), "audit query");
        Ok(Page::from_matches(matches, page))
    }
}
