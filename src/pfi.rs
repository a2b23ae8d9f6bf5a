//! Proforma invoice records and their live totals
use super::error::ValidationError;
use super::order::Order;
use super::types::{Actor, PfiId, TimeStamp};
use chrono::Utc;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PfiStatus {
    #[n(0)]
    Active,
    #[n(1)]
    Finished,
}

impl fmt::Display for PfiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PfiStatus::Active => f.write_str("active"),
            PfiStatus::Finished => f.write_str("finished"),
        }
    }
}

// Sold and remaining litres are never stored; see `PfiTotals`.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Pfi {
    #[n(0)]
    pub id: PfiId,
    #[n(1)]
    pub pfi_number: String,
    #[n(2)]
    pub location_id: String,
    #[n(3)]
    pub product_id: String,
    #[n(4)]
    pub starting_qty_litres: u64,
    #[n(5)]
    pub status: PfiStatus,
    #[n(6)]
    pub created_by: String,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub finished_by: Option<String>,
    #[n(9)]
    pub finished_at: Option<TimeStamp<Utc>>,
}

impl Pfi {
    pub fn is_active(&self) -> bool {
        self.status == PfiStatus::Active
    }
    /// Whether an order's litres may be drawn from this PFI at all.
    pub fn serves(&self, order: &Order) -> bool {
        order.location_id == self.location_id && order.product_id() == Some(self.product_id.as_str())
    }
    // key of the active-pair uniqueness index
    pub(crate) fn pair_key(location_id: &str, product_id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(location_id.len() + product_id.len() + 1);
        key.extend_from_slice(location_id.as_bytes());
        key.push(0x1f);
        key.extend_from_slice(product_id.as_bytes());
        key
    }
}

/// Aggregates over the released and truck-exited orders attached to a PFI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PfiTotals {
    pub orders_count: u64,
    pub sold_qty_litres: u64,
    pub remaining_qty_litres: u64,
    pub total_amount: u64,
}

impl PfiTotals {
    pub fn compute<'a>(pfi: &Pfi, orders: impl IntoIterator<Item = &'a Order>) -> Self {
        let mut totals = PfiTotals::default();
        for order in orders {
            if order.pfi_id != Some(pfi.id) || !order.status.is_eligible() {
                continue;
            }
            totals.orders_count += 1;
            totals.sold_qty_litres = totals.sold_qty_litres.saturating_add(order.quantity);
            totals.total_amount = totals.total_amount.saturating_add(order.total_price);
        }
        totals.remaining_qty_litres = pfi.starting_qty_litres.saturating_sub(totals.sold_qty_litres);
        totals
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PfiView {
    pub pfi: Pfi,
    pub totals: PfiTotals,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPfi {
    pub pfi_number: String,
    pub location_id: String,
    pub product_id: String,
    pub starting_qty_litres: u64,
}

impl NewPfi {
    pub fn new(
        pfi_number: impl Into<String>,
        location_id: impl Into<String>,
        product_id: impl Into<String>,
        starting_qty_litres: u64,
    ) -> Self {
        Self {
            pfi_number: pfi_number.into(),
            location_id: location_id.into(),
            product_id: product_id.into(),
            starting_qty_litres,
        }
    }

    pub(crate) fn validate_and_finalise(self, actor: &Actor) -> Result<Pfi, ValidationError> {
        actor.validate()?;
        if self.pfi_number.trim().is_empty() {
            return Err(ValidationError::MissingField("pfi_number"));
        }
        if self.location_id.trim().is_empty() {
            return Err(ValidationError::MissingField("location_id"));
        }
        if self.product_id.trim().is_empty() {
            return Err(ValidationError::MissingField("product_id"));
        }
        if self.starting_qty_litres == 0 {
            return Err(ValidationError::ZeroStartingQuantity);
        }

        Ok(Pfi {
            id: PfiId::new(),
            pfi_number: self.pfi_number,
            location_id: self.location_id,
            product_id: self.product_id,
            starting_qty_litres: self.starting_qty_litres,
            status: PfiStatus::Active,
            created_by: actor.user_id.clone(),
            created_at: TimeStamp::new(),
            finished_by: None,
            finished_at: None,
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PfiFilter {
    pub location_id: Option<String>,
    pub product_id: Option<String>,
    pub status: Option<PfiStatus>,
}

impl PfiFilter {
    pub fn matches(&self, pfi: &Pfi) -> bool {
        self.location_id
            .as_ref()
            .is_none_or(|location| &pfi.location_id == location)
            && self
                .product_id
                .as_ref()
                .is_none_or(|product| &pfi.product_id == product)
            && self.status.is_none_or(|status| pfi.status == status)
    }
}
