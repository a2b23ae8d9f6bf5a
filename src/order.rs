//! Order records and the intake builder
use super::error::ValidationError;
use super::types::{Actor, BankAccountId, OrderId, PfiId, TimeStamp};
use super::utils;
use chrono::Utc;
use std::fmt;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Paid,
    #[n(2)]
    Released,
    #[n(3)]
    TruckExited,
    #[n(4)]
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Released => "released",
            Self::TruckExited => "truck_exited",
            Self::Canceled => "canceled",
        }
    }
    /// Orders whose litres count against a PFI.
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Released | Self::TruckExited)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ProductLine {
    #[n(0)]
    pub product_id: String,
    #[n(1)]
    pub quantity_litres: u64,
    #[n(2)]
    pub unit_price: u64, // minor currency units per litre
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Compartment {
    #[n(0)]
    pub label: String,
    #[n(1)]
    pub quantity_litres: u64,
}

/// Loading details captured when an order is released.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ReleaseDetails {
    #[n(0)]
    pub truck_number: String,
    #[n(1)]
    pub driver_name: String,
    #[n(2)]
    pub driver_phone: String,
    #[n(3)]
    pub loading_datetime: TimeStamp<Utc>,
    #[n(4)]
    pub compartments: Vec<Compartment>,
    #[n(5)]
    pub pfi_reference: Option<String>,
    #[n(6)]
    pub delivery_address: Option<String>,
}

impl ReleaseDetails {
    pub fn new(
        truck_number: impl Into<String>,
        driver_name: impl Into<String>,
        driver_phone: impl Into<String>,
        loading_datetime: TimeStamp<Utc>,
    ) -> Self {
        Self {
            truck_number: truck_number.into(),
            driver_name: driver_name.into(),
            driver_phone: driver_phone.into(),
            loading_datetime,
            compartments: vec![],
            pfi_reference: None,
            delivery_address: None,
        }
    }
    pub fn add_compartment(mut self, label: impl Into<String>, quantity_litres: u64) -> Self {
        self.compartments.push(Compartment {
            label: label.into(),
            quantity_litres,
        });
        self
    }
    pub fn set_delivery_address(mut self, address: impl Into<String>) -> Self {
        self.delivery_address = Some(address.into());
        self
    }
    pub fn set_pfi_reference(mut self, reference: impl Into<String>) -> Self {
        self.pfi_reference = Some(reference.into());
        self
    }

    /// Field checks that need no stored state.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.truck_number.trim().is_empty() {
            return Err(ValidationError::MissingField("truck_number"));
        }
        if self.driver_name.trim().is_empty() {
            return Err(ValidationError::MissingField("driver_name"));
        }
        if self.driver_phone.trim().is_empty() {
            return Err(ValidationError::MissingField("driver_phone"));
        }
        if let Some(empty) = self.compartments.iter().find(|c| c.quantity_litres == 0) {
            return Err(ValidationError::ZeroQuantity(empty.label.clone()));
        }
        Ok(())
    }

    // compartments, when given, must account for exactly the ordered litres
    pub(crate) fn validate_against(&self, ordered: u64) -> Result<(), ValidationError> {
        if self.compartments.is_empty() {
            return Ok(());
        }
        let compartments = self
            .compartments
            .iter()
            .try_fold(0u64, |sum, c| sum.checked_add(c.quantity_litres))
            .ok_or(ValidationError::CompartmentOverflow)?;
        if compartments != ordered {
            return Err(ValidationError::CompartmentMismatch {
                compartments,
                ordered,
            });
        }
        Ok(())
    }
}

/// Where a payment was received, copied from the bank account at confirmation time.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PaymentSnapshot {
    #[n(0)]
    pub bank_account_id: BankAccountId,
    #[n(1)]
    pub acct_no: String,
    #[n(2)]
    pub bank_name: String,
    #[n(3)]
    pub account_name: String,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Order {
    #[n(0)]
    pub id: OrderId,
    #[n(1)]
    pub reference: String,
    #[n(2)]
    pub location_id: String,
    #[n(3)]
    pub status: OrderStatus,
    #[n(4)]
    pub quantity: u64, // litres
    #[n(5)]
    pub products: Vec<ProductLine>,
    #[n(6)]
    pub total_price: u64,
    #[n(7)]
    pub release_details: Option<ReleaseDetails>,
    #[n(8)]
    pub pfi_id: Option<PfiId>,
    #[n(9)]
    pub placed_by: String,
    #[n(10)]
    pub payment_user_id: Option<String>,
    #[n(11)]
    pub release_user_id: Option<String>,
    #[n(12)]
    pub truck_exit_user_id: Option<String>,
    #[n(13)]
    pub cancel_user_id: Option<String>,
    #[n(14)]
    pub truck_exited: bool,
    #[n(15)]
    pub payment: Option<PaymentSnapshot>,
    #[n(16)]
    pub payment_narration: Option<String>,
    #[n(17)]
    pub placed_at: TimeStamp<Utc>,
    #[n(18)]
    pub paid_at: Option<TimeStamp<Utc>>,
    #[n(19)]
    pub released_at: Option<TimeStamp<Utc>>,
    #[n(20)]
    pub truck_exited_at: Option<TimeStamp<Utc>>,
    #[n(21)]
    pub canceled_at: Option<TimeStamp<Utc>>,
}

impl Order {
    /// The single product every line shares, if the order is single-product.
    pub fn product_id(&self) -> Option<&str> {
        let first = self.products.first()?.product_id.as_str();
        self.products
            .iter()
            .all(|line| line.product_id == first)
            .then_some(first)
    }
    pub fn summary(&self) -> OrderSummary {
        OrderSummary {
            id: self.id,
            reference: self.reference.clone(),
            location_id: self.location_id.clone(),
            status: self.status,
            quantity: self.quantity,
            total_price: self.total_price,
            pfi_id: self.pfi_id,
        }
    }
}

/// Compact view of an order joined onto audit entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSummary {
    pub id: OrderId,
    pub reference: String,
    pub location_id: String,
    pub status: OrderStatus,
    pub quantity: u64,
    pub total_price: u64,
    pub pfi_id: Option<PfiId>,
}

// Used for constructing orders at intake
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NewOrder {
    location_id: Option<String>,
    products: Vec<ProductLine>,
    pfi_id: Option<PfiId>,
}

impl NewOrder {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_location(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = Some(location_id.into());
        self
    }
    pub fn add_product(
        mut self,
        product_id: impl Into<String>,
        quantity_litres: u64,
        unit_price: u64,
    ) -> Self {
        self.products.push(ProductLine {
            product_id: product_id.into(),
            quantity_litres,
            unit_price,
        });
        self
    }
    pub fn set_pfi(mut self, pfi_id: PfiId) -> Self {
        self.pfi_id = Some(pfi_id);
        self
    }

    // Checks fields and derives quantity and total price. The reference is minted here, once.
    pub(crate) fn validate_and_finalise(self, actor: &Actor) -> Result<Order, ValidationError> {
        actor.validate()?;
        let location_id = match self.location_id {
            Some(location) if !location.trim().is_empty() => location,
            _ => return Err(ValidationError::MissingField("location_id")),
        };
        if self.products.is_empty() {
            return Err(ValidationError::NoProducts);
        }

        let mut quantity: u64 = 0;
        let mut total_price: u64 = 0;
        for line in &self.products {
            if line.product_id.trim().is_empty() {
                return Err(ValidationError::MissingField("product_id"));
            }
            if line.quantity_litres == 0 {
                return Err(ValidationError::ZeroQuantity(line.product_id.clone()));
            }
            let line_total = line
                .quantity_litres
                .checked_mul(line.unit_price)
                .ok_or(ValidationError::PriceOverflow)?;
            total_price = total_price
                .checked_add(line_total)
                .ok_or(ValidationError::PriceOverflow)?;
            quantity = quantity
                .checked_add(line.quantity_litres)
                .ok_or(ValidationError::PriceOverflow)?;
        }

        let id = OrderId::new();
        let placed_at = TimeStamp::new();

        Ok(Order {
            id,
            reference: utils::order_reference(&placed_at, id.as_bytes()),
            location_id,
            status: OrderStatus::Pending,
            quantity,
            products: self.products,
            total_price,
            release_details: None,
            pfi_id: self.pfi_id,
            placed_by: actor.user_id.clone(),
            payment_user_id: None,
            release_user_id: None,
            truck_exit_user_id: None,
            cancel_user_id: None,
            truck_exited: false,
            payment: None,
            payment_narration: None,
            placed_at,
            paid_at: None,
            released_at: None,
            truck_exited_at: None,
            canceled_at: None,
        })
    }
}

/// Filters for listing orders. Unset fields match everything.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub location_id: Option<String>,
    pub pfi_id: Option<PfiId>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.status.is_none_or(|status| order.status == status)
            && self
                .location_id
                .as_ref()
                .is_none_or(|location| &order.location_id == location)
            && self.pfi_id.is_none_or(|pfi| order.pfi_id == Some(pfi))
    }
}
