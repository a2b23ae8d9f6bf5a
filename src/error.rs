use super::order::OrderStatus;
use super::pfi::PfiStatus;
use super::types::{BankAccountId, OrderId, PfiId};
use std::fmt;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The record a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Order(OrderId),
    Pfi(PfiId),
    BankAccount(BankAccountId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Order(id) => write!(f, "order {id}"),
            Entity::Pfi(id) => write!(f, "PFI {id}"),
            Entity::BankAccount(id) => write!(f, "bank account {id}"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(Entity),
    #[error("order {order_id} cannot transition. order status: {current_status}")]
    Conflict {
        order_id: OrderId,
        current_status: OrderStatus,
    },
    #[error("order {order_id} is not yet released for exit. order status: {current_status}")]
    NotReleased {
        order_id: OrderId,
        current_status: OrderStatus,
    },
    #[error("PFI {existing} is already active for location {location_id} product {product_id}")]
    ActivePfiExists {
        location_id: String,
        product_id: String,
        existing: PfiId,
    },
    #[error("PFI {pfi_id} is not active. pfi status: {current_status}")]
    PfiNotActive {
        pfi_id: PfiId,
        current_status: PfiStatus,
    },
    #[error("PFI {pfi_id} capacity exceeded: requested {requested} litres, remaining {remaining} litres")]
    CapacityExceeded {
        pfi_id: PfiId,
        requested: u64,
        remaining: u64,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
}

impl Error {
    /// The order status a caller should reconcile against, if this error carries one.
    pub fn current_order_status(&self) -> Option<OrderStatus> {
        match self {
            Error::Conflict { current_status, .. } | Error::NotReleased { current_status, .. } => {
                Some(*current_status)
            }
            _ => None,
        }
    }
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Conflict { .. }
                | Error::NotReleased { .. }
                | Error::ActivePfiExists { .. }
                | Error::PfiNotActive { .. }
        )
    }
}

impl From<minicbor::decode::Error> for Error {
    fn from(err: minicbor::decode::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl<E: std::error::Error> From<minicbor::encode::Error<E>> for Error {
    fn from(err: minicbor::encode::Error<E>) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<Error>> for Error {
    fn from(err: sled::transaction::TransactionError<Error>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(err) => err,
            sled::transaction::TransactionError::Storage(err) => Error::Storage(err),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("an actor is required")]
    MissingActor,
    #[error("malformed identifier: {0}")]
    MalformedId(String),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("order must contain at least one product line")]
    NoProducts,
    #[error("product {0} has a zero quantity")]
    ZeroQuantity(String),
    #[error("order total price overflowed")]
    PriceOverflow,
    #[error("starting quantity must be greater than zero")]
    ZeroStartingQuantity,
    #[error("compartments hold {compartments} litres but the order is for {ordered} litres")]
    CompartmentMismatch { compartments: u64, ordered: u64 },
    #[error("compartment litres overflowed")]
    CompartmentOverflow,
    #[error("order {order_id} does not match PFI {pfi_id} location/product")]
    PfiMismatch { order_id: OrderId, pfi_id: PfiId },
    #[error("bank account {0} is inactive")]
    InactiveBankAccount(BankAccountId),
    #[error("bank account {account} does not serve location {location_id}")]
    BankAccountLocation {
        account: BankAccountId,
        location_id: String,
    },
    #[error("no orders given")]
    EmptyBatch,
    #[error("page must be at least 1 and page size between 1 and {max}")]
    Page { max: u32 },
}
