pub mod audit;
pub mod bank;
pub mod config;
pub mod console;
pub mod error;
pub mod ledger;
pub mod order;
pub mod page;
pub mod pfi;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod utils;

pub use console::FuelOps;
pub use error::{Error, Result, ValidationError};
