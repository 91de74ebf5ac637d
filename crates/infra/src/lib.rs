//! Infrastructure layer: transactional storage, the stock ledger and the
//! request lifecycle built on top of it.

pub mod config;
pub mod ledger;
pub mod lifecycle;
pub mod movements;
pub mod reservations;
pub mod service;
pub mod storage;
pub mod transaction;


pub use config::{LedgerConfig, RetryPolicy};
pub use lifecycle::{NewRequest, NewRequestItem, RequestFilter};
pub use movements::MovementQuery;
pub use service::FulfillmentService;
pub use storage::{InMemoryLedgerStore, LedgerStore};
pub use transaction::TransactionCoordinator;
