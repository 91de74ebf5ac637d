//! Transactional storage boundary.
//!
//! All ledger logic is written once against [`LedgerTx`]. A unit of work never
//! sees a "top-level handle": it always runs inside a transaction obtained from
//! a [`LedgerStore`], and whether to commit is decided by the
//! [`crate::transaction::TransactionCoordinator`].

pub mod in_memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use pickledger_core::{ConsultantId, DomainResult, ProductId, RequestId, ReservationId};
use pickledger_inventory::{
    Consultant, Movement, Product, Request, RequestItem, Reservation, StockRecord,
};

pub use in_memory::{InMemoryLedgerStore, InMemoryTx};

/// Read-only view of the external catalog (products and consultants).
pub trait Catalog {
    fn product(&self, id: ProductId) -> DomainResult<Option<Product>>;

    fn product_by_sku(&self, sku: &str) -> DomainResult<Option<Product>>;

    /// Every product, ordered by SKU.
    fn products(&self) -> DomainResult<Vec<Product>>;

    fn consultant(&self, id: ConsultantId) -> DomainResult<Option<Consultant>>;

    fn consultant_by_code(&self, code: &str) -> DomainResult<Option<Consultant>>;
}

/// Operation surface available inside one transaction.
///
/// ## Locking
///
/// Plain reads (`stock_record`, `request`, ...) see the latest committed state
/// plus this transaction's own writes and take no locks.
///
/// Locking reads (`lock_stock_record`, `lock_request`) behave like
/// `SELECT ... FOR UPDATE`: they block until no other transaction holds the
/// row, then keep it until commit or rollback. A transaction must hold the
/// row lock before writing a stock record or a request header. If the lock
/// cannot be acquired in time the call fails with `TransientStorage`.
///
/// The unit of contention is one product's stock record (and one request's
/// header). Transactions touching disjoint rows never wait on each other.
pub trait LedgerTx: Catalog {
    /// Transaction timestamp; every row written by this transaction uses it.
    ///
    /// Taken when the transaction begins. A transaction that waits on a row
    /// lock can commit after a rival that began later, so timestamps do not
    /// order commits; [`LedgerTx::movements`] does.
    fn now(&self) -> DateTime<Utc>;

    fn stock_record(&self, product_id: ProductId) -> DomainResult<Option<StockRecord>>;

    /// Lock the product's stock row (whether or not a record exists yet) and read it.
    fn lock_stock_record(&mut self, product_id: ProductId) -> DomainResult<Option<StockRecord>>;

    /// Insert or replace a stock record. Requires the row lock.
    fn put_stock_record(&mut self, record: StockRecord) -> DomainResult<()>;

    fn insert_reservation(&mut self, reservation: Reservation) -> DomainResult<()>;

    fn delete_reservation(&mut self, id: ReservationId) -> DomainResult<()>;

    fn reservation(&self, id: ReservationId) -> DomainResult<Option<Reservation>>;

    /// Live reservations of one request, in creation order.
    fn reservations_for_request(&self, request_id: RequestId) -> DomainResult<Vec<Reservation>>;

    /// Every live reservation, in creation order.
    fn reservations(&self) -> DomainResult<Vec<Reservation>>;

    /// Append to the audit log. There is no update or delete counterpart.
    fn append_movement(&mut self, movement: Movement) -> DomainResult<()>;

    /// The whole audit log in commit order, followed by this transaction's
    /// own uncommitted rows in append order.
    fn movements(&self) -> DomainResult<Vec<Movement>>;

    /// Insert a new request header; the new row is locked by this transaction.
    fn insert_request(&mut self, request: Request) -> DomainResult<()>;

    fn insert_request_item(&mut self, item: RequestItem) -> DomainResult<()>;

    fn request(&self, id: RequestId) -> DomainResult<Option<Request>>;

    /// Lock the request header row and read it.
    fn lock_request(&mut self, id: RequestId) -> DomainResult<Option<Request>>;

    /// Replace a request header. Requires the row lock; only `status` may differ
    /// from the stored row.
    fn update_request(&mut self, request: Request) -> DomainResult<()>;

    fn requests(&self) -> DomainResult<Vec<Request>>;

    /// Items of one request, ordered by line number.
    fn request_items(&self, request_id: RequestId) -> DomainResult<Vec<RequestItem>>;
}

/// A transaction handle. Dropping it without `commit` rolls back.
pub trait Transaction: LedgerTx {
    /// Make every write of this transaction visible atomically and release its locks.
    fn commit(self) -> DomainResult<()>
    where
        Self: Sized;
}

/// Source of transactions.
pub trait LedgerStore: Send + Sync {
    type Tx: Transaction;

    fn begin(&self) -> DomainResult<Self::Tx>;
}

impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore,
{
    type Tx = S::Tx;

    fn begin(&self) -> DomainResult<Self::Tx> {
        (**self).begin()
    }
}
