//! Fulfillment service: the operation surface exposed to the transport layer.
//!
//! Each method is one unit of work run through the
//! [`TransactionCoordinator`], retried only on transient storage failures.
//! Reads run in a transaction too, so they never observe a half-applied write.

use std::sync::Arc;

use tracing::instrument;

use pickledger_core::{Actor, DomainError, DomainResult, ProductId, Quantity, RequestId, ReservationId};
use pickledger_inventory::{Movement, Product, RequestStatus, Reservation, StockBalance};

use crate::config::LedgerConfig;
use crate::lifecycle::{self, CreatedRequest, NewRequest, RequestDetail, RequestFilter, RequestSummary, TransitionOutcome};
use crate::movements::{self, MovementQuery};
use crate::storage::{Catalog, InMemoryLedgerStore, LedgerStore};
use crate::transaction::TransactionCoordinator;
use crate::{ledger, reservations};

pub struct FulfillmentService<S: LedgerStore> {
    coordinator: TransactionCoordinator<S>,
    default_actor: Actor,
}

impl<S: LedgerStore> Clone for FulfillmentService<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            default_actor: self.default_actor.clone(),
        }
    }
}

impl FulfillmentService<InMemoryLedgerStore> {
    /// Service over a fresh in-memory store configured from `config`.
    pub fn in_memory(config: &LedgerConfig) -> Self {
        let store = InMemoryLedgerStore::with_lock_timeout(config.lock_timeout());
        Self::new(Arc::new(store), config)
    }
}

impl<S: LedgerStore> FulfillmentService<S> {
    pub fn new(store: Arc<S>, config: &LedgerConfig) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(store, config.retry),
            default_actor: config.default_actor(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        self.coordinator.store()
    }

    fn actor(&self, name: Option<&str>) -> Actor {
        match name.map(str::trim) {
            Some(name) if !name.is_empty() => Actor::new(name),
            _ => self.default_actor.clone(),
        }
    }

    // Stock

    pub fn balance(&self, product_id: ProductId) -> DomainResult<StockBalance> {
        self.coordinator
            .run_with_retry("balance", |tx| ledger::get_balance(tx, product_id))
    }

    pub fn list_balances(&self) -> DomainResult<Vec<(Product, StockBalance)>> {
        self.coordinator.run_with_retry("list_balances", |tx| ledger::list_balances(tx))
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    pub fn init_stock(&self, product_id: ProductId, initial: i64, actor: Option<&str>) -> DomainResult<StockBalance> {
        let actor = self.actor(actor);
        self.coordinator
            .run_with_retry("init_stock", |tx| ledger::init_stock(tx, product_id, initial, &actor))
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    pub fn restock(&self, product_id: ProductId, qty: i64, actor: Option<&str>) -> DomainResult<Movement> {
        let actor = self.actor(actor);
        self.coordinator
            .run_with_retry("restock", |tx| movements::record_entrada(tx, product_id, qty, &actor))
    }

    #[instrument(skip(self))]
    pub fn restock_by_sku(&self, sku: &str, qty: i64, actor: Option<&str>) -> DomainResult<Movement> {
        let actor = self.actor(actor);
        let sku = sku.trim();
        self.coordinator.run_with_retry("restock_by_sku", |tx| {
            let product = tx
                .product_by_sku(sku)?
                .ok_or_else(|| DomainError::not_found(format!("product with SKU '{sku}'")))?;
            movements::record_entrada(tx, product.id, qty, &actor)
        })
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    pub fn withdraw(
        &self,
        product_id: ProductId,
        qty: i64,
        request_id: Option<RequestId>,
        actor: Option<&str>,
    ) -> DomainResult<Movement> {
        let actor = self.actor(actor);
        self.coordinator.run_with_retry("withdraw", |tx| {
            movements::record_saida(tx, product_id, qty, request_id, &actor)
        })
    }

    // Requests

    #[instrument(skip(self, input), fields(consultant = %input.consultant_code))]
    pub fn create_request(&self, input: &NewRequest) -> DomainResult<CreatedRequest> {
        self.coordinator
            .run_with_retry("create_request", |tx| lifecycle::create_request(tx, input))
    }

    #[instrument(skip(self), fields(request_id = %request_id))]
    pub fn transition(&self, request_id: RequestId, to: &str, actor: Option<&str>) -> DomainResult<TransitionOutcome> {
        let actor = self.actor(actor);
        self.coordinator.run_with_retry("transition", |tx| {
            lifecycle::transition_named(tx, request_id, to, &actor)
        })
    }

    pub fn start_picking(&self, request_id: RequestId, actor: Option<&str>) -> DomainResult<TransitionOutcome> {
        self.transition_to(request_id, RequestStatus::Separacao, actor)
    }

    pub fn complete(&self, request_id: RequestId, actor: Option<&str>) -> DomainResult<TransitionOutcome> {
        self.transition_to(request_id, RequestStatus::Concluida, actor)
    }

    pub fn cancel(&self, request_id: RequestId, actor: Option<&str>) -> DomainResult<TransitionOutcome> {
        self.transition_to(request_id, RequestStatus::Cancelada, actor)
    }

    #[instrument(skip(self), fields(request_id = %request_id, to = %to))]
    fn transition_to(&self, request_id: RequestId, to: RequestStatus, actor: Option<&str>) -> DomainResult<TransitionOutcome> {
        let actor = self.actor(actor);
        self.coordinator
            .run_with_retry("transition", |tx| lifecycle::transition(tx, request_id, to, &actor))
    }

    pub fn get_request(&self, request_id: RequestId) -> DomainResult<RequestDetail> {
        self.coordinator
            .run_with_retry("get_request", |tx| lifecycle::get_request(tx, request_id))
    }

    pub fn list_requests(&self, filter: &RequestFilter) -> DomainResult<Vec<RequestSummary>> {
        self.coordinator
            .run_with_retry("list_requests", |tx| lifecycle::list_requests(tx, filter))
    }

    // Reservations and movements

    /// Hold `qty` more units of a product for a request still in `aberta`.
    #[instrument(skip(self), fields(request_id = %request_id, product_id = %product_id))]
    pub fn add_hold(&self, request_id: RequestId, product_id: ProductId, qty: i64) -> DomainResult<Reservation> {
        let qty = Quantity::new(qty)?;
        self.coordinator.run_with_retry("add_hold", |tx| {
            reservations::add_to_request(tx, request_id, product_id, qty)
        })
    }

    #[instrument(skip(self), fields(reservation_id = %reservation_id))]
    pub fn release_reservation(&self, reservation_id: ReservationId) -> DomainResult<Reservation> {
        self.coordinator.run_with_retry("release_reservation", |tx| {
            reservations::release_reservation(tx, reservation_id)
        })
    }

    pub fn reservations_for_request(&self, request_id: RequestId) -> DomainResult<Vec<Reservation>> {
        self.coordinator.run_with_retry("reservations_for_request", |tx| {
            reservations::reservations_for_request(tx, request_id)
        })
    }

    pub fn list_reservations(&self, product_id: Option<ProductId>) -> DomainResult<Vec<Reservation>> {
        self.coordinator
            .run_with_retry("list_reservations", |tx| reservations::list_reservations(tx, product_id))
    }

    pub fn movements(&self, query: &MovementQuery) -> DomainResult<Vec<Movement>> {
        self.coordinator
            .run_with_retry("movements", |tx| movements::query(tx, query))
    }

    pub fn product_history(&self, product_id: ProductId) -> DomainResult<Vec<Movement>> {
        self.coordinator
            .run_with_retry("product_history", |tx| movements::history_for_product(tx, product_id))
    }
}
