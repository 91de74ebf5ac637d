//! Stock ledger: the only code that mutates stock counters.
//!
//! Every function takes the caller's open transaction and never commits. Each
//! counter change goes through a locking read of the product's stock row, a
//! checked mutation on [`StockRecord`], and a write-back. Changes to `on_hand`
//! append their movement in the same transaction.

use tracing::{debug, instrument};

use pickledger_core::{Actor, DomainError, DomainResult, ProductId, Quantity, RequestId};
use pickledger_inventory::{Movement, Product, StockBalance, StockRecord};

use crate::storage::LedgerTx;

/// Load a catalog product or fail with `NotFound`.
pub fn require_product<T>(tx: &T, product_id: ProductId) -> DomainResult<Product>
where
    T: LedgerTx + ?Sized,
{
    tx.product(product_id)?
        .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))
}

/// Current counters of a product. A product with no record reads as all zeros.
pub fn get_balance<T>(tx: &T, product_id: ProductId) -> DomainResult<StockBalance>
where
    T: LedgerTx + ?Sized,
{
    require_product(tx, product_id)?;
    Ok(tx
        .stock_record(product_id)?
        .map(|r| r.balance())
        .unwrap_or_else(|| StockBalance::zero(product_id)))
}

/// Balances of every catalog product, ordered by SKU.
pub fn list_balances<T>(tx: &T) -> DomainResult<Vec<(Product, StockBalance)>>
where
    T: LedgerTx + ?Sized,
{
    tx.products()?
        .into_iter()
        .map(|product| {
            let balance = tx
                .stock_record(product.id)?
                .map(|r| r.balance())
                .unwrap_or_else(|| StockBalance::zero(product.id));
            Ok((product, balance))
        })
        .collect()
}

/// Lock the product's stock row, creating a zeroed record if none exists.
///
/// Idempotent: concurrent callers serialize on the row lock, and whoever comes
/// second finds the record the first one created.
#[instrument(skip(tx), fields(product_id = %product_id))]
pub fn ensure_record<T>(tx: &mut T, product_id: ProductId) -> DomainResult<StockRecord>
where
    T: LedgerTx + ?Sized,
{
    require_product(tx, product_id)?;
    if let Some(record) = tx.lock_stock_record(product_id)? {
        return Ok(record);
    }
    let record = StockRecord::empty(product_id, tx.now());
    tx.put_stock_record(record.clone())?;
    debug!("stock record created");
    Ok(record)
}

/// Open a product's stock with an initial on-hand quantity.
///
/// Fails with `Conflict` when the product already has a record. A positive
/// opening quantity is documented as one `entrada`.
#[instrument(skip(tx, actor), fields(product_id = %product_id))]
pub fn init_stock<T>(tx: &mut T, product_id: ProductId, initial: i64, actor: &Actor) -> DomainResult<StockBalance>
where
    T: LedgerTx + ?Sized,
{
    require_product(tx, product_id)?;
    if tx.lock_stock_record(product_id)?.is_some() {
        return Err(DomainError::conflict(format!(
            "stock for product {product_id} is already initialized"
        )));
    }
    let now = tx.now();
    let record = StockRecord::with_on_hand(product_id, initial, now)?;
    let balance = record.balance();
    tx.put_stock_record(record)?;
    if initial > 0 {
        let qty = Quantity::new(initial)?;
        tx.append_movement(Movement::entrada(product_id, qty, actor.clone(), now))?;
    }
    Ok(balance)
}

/// Inbound restock: `on_hand += qty`, plus an `entrada` movement.
#[instrument(skip(tx, actor), fields(product_id = %product_id))]
pub fn apply_entrada<T>(tx: &mut T, product_id: ProductId, qty: i64, actor: &Actor) -> DomainResult<Movement>
where
    T: LedgerTx + ?Sized,
{
    let qty = Quantity::new(qty)?;
    let mut record = ensure_record(tx, product_id)?;
    let now = tx.now();
    record.receive(qty, now)?;
    tx.put_stock_record(record)?;

    let movement = Movement::entrada(product_id, qty, actor.clone(), now);
    tx.append_movement(movement.clone())?;
    Ok(movement)
}

/// Outbound movement of unreserved units: `on_hand -= qty`, plus a `saida`.
///
/// A product that has never been stocked fails with `InsufficientStock`.
#[instrument(skip(tx, actor), fields(product_id = %product_id))]
pub fn apply_saida<T>(
    tx: &mut T,
    product_id: ProductId,
    qty: i64,
    request_id: Option<RequestId>,
    actor: &Actor,
) -> DomainResult<Movement>
where
    T: LedgerTx + ?Sized,
{
    let qty = Quantity::new(qty)?;
    require_product(tx, product_id)?;
    let mut record = tx
        .lock_stock_record(product_id)?
        .ok_or(DomainError::InsufficientStock {
            product_id,
            requested: qty.get(),
            on_hand: 0,
        })?;
    let now = tx.now();
    record.withdraw(qty, now)?;
    tx.put_stock_record(record)?;

    let movement = Movement::saida(product_id, qty, request_id, actor.clone(), now);
    tx.append_movement(movement.clone())?;
    Ok(movement)
}

/// Place a hold: `reserved += qty`. No movement; `on_hand` is untouched.
#[instrument(skip(tx), fields(product_id = %product_id))]
pub fn apply_reserve<T>(tx: &mut T, product_id: ProductId, qty: Quantity) -> DomainResult<StockBalance>
where
    T: LedgerTx + ?Sized,
{
    let mut record = ensure_record(tx, product_id)?;
    record.reserve(qty, tx.now())?;
    let balance = record.balance();
    tx.put_stock_record(record)?;
    Ok(balance)
}

/// Drop a hold: `reserved -= qty`. Never clamps; releasing more than is
/// reserved is an invariant violation.
#[instrument(skip(tx), fields(product_id = %product_id))]
pub fn apply_release<T>(tx: &mut T, product_id: ProductId, qty: Quantity) -> DomainResult<StockBalance>
where
    T: LedgerTx + ?Sized,
{
    let mut record = tx.lock_stock_record(product_id)?.ok_or_else(|| {
        DomainError::invariant(format!("release of {qty} for product {product_id} with no stock record"))
    })?;
    record.release(qty, tx.now())?;
    let balance = record.balance();
    tx.put_stock_record(record)?;
    Ok(balance)
}

/// Ship held units: `on_hand -= qty` and `reserved -= qty` in one write, plus
/// a `saida` attributed to the request.
#[instrument(skip(tx, actor), fields(product_id = %product_id, request_id = %request_id))]
pub fn apply_consume<T>(
    tx: &mut T,
    product_id: ProductId,
    qty: Quantity,
    request_id: RequestId,
    actor: &Actor,
) -> DomainResult<Movement>
where
    T: LedgerTx + ?Sized,
{
    let mut record = tx
        .lock_stock_record(product_id)?
        .ok_or(DomainError::InsufficientStock {
            product_id,
            requested: qty.get(),
            on_hand: 0,
        })?;
    let now = tx.now();
    record.consume_reserved(qty, now)?;
    tx.put_stock_record(record)?;

    let movement = Movement::saida(product_id, qty, Some(request_id), actor.clone(), now);
    tx.append_movement(movement.clone())?;
    Ok(movement)
}
