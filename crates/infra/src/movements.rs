//! Movement log: recording and querying the append-only audit trail.
//!
//! Recording goes through the stock ledger so the counter change and its
//! movement always land in the same transaction.

use serde::{Deserialize, Serialize};

use pickledger_core::{Actor, DomainResult, ProductId, RequestId};
use pickledger_inventory::{Movement, MovementFilter};

use crate::ledger;
use crate::storage::LedgerTx;

/// Movement query as issued by callers: the structural filter plus an optional
/// SKU, resolved against the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementQuery {
    pub sku: Option<String>,
    #[serde(flatten)]
    pub filter: MovementFilter,
}

/// Restock `qty` units and record the `entrada`.
pub fn record_entrada<T>(tx: &mut T, product_id: ProductId, qty: i64, actor: &Actor) -> DomainResult<Movement>
where
    T: LedgerTx + ?Sized,
{
    ledger::apply_entrada(tx, product_id, qty, actor)
}

/// Withdraw `qty` unreserved units and record the `saida`.
pub fn record_saida<T>(
    tx: &mut T,
    product_id: ProductId,
    qty: i64,
    request_id: Option<RequestId>,
    actor: &Actor,
) -> DomainResult<Movement>
where
    T: LedgerTx + ?Sized,
{
    ledger::apply_saida(tx, product_id, qty, request_id, actor)
}

/// Movements matching `query`, newest first.
///
/// "Newest" is commit order, not `created_at`: a transaction stamps its rows
/// when it begins and may commit after a rival that began later. A SKU that
/// names no product matches nothing.
pub fn query<T>(tx: &T, query: &MovementQuery) -> DomainResult<Vec<Movement>>
where
    T: LedgerTx + ?Sized,
{
    let mut filter = query.filter.clone();
    if let Some(sku) = query.sku.as_deref() {
        match tx.product_by_sku(sku.trim())? {
            Some(product) if filter.product_id.is_none_or(|id| id == product.id) => {
                filter.product_id = Some(product.id);
            }
            _ => return Ok(Vec::new()),
        }
    }

    Ok(tx
        .movements()?
        .into_iter()
        .rev()
        .filter(|m| filter.matches(m))
        .collect())
}

/// Full audit trail of one product, newest first.
pub fn history_for_product<T>(tx: &T, product_id: ProductId) -> DomainResult<Vec<Movement>>
where
    T: LedgerTx + ?Sized,
{
    ledger::require_product(tx, product_id)?;
    query(
        tx,
        &MovementQuery {
            filter: MovementFilter {
                product_id: Some(product_id),
                ..MovementFilter::default()
            },
            ..MovementQuery::default()
        },
    )
}
