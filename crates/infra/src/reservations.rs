//! Reservation manager: creates, releases and consumes holds.
//!
//! Bulk operations visit a request's holds in product-id order so that two
//! transactions touching overlapping products take row locks in the same order.

use tracing::{debug, info, instrument};

use pickledger_core::{Actor, DomainError, DomainResult, ProductId, Quantity, RequestId, ReservationId};
use pickledger_inventory::{Movement, RequestStatus, Reservation};

use crate::ledger;
use crate::storage::LedgerTx;

/// Hold `qty` units of a product for a request.
///
/// Fails with `InsufficientAvailable` when the product cannot cover the hold;
/// the caller's transaction then rolls back any holds placed before it.
#[instrument(skip(tx), fields(request_id = %request_id, product_id = %product_id))]
pub fn create_reservation<T>(
    tx: &mut T,
    request_id: RequestId,
    product_id: ProductId,
    qty: Quantity,
) -> DomainResult<Reservation>
where
    T: LedgerTx + ?Sized,
{
    ledger::apply_reserve(tx, product_id, qty)?;
    let reservation = Reservation::new(request_id, product_id, qty, tx.now());
    tx.insert_reservation(reservation.clone())?;
    Ok(reservation)
}

/// Hold more stock for a request that is still `aberta`.
///
/// Any other status is an `InvalidTransition` from that status; the request
/// row stays locked until the caller commits, so a concurrent transition
/// cannot slip between the status check and the hold.
#[instrument(skip(tx), fields(request_id = %request_id, product_id = %product_id))]
pub fn add_to_request<T>(
    tx: &mut T,
    request_id: RequestId,
    product_id: ProductId,
    qty: Quantity,
) -> DomainResult<Reservation>
where
    T: LedgerTx + ?Sized,
{
    let request = tx
        .lock_request(request_id)?
        .ok_or_else(|| DomainError::not_found(format!("request {request_id}")))?;
    if request.status() != RequestStatus::Aberta {
        return Err(DomainError::invalid_transition(request.status().as_str(), "reserva"));
    }
    let hold = create_reservation(tx, request_id, product_id, qty)?;
    info!(reservation_id = %hold.id, qty = qty.get(), "hold added");
    Ok(hold)
}

/// Release one hold by id and delete it. No movement is written.
///
/// The owning request is locked first, in the same order a transition takes
/// its rows. Holds of a terminal request cannot be released this way.
#[instrument(skip(tx), fields(reservation_id = %reservation_id))]
pub fn release_reservation<T>(tx: &mut T, reservation_id: ReservationId) -> DomainResult<Reservation>
where
    T: LedgerTx + ?Sized,
{
    let not_found = || DomainError::not_found(format!("reservation {reservation_id}"));
    let request_id = tx.reservation(reservation_id)?.ok_or_else(not_found)?.request_id;

    let request = tx
        .lock_request(request_id)?
        .ok_or_else(|| DomainError::invariant(format!("reservation {reservation_id} has no request {request_id}")))?;
    if request.status().is_terminal() {
        return Err(DomainError::invalid_transition(request.status().as_str(), "liberacao"));
    }
    // Re-read under the request lock: a cancellation may have dropped it meanwhile.
    let hold = tx.reservation(reservation_id)?.ok_or_else(not_found)?;

    ledger::apply_release(tx, hold.product_id, hold.quantity)?;
    tx.delete_reservation(hold.id)?;
    info!(request_id = %request_id, qty = hold.quantity.get(), "hold released");
    Ok(hold)
}

/// Release every hold of a request and delete the rows. No movement is written.
///
/// Returns the released holds. A request without holds is a no-op.
#[instrument(skip(tx), fields(request_id = %request_id))]
pub fn release_all_for_request<T>(tx: &mut T, request_id: RequestId) -> DomainResult<Vec<Reservation>>
where
    T: LedgerTx + ?Sized,
{
    let holds = holds_in_lock_order(tx, request_id)?;
    for hold in &holds {
        ledger::apply_release(tx, hold.product_id, hold.quantity)?;
        tx.delete_reservation(hold.id)?;
    }
    debug!(count = holds.len(), "reservations released");
    Ok(holds)
}

/// Ship every hold of a request: each one lowers `on_hand` and `reserved`
/// together, writes a `saida` for the request and is deleted.
#[instrument(skip(tx, actor), fields(request_id = %request_id))]
pub fn consume_all_for_request<T>(tx: &mut T, request_id: RequestId, actor: &Actor) -> DomainResult<Vec<Movement>>
where
    T: LedgerTx + ?Sized,
{
    let holds = holds_in_lock_order(tx, request_id)?;
    let mut movements = Vec::with_capacity(holds.len());
    for hold in &holds {
        movements.push(ledger::apply_consume(tx, hold.product_id, hold.quantity, request_id, actor)?);
        tx.delete_reservation(hold.id)?;
    }
    debug!(count = movements.len(), "reservations consumed");
    Ok(movements)
}

pub fn reservations_for_request<T>(tx: &T, request_id: RequestId) -> DomainResult<Vec<Reservation>>
where
    T: LedgerTx + ?Sized,
{
    tx.reservations_for_request(request_id)
}

/// Every live hold, optionally narrowed to one product.
pub fn list_reservations<T>(tx: &T, product_id: Option<ProductId>) -> DomainResult<Vec<Reservation>>
where
    T: LedgerTx + ?Sized,
{
    let mut holds = tx.reservations()?;
    if let Some(product_id) = product_id {
        holds.retain(|r| r.product_id == product_id);
    }
    Ok(holds)
}

fn holds_in_lock_order<T>(tx: &T, request_id: RequestId) -> DomainResult<Vec<Reservation>>
where
    T: LedgerTx + ?Sized,
{
    let mut holds = tx.reservations_for_request(request_id)?;
    holds.sort_by_key(|r| r.product_id);
    Ok(holds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pickledger_core::ConsultantId;
    use pickledger_inventory::{MovementType, Product, Request};

    use crate::storage::{InMemoryLedgerStore, LedgerStore, Transaction};

    fn q(v: i64) -> Quantity {
        Quantity::new(v).unwrap()
    }

    fn stocked(on_hand: &[i64]) -> (InMemoryLedgerStore, Vec<ProductId>) {
        let store = InMemoryLedgerStore::new();
        let mut ids = Vec::new();
        for (i, _) in on_hand.iter().enumerate() {
            let product = Product::new(ProductId::new(), format!("SKU-{i}"), "Item").unwrap();
            ids.push(product.id);
            store.register_product(product).unwrap();
        }
        let mut tx = store.begin().unwrap();
        for (id, qty) in ids.iter().zip(on_hand) {
            if *qty > 0 {
                ledger::apply_entrada(&mut tx, *id, *qty, &Actor::system()).unwrap();
            }
        }
        tx.commit().unwrap();
        (store, ids)
    }

    #[test]
    fn create_reserves_and_inserts_hold() {
        let (store, ids) = stocked(&[10]);
        let request_id = RequestId::new();

        let mut tx = store.begin().unwrap();
        let hold = create_reservation(&mut tx, request_id, ids[0], q(4)).unwrap();
        tx.commit().unwrap();

        let tx = store.begin().unwrap();
        assert_eq!(reservations_for_request(&tx, request_id).unwrap(), vec![hold]);
        let balance = ledger::get_balance(&tx, ids[0]).unwrap();
        assert_eq!((balance.reserved, balance.available), (4, 6));
    }

    #[test]
    fn create_beyond_available_fails() {
        let (store, ids) = stocked(&[3]);
        let mut tx = store.begin().unwrap();
        let err = create_reservation(&mut tx, RequestId::new(), ids[0], q(4)).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientAvailable { available: 3, .. }));
    }

    #[test]
    fn release_all_restores_counters_without_movements() {
        let (store, ids) = stocked(&[10, 5]);
        let request_id = RequestId::new();
        let mut tx = store.begin().unwrap();
        create_reservation(&mut tx, request_id, ids[0], q(4)).unwrap();
        create_reservation(&mut tx, request_id, ids[1], q(5)).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        let released = release_all_for_request(&mut tx, request_id).unwrap();
        tx.commit().unwrap();
        assert_eq!(released.len(), 2);

        let tx = store.begin().unwrap();
        assert!(reservations_for_request(&tx, request_id).unwrap().is_empty());
        for id in &ids {
            assert_eq!(ledger::get_balance(&tx, *id).unwrap().reserved, 0);
        }
        assert_eq!(tx.movements().unwrap().len(), 2);
    }

    #[test]
    fn consume_all_ships_holds_and_logs_saidas() {
        let (store, ids) = stocked(&[10, 5]);
        let request_id = RequestId::new();
        let mut tx = store.begin().unwrap();
        create_reservation(&mut tx, request_id, ids[0], q(4)).unwrap();
        create_reservation(&mut tx, request_id, ids[1], q(5)).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        let movements = consume_all_for_request(&mut tx, request_id, &Actor::new("Maria")).unwrap();
        tx.commit().unwrap();

        assert_eq!(movements.len(), 2);
        assert!(movements.iter().all(|m| m.movement_type() == MovementType::Saida));
        assert!(movements.iter().all(|m| m.request_id() == Some(request_id)));

        let tx = store.begin().unwrap();
        let a = ledger::get_balance(&tx, ids[0]).unwrap();
        let b = ledger::get_balance(&tx, ids[1]).unwrap();
        assert_eq!((a.on_hand, a.reserved), (6, 0));
        assert_eq!((b.on_hand, b.reserved), (0, 0));
        assert!(list_reservations(&tx, None).unwrap().is_empty());
    }

    #[test]
    fn request_without_holds_is_a_no_op() {
        let (store, _) = stocked(&[1]);
        let mut tx = store.begin().unwrap();
        assert!(release_all_for_request(&mut tx, RequestId::new()).unwrap().is_empty());
        assert!(consume_all_for_request(&mut tx, RequestId::new(), &Actor::system())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn list_can_narrow_to_one_product() {
        let (store, ids) = stocked(&[10, 10]);
        let mut tx = store.begin().unwrap();
        create_reservation(&mut tx, RequestId::new(), ids[0], q(1)).unwrap();
        create_reservation(&mut tx, RequestId::new(), ids[1], q(2)).unwrap();
        tx.commit().unwrap();

        let tx = store.begin().unwrap();
        assert_eq!(list_reservations(&tx, None).unwrap().len(), 2);
        let narrowed = list_reservations(&tx, Some(ids[1])).unwrap();
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0].quantity.get(), 2);
    }

    fn open_request(store: &InMemoryLedgerStore) -> RequestId {
        let mut tx = store.begin().unwrap();
        let request = Request::open(RequestId::new(), ConsultantId::new(), tx.now());
        let id = request.id;
        tx.insert_request(request).unwrap();
        tx.commit().unwrap();
        id
    }

    fn move_to(store: &InMemoryLedgerStore, request_id: RequestId, to: RequestStatus) {
        let mut tx = store.begin().unwrap();
        let mut request = tx.lock_request(request_id).unwrap().unwrap();
        request.transition(to).unwrap();
        tx.update_request(request).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn add_to_open_request_places_a_hold() {
        let (store, ids) = stocked(&[10]);
        let request_id = open_request(&store);

        let mut tx = store.begin().unwrap();
        let hold = add_to_request(&mut tx, request_id, ids[0], q(3)).unwrap();
        tx.commit().unwrap();

        let tx = store.begin().unwrap();
        assert_eq!(reservations_for_request(&tx, request_id).unwrap(), vec![hold]);
        assert_eq!(ledger::get_balance(&tx, ids[0]).unwrap().reserved, 3);
    }

    #[test]
    fn add_to_request_checks_request_and_stock() {
        let (store, ids) = stocked(&[2]);
        let request_id = open_request(&store);

        let mut tx = store.begin().unwrap();
        let err = add_to_request(&mut tx, RequestId::new(), ids[0], q(1)).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
        let err = add_to_request(&mut tx, request_id, ids[0], q(3)).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientAvailable { available: 2, .. }));
        let err = add_to_request(&mut tx, request_id, ProductId::new(), q(1)).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn add_to_request_past_aberta_is_rejected() {
        let (store, ids) = stocked(&[10]);
        let request_id = open_request(&store);
        move_to(&store, request_id, RequestStatus::Separacao);

        let mut tx = store.begin().unwrap();
        let err = add_to_request(&mut tx, request_id, ids[0], q(1)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { ref from, .. } if from == "separacao"));
        assert!(list_reservations(&tx, None).unwrap().is_empty());
    }

    #[test]
    fn release_one_hold_keeps_the_others() {
        let (store, ids) = stocked(&[10, 10]);
        let request_id = open_request(&store);
        let mut tx = store.begin().unwrap();
        let first = create_reservation(&mut tx, request_id, ids[0], q(4)).unwrap();
        let second = create_reservation(&mut tx, request_id, ids[1], q(2)).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        assert_eq!(release_reservation(&mut tx, first.id).unwrap(), first);
        tx.commit().unwrap();

        let tx = store.begin().unwrap();
        assert_eq!(reservations_for_request(&tx, request_id).unwrap(), vec![second]);
        let a = ledger::get_balance(&tx, ids[0]).unwrap();
        assert_eq!((a.on_hand, a.reserved), (10, 0));
        assert_eq!(ledger::get_balance(&tx, ids[1]).unwrap().reserved, 2);
        assert_eq!(tx.movements().unwrap().len(), 2);
    }

    #[test]
    fn release_unknown_reservation_is_not_found() {
        let (store, _) = stocked(&[1]);
        let mut tx = store.begin().unwrap();
        let err = release_reservation(&mut tx, ReservationId::new()).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn release_on_terminal_request_is_rejected() {
        let (store, ids) = stocked(&[10]);
        let request_id = open_request(&store);
        let mut tx = store.begin().unwrap();
        let hold = create_reservation(&mut tx, request_id, ids[0], q(4)).unwrap();
        tx.commit().unwrap();
        move_to(&store, request_id, RequestStatus::Cancelada);

        let mut tx = store.begin().unwrap();
        let err = release_reservation(&mut tx, hold.id).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { ref from, .. } if from == "cancelada"));
        assert_eq!(ledger::get_balance(&tx, ids[0]).unwrap().reserved, 4);
    }
}
