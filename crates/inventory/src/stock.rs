//! Per-product stock counters and their invariant.
//!
//! `0 <= reserved <= on_hand` holds for every `StockRecord` value that can be
//! observed: each mutator checks the post-state before committing it to `self`,
//! so a failed mutation leaves the record untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pickledger_core::{DomainError, DomainResult, Entity, ProductId, Quantity};

/// Stock counters for one product.
///
/// `available` is never stored; it is derived from the two counters on every
/// read via [`StockRecord::available`]. Deserialization goes through
/// [`StockRecord::restore`], so a stored row with broken counters is refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StockRecordRow")]
pub struct StockRecord {
    product_id: ProductId,
    on_hand: i64,
    reserved: i64,
    updated_at: DateTime<Utc>,
}

/// Stored shape of a [`StockRecord`], before the counters are checked.
#[derive(Deserialize)]
struct StockRecordRow {
    product_id: ProductId,
    on_hand: i64,
    reserved: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StockRecordRow> for StockRecord {
    type Error = DomainError;

    fn try_from(row: StockRecordRow) -> DomainResult<Self> {
        Self::restore(row.product_id, row.on_hand, row.reserved, row.updated_at)
    }
}

/// Read-only view of a product's counters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalance {
    pub product_id: ProductId,
    pub on_hand: i64,
    pub reserved: i64,
    pub available: i64,
}

impl StockBalance {
    /// Balance of a product that has no stock record yet.
    pub fn zero(product_id: ProductId) -> Self {
        Self {
            product_id,
            on_hand: 0,
            reserved: 0,
            available: 0,
        }
    }
}

impl StockRecord {
    /// A zeroed record, as created by `ensure_record`.
    pub fn empty(product_id: ProductId, at: DateTime<Utc>) -> Self {
        Self {
            product_id,
            on_hand: 0,
            reserved: 0,
            updated_at: at,
        }
    }

    /// A record initialized with an opening on-hand quantity.
    pub fn with_on_hand(product_id: ProductId, on_hand: i64, at: DateTime<Utc>) -> DomainResult<Self> {
        if on_hand < 0 {
            return Err(DomainError::validation(format!(
                "initial quantity cannot be negative (got {on_hand})"
            )));
        }
        Ok(Self {
            product_id,
            on_hand,
            reserved: 0,
            updated_at: at,
        })
    }

    /// Rebuild a record from stored counters, rejecting states that break the invariant.
    pub fn restore(
        product_id: ProductId,
        on_hand: i64,
        reserved: i64,
        updated_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        check_counters(product_id, on_hand, reserved)?;
        Ok(Self {
            product_id,
            on_hand,
            reserved,
            updated_at,
        })
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn on_hand(&self) -> i64 {
        self.on_hand
    }

    pub fn reserved(&self) -> i64 {
        self.reserved
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The single derivation point for availability.
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }

    pub fn balance(&self) -> StockBalance {
        StockBalance {
            product_id: self.product_id,
            on_hand: self.on_hand,
            reserved: self.reserved,
            available: self.available(),
        }
    }

    /// Inbound restock: `on_hand += qty`.
    pub fn receive(&mut self, qty: Quantity, at: DateTime<Utc>) -> DomainResult<()> {
        let on_hand = self
            .on_hand
            .checked_add(qty.get())
            .ok_or_else(|| DomainError::validation("on-hand quantity overflow"))?;
        self.commit(on_hand, self.reserved, at)
    }

    /// Outbound movement of unreserved units: `on_hand -= qty`.
    ///
    /// Units held by reservations cannot leave through this path; use
    /// [`StockRecord::consume_reserved`] for those.
    pub fn withdraw(&mut self, qty: Quantity, at: DateTime<Utc>) -> DomainResult<()> {
        let qty = qty.get();
        if qty > self.on_hand {
            return Err(DomainError::InsufficientStock {
                product_id: self.product_id,
                requested: qty,
                on_hand: self.on_hand,
            });
        }
        if qty > self.available() {
            return Err(DomainError::InsufficientAvailable {
                product_id: self.product_id,
                requested: qty,
                available: self.available(),
            });
        }
        self.commit(self.on_hand - qty, self.reserved, at)
    }

    /// Place a hold: `reserved += qty`.
    pub fn reserve(&mut self, qty: Quantity, at: DateTime<Utc>) -> DomainResult<()> {
        let qty = qty.get();
        if qty > self.available() {
            return Err(DomainError::InsufficientAvailable {
                product_id: self.product_id,
                requested: qty,
                available: self.available(),
            });
        }
        self.commit(self.on_hand, self.reserved + qty, at)
    }

    /// Drop a hold: `reserved -= qty`. Never clamps.
    pub fn release(&mut self, qty: Quantity, at: DateTime<Utc>) -> DomainResult<()> {
        let qty = qty.get();
        if qty > self.reserved {
            return Err(DomainError::invariant(format!(
                "release of {qty} would drive reserved negative for product {} (reserved {})",
                self.product_id, self.reserved
            )));
        }
        self.commit(self.on_hand, self.reserved - qty, at)
    }

    /// Ship held units: `on_hand -= qty` and `reserved -= qty` as one step.
    pub fn consume_reserved(&mut self, qty: Quantity, at: DateTime<Utc>) -> DomainResult<()> {
        let qty = qty.get();
        if qty > self.on_hand {
            return Err(DomainError::InsufficientStock {
                product_id: self.product_id,
                requested: qty,
                on_hand: self.on_hand,
            });
        }
        if qty > self.reserved {
            return Err(DomainError::invariant(format!(
                "consumption of {qty} exceeds reserved {} for product {}",
                self.reserved, self.product_id
            )));
        }
        self.commit(self.on_hand - qty, self.reserved - qty, at)
    }

    fn commit(&mut self, on_hand: i64, reserved: i64, at: DateTime<Utc>) -> DomainResult<()> {
        check_counters(self.product_id, on_hand, reserved)?;
        self.on_hand = on_hand;
        self.reserved = reserved;
        self.updated_at = at;
        Ok(())
    }
}

fn check_counters(product_id: ProductId, on_hand: i64, reserved: i64) -> DomainResult<()> {
    if reserved < 0 || on_hand < reserved {
        return Err(DomainError::invariant(format!(
            "stock counters out of range for product {product_id}: on_hand={on_hand}, reserved={reserved}"
        )));
    }
    Ok(())
}

impl Entity for StockRecord {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn qty(v: i64) -> Quantity {
        Quantity::new(v).unwrap()
    }

    fn record(on_hand: i64, reserved: i64) -> StockRecord {
        StockRecord::restore(ProductId::new(), on_hand, reserved, Utc::now()).unwrap()
    }

    #[test]
    fn available_is_derived_from_counters() {
        let r = record(10, 4);
        assert_eq!(r.available(), 6);
        assert_eq!(r.balance().available, 6);
    }

    #[test]
    fn reserve_beyond_available_is_rejected_and_state_is_unchanged() {
        let mut r = record(10, 4);
        let before = r.clone();
        let err = r.reserve(qty(7), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InsufficientAvailable { requested: 7, available: 6, .. }
        ));
        assert_eq!(r, before);
    }

    #[test]
    fn release_more_than_reserved_is_an_invariant_violation() {
        let mut r = record(10, 2);
        let err = r.release(qty(3), Utc::now()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(r.reserved(), 2);
    }

    #[test]
    fn withdraw_beyond_on_hand_is_insufficient_stock() {
        let mut r = record(3, 0);
        let err = r.withdraw(qty(4), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { on_hand: 3, .. }));
    }

    #[test]
    fn withdraw_cannot_take_reserved_units() {
        let mut r = record(10, 8);
        let err = r.withdraw(qty(5), Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientAvailable { available: 2, .. }));
    }

    #[test]
    fn consume_reserved_moves_both_counters() {
        let mut r = record(4, 4);
        r.consume_reserved(qty(4), Utc::now()).unwrap();
        assert_eq!((r.on_hand(), r.reserved()), (0, 0));
    }

    #[test]
    fn restore_rejects_broken_counters() {
        assert!(StockRecord::restore(ProductId::new(), 1, 2, Utc::now()).is_err());
        assert!(StockRecord::restore(ProductId::new(), 1, -1, Utc::now()).is_err());
    }

    #[test]
    fn deserialized_rows_are_checked() {
        let product_id = ProductId::new();
        let row = |on_hand: i64, reserved: i64| {
            serde_json::json!({
                "product_id": product_id,
                "on_hand": on_hand,
                "reserved": reserved,
                "updated_at": "2025-03-01T10:00:00Z",
            })
        };

        let r: StockRecord = serde_json::from_value(row(10, 4)).unwrap();
        assert_eq!((r.on_hand(), r.reserved(), r.available()), (10, 4, 6));

        let err = serde_json::from_value::<StockRecord>(row(1, 5)).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
        assert!(serde_json::from_value::<StockRecord>(row(3, -1)).is_err());
    }

    #[test]
    fn serialized_record_reads_back() {
        let r = record(7, 2);
        let back: StockRecord = serde_json::from_str(&serde_json::to_string(&r).unwrap()).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn negative_opening_balance_is_rejected() {
        let err = StockRecord::with_on_hand(ProductId::new(), -1, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Receive(i64),
        Withdraw(i64),
        Reserve(i64),
        Release(i64),
        Consume(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..50).prop_map(Op::Receive),
            (1i64..50).prop_map(Op::Withdraw),
            (1i64..50).prop_map(Op::Reserve),
            (1i64..50).prop_map(Op::Release),
            (1i64..50).prop_map(Op::Consume),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever sequence of mutations is attempted, accepted or
        /// rejected, the counters never leave `0 <= reserved <= on_hand`.
        #[test]
        fn counters_stay_in_range(ops in prop::collection::vec(op(), 1..64)) {
            let mut r = StockRecord::empty(ProductId::new(), Utc::now());
            for op in ops {
                let now = Utc::now();
                let _ = match op {
                    Op::Receive(q) => r.receive(qty(q), now),
                    Op::Withdraw(q) => r.withdraw(qty(q), now),
                    Op::Reserve(q) => r.reserve(qty(q), now),
                    Op::Release(q) => r.release(qty(q), now),
                    Op::Consume(q) => r.consume_reserved(qty(q), now),
                };
                prop_assert!(r.reserved() >= 0);
                prop_assert!(r.reserved() <= r.on_hand());
                prop_assert_eq!(r.available(), r.on_hand() - r.reserved());
            }
        }

        /// Property: reserve followed by release restores the counters exactly.
        #[test]
        fn reserve_then_release_round_trips(on_hand in 0i64..1000, q in 1i64..1000) {
            let mut r = StockRecord::with_on_hand(ProductId::new(), on_hand, Utc::now()).unwrap();
            let before = (r.on_hand(), r.reserved());
            if r.reserve(qty(q), Utc::now()).is_ok() {
                r.release(qty(q), Utc::now()).unwrap();
            }
            prop_assert_eq!((r.on_hand(), r.reserved()), before);
        }
    }
}
