//! Row identity shared by every ledger table.

use std::collections::BTreeMap;

/// A ledger row with a stable identity.
///
/// Stock records, reservations, movements and requests are all entities:
/// two rows with the same id are the same row, whatever their counters say.
pub trait Entity {
    type Id: Copy + Ord + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}

/// Key rows by id. A later row replaces an earlier one with the same id, so
/// chaining committed rows before pending ones yields the merged view.
pub fn index_by_id<E, I>(rows: I) -> BTreeMap<E::Id, E>
where
    E: Entity,
    I: IntoIterator<Item = E>,
{
    rows.into_iter().map(|row| (*row.id(), row)).collect()
}
