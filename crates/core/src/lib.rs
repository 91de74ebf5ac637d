//! `pickledger-core`: ledger foundation building blocks.
//!
//! This crate contains **pure** primitives (no storage, no IO): errors,
//! identifiers and value objects shared by every other crate.

pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use entity::{Entity, index_by_id};
pub use error::{DomainError, DomainResult};
pub use id::{ConsultantId, MovementId, ProductId, RequestId, ReservationId};
pub use value_object::{Actor, Quantity, ValueObject};
