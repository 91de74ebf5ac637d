//! Inventory reservation domain model.
//!
//! This crate contains the business rules for stock, reservations, movements
//! and pick requests, implemented purely as deterministic domain logic (no IO,
//! no storage, no clocks).

pub mod movement;
pub mod product;
pub mod request;
pub mod reservation;
pub mod stock;

pub use movement::{Movement, MovementFilter, MovementKind, MovementType};
pub use product::{Consultant, Product};
pub use request::{Request, RequestItem, RequestStatus, Transition};
pub use reservation::Reservation;
pub use stock::{StockBalance, StockRecord};
